//! Health card prompt: PIN entry followed by a contactless card session.
//!
//! One attempt walks through
//!
//! ```text
//! None -> EnterCredentials -> Searching -> Reading(00..75) -> Reading(Success)
//!                                  \______________\____> Error(..)
//! ```
//!
//! and resets to `None` when it ends. Entering credentials again while a
//! card session runs drops that session and starts searching anew.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::{BoxStream, StreamExt};
use regex::Regex;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::ErxResult;
use crate::bridge::{AuthenticationBridge, TagSource};
use crate::config::{AuthenticatorConfig, ConfigError};
use crate::error::{AuthError, TagSourceError};
use crate::prompt::{
    AttemptHandle, AuthStream, Latest, PromptAuthenticator, PromptCore, Signal, attempt_stream,
};
use crate::types::{
    AuthResult, AuthScope, InitialAuthenticationData, LowLevelAuthState, NfcTag, Profile,
    ProfileId,
};

/// Observable state of the health card prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum HealthCardState {
    /// No attempt running.
    #[default]
    None,
    /// Waiting for the user to enter the PIN.
    EnterCredentials,
    /// Waiting for a card to be held against the device.
    Searching,
    /// A card session is running.
    Reading(ReadingProgress),
    /// The last card session failed.
    Error(HealthCardError),
}

impl HealthCardState {
    /// Returns `true` while newly discovered tags may start a card session.
    ///
    /// Only [`HealthCardError::TagLost`] keeps the reader open; every other
    /// error waits for the credentials to be entered again.
    #[must_use]
    pub fn accepts_tags(&self) -> bool {
        match self {
            Self::Error(error) => error.is_recoverable(),
            _ => true,
        }
    }
}

impl fmt::Display for HealthCardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::EnterCredentials => write!(f, "enter credentials"),
            Self::Searching => write!(f, "searching"),
            Self::Reading(progress) => write!(f, "reading {progress}"),
            Self::Error(error) => write!(f, "error: {error}"),
        }
    }
}

/// Progress of a running card session. Ordered from start to finish.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ReadingProgress {
    Reading00,
    Reading25,
    Reading50,
    Reading75,
    Success,
}

impl ReadingProgress {
    /// Completion in percent.
    #[must_use]
    pub fn percent(&self) -> u8 {
        match self {
            Self::Reading00 => 0,
            Self::Reading25 => 25,
            Self::Reading50 => 50,
            Self::Reading75 => 75,
            Self::Success => 100,
        }
    }

    fn from_low_level(state: LowLevelAuthState) -> Option<Self> {
        match state {
            LowLevelAuthState::HealthCardCommunicationChannelReady => Some(Self::Reading00),
            LowLevelAuthState::HealthCardCommunicationTrustedChannelEstablished => {
                Some(Self::Reading25)
            }
            LowLevelAuthState::HealthCardCommunicationFinished => Some(Self::Reading50),
            LowLevelAuthState::IdpCommunicationFinished => Some(Self::Reading75),
            _ => None,
        }
    }
}

impl fmt::Display for ReadingProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

/// Why a card session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCardError {
    /// The contactless interface is switched off.
    NfcDisabled,
    /// The card left the field before the session finished.
    TagLost,
    /// The identity provider could not be reached.
    RemoteCommunicationFailed,
    /// The card access number on file does not match the card.
    CardAccessNumberWrong,
    /// The PIN was wrong.
    PersonalIdentificationWrong {
        /// PIN attempts the card still allows.
        retries_left: u8,
    },
    /// The card refuses further PIN attempts.
    HealthCardBlocked,
    /// The identity provider presented an invalid certificate.
    RemoteCommunicationInvalidCertificate,
    /// The identity provider's OCSP response was invalid.
    RemoteCommunicationInvalidOcsp,
}

impl HealthCardError {
    /// Returns `true` if holding the card again may succeed without new credentials.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::TagLost)
    }

    fn from_low_level(state: LowLevelAuthState) -> Self {
        match state {
            LowLevelAuthState::HealthCardCommunicationInterrupted => Self::TagLost,
            LowLevelAuthState::HealthCardCardAccessNumberWrong => Self::CardAccessNumberWrong,
            LowLevelAuthState::HealthCardPin2RetriesLeft => {
                Self::PersonalIdentificationWrong { retries_left: 2 }
            }
            LowLevelAuthState::HealthCardPin1RetryLeft => {
                Self::PersonalIdentificationWrong { retries_left: 1 }
            }
            LowLevelAuthState::HealthCardBlocked => Self::HealthCardBlocked,
            LowLevelAuthState::IdpCommunicationFailed => Self::RemoteCommunicationFailed,
            LowLevelAuthState::IdpCommunicationInvalidCertificate => {
                Self::RemoteCommunicationInvalidCertificate
            }
            LowLevelAuthState::IdpCommunicationInvalidOcspResponse => {
                Self::RemoteCommunicationInvalidOcsp
            }
            _ => Self::TagLost,
        }
    }
}

impl fmt::Display for HealthCardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NfcDisabled => write!(f, "NFC disabled"),
            Self::TagLost => write!(f, "tag lost"),
            Self::RemoteCommunicationFailed => write!(f, "remote communication failed"),
            Self::CardAccessNumberWrong => write!(f, "card access number wrong"),
            Self::PersonalIdentificationWrong { retries_left } => {
                write!(f, "PIN wrong, {retries_left} retries left")
            }
            Self::HealthCardBlocked => write!(f, "health card blocked"),
            Self::RemoteCommunicationInvalidCertificate => {
                write!(f, "invalid identity provider certificate")
            }
            Self::RemoteCommunicationInvalidOcsp => write!(f, "invalid OCSP response"),
        }
    }
}

#[derive(Debug)]
enum HealthCardRequest {
    CredentialsEntered(SecretString),
}

/// Prompt authenticating with a health card and its PIN.
#[derive(Clone)]
pub struct HealthCardPromptAuthenticator {
    inner: Arc<Inner>,
}

struct Inner {
    core: Arc<PromptCore<HealthCardRequest, HealthCardState>>,
    bridge: Arc<dyn AuthenticationBridge>,
    tag_source: Arc<dyn TagSource>,
    pin_pattern: Regex,
    pin_min_length: usize,
    pin_max_length: usize,
}

impl HealthCardPromptAuthenticator {
    /// Creates the prompt.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `config` does not validate.
    pub fn new(
        bridge: Arc<dyn AuthenticationBridge>,
        tag_source: Arc<dyn TagSource>,
        config: &AuthenticatorConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let pin_pattern = Regex::new(&config.health_card.pin_pattern())
            .map_err(|e| ConfigError::InvalidValue(format!("PIN pattern: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                core: PromptCore::new("health card", config.transition_capacity),
                bridge,
                tag_source,
                pin_pattern,
                pin_min_length: config.health_card.pin_min_length,
                pin_max_length: config.health_card.pin_max_length,
            }),
        })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> HealthCardState {
        self.inner.core.state()
    }

    /// Receiver always holding the latest state.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<HealthCardState> {
        self.inner.core.watch_state()
    }

    /// Receiver of every state transition.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HealthCardState> {
        self.inner.core.subscribe()
    }

    /// Profile of the running attempt.
    #[must_use]
    pub fn profile(&self) -> Option<Profile> {
        self.inner.core.profile()
    }

    /// Queues the entered PIN for the running attempt.
    ///
    /// Waits until an attempt listens and its request slot is free. A PIN
    /// still queued when the attempt ends is dropped.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidPin` without contacting the attempt if the
    /// PIN is not all digits of the configured length.
    pub async fn on_credentials_entered(&self, pin: impl Into<String>) -> ErxResult<()> {
        let pin = pin.into();
        if !self.inner.pin_pattern.is_match(&pin) {
            return Err(AuthError::InvalidPin {
                min: self.inner.pin_min_length,
                max: self.inner.pin_max_length,
            });
        }
        self.inner
            .core
            .send(HealthCardRequest::CredentialsEntered(SecretString::from(pin)))
            .await
    }

    /// Asks the running attempt to stop, ahead of any queued PIN. Waits
    /// until an attempt listens.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::RequestNotDelivered` if the request could not be handed over.
    pub async fn on_cancel(&self) -> ErxResult<()> {
        self.inner.core.cancel_when_listening().await
    }
}

#[async_trait]
impl PromptAuthenticator for HealthCardPromptAuthenticator {
    fn authenticate(&self, profile_id: &ProfileId, scope: AuthScope) -> AuthStream {
        let inner = Arc::clone(&self.inner);
        let profile_id = profile_id.clone();
        attempt_stream(async move { inner.run(profile_id, scope).await })
    }

    async fn cancel_authentication(&self) {
        if self.inner.core.cancel() {
            tracing::debug!("Health card cancellation requested");
        }
    }
}

impl Inner {
    async fn run(self: Arc<Self>, profile_id: ProfileId, scope: AuthScope) -> Option<AuthResult> {
        let mut attempt = self.core.begin();

        let (can, profile) = match self.bridge.authenticate_for(&profile_id).await {
            Ok(InitialAuthenticationData::HealthCard { can, profile }) => (can, profile),
            Ok(other) => {
                tracing::debug!(
                    profile_id = %profile_id,
                    method = other.method(),
                    "Profile is not bound to a health card"
                );
                return Some(AuthResult::Cancelled);
            }
            Err(e) => {
                tracing::warn!(profile_id = %profile_id, error = %e, "Failed to classify profile");
                return Some(AuthResult::Cancelled);
            }
        };

        attempt.set_profile(profile);
        attempt.set_state(HealthCardState::EnterCredentials);

        let mut session: Latest<Option<AuthResult>> = Latest::new();
        loop {
            tokio::select! {
                signal = attempt.next_signal() => match signal {
                    Signal::Request(HealthCardRequest::CredentialsEntered(pin)) => {
                        if attempt.state() == HealthCardState::Error(HealthCardError::HealthCardBlocked) {
                            tracing::warn!(profile_id = %profile_id, "Health card is blocked, ignoring credentials");
                            continue;
                        }
                        if session.cancel() {
                            tracing::debug!(profile_id = %profile_id, "Dropping running card session");
                        }
                        // Open the tag stream before announcing the search so no tap is missed
                        let tags = self.tag_source.tags();
                        attempt.set_state(HealthCardState::Searching);
                        let reader = CardReader {
                            bridge: Arc::clone(&self.bridge),
                            handle: attempt.handle(),
                            profile_id: profile_id.clone(),
                            scope,
                            can: can.clone(),
                            pin,
                        };
                        session.replace(reader.read(tags));
                    }
                    Signal::Cancel => {
                        session.cancel();
                        tracing::info!(profile_id = %profile_id, "Health card authentication cancelled");
                        return Some(AuthResult::Cancelled);
                    }
                    Signal::Superseded => {
                        tracing::debug!(profile_id = %profile_id, "Health card attempt superseded");
                        return Some(AuthResult::Cancelled);
                    }
                },
                outcome = session.finished(), if session.is_running() => {
                    if let Some(result) = outcome {
                        tracing::info!(profile_id = %profile_id, scope = %scope, result = %result, "Health card authentication finished");
                        return Some(result);
                    }
                    tracing::debug!(profile_id = %profile_id, "Tag discovery ended without a result");
                }
            }
        }
    }
}

/// Consumes discovered tags for one credentials entry.
struct CardReader {
    bridge: Arc<dyn AuthenticationBridge>,
    handle: AttemptHandle<HealthCardRequest, HealthCardState>,
    profile_id: ProfileId,
    scope: AuthScope,
    can: String,
    pin: SecretString,
}

type CardSession = BoxStream<'static, LowLevelAuthState>;

impl CardReader {
    /// Runs card sessions for discovered tags until one authenticates.
    ///
    /// Returns `None` once the tag stream and the last card session are exhausted.
    async fn read(
        self,
        mut tags: BoxStream<'static, Result<NfcTag, TagSourceError>>,
    ) -> Option<AuthResult> {
        let mut tags_open = true;
        let mut card: Option<CardSession> = None;
        let mut progress: Option<ReadingProgress> = None;

        while tags_open || card.is_some() {
            tokio::select! {
                discovered = tags.next(), if tags_open => match discovered {
                    Some(Ok(tag)) => {
                        if !self.handle.state().accepts_tags() {
                            tracing::debug!(tag = %tag.uid_hex(), "Ignoring tag until credentials are entered again");
                            continue;
                        }
                        if card.is_some() {
                            tracing::debug!(tag = %tag.uid_hex(), "New tag replaces running card session");
                        } else {
                            tracing::debug!(tag = %tag.uid_hex(), "Health card discovered");
                        }
                        card = Some(self.bridge.do_health_card_authentication(
                            &self.profile_id,
                            self.scope,
                            &self.can,
                            &self.pin,
                            &tag,
                        ));
                        progress = None;
                    }
                    Some(Err(TagSourceError::NfcDisabled)) => {
                        tracing::warn!(profile_id = %self.profile_id, "NFC is disabled");
                        self.handle.set_state(HealthCardState::Error(HealthCardError::NfcDisabled));
                        card = None;
                        tags_open = false;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(profile_id = %self.profile_id, error = %e, "Tag discovery stopped");
                        tags_open = false;
                    }
                    None => tags_open = false,
                },
                next = next_card_state(&mut card), if card.is_some() => match next {
                    Some(state) if state.is_final() => {
                        self.handle.set_state(HealthCardState::Reading(ReadingProgress::Success));
                        return Some(AuthResult::Authenticated);
                    }
                    Some(state) if state.is_failure() => {
                        let error = HealthCardError::from_low_level(state);
                        tracing::warn!(
                            profile_id = %self.profile_id,
                            low_level = ?state,
                            error = %error,
                            "Card session failed"
                        );
                        self.handle.set_state(HealthCardState::Error(error));
                        card = None;
                    }
                    Some(state) => {
                        if let Some(next) = ReadingProgress::from_low_level(state)
                            && progress.is_none_or(|current| next > current)
                        {
                            progress = Some(next);
                            self.handle.set_state(HealthCardState::Reading(next));
                        }
                    }
                    None => {
                        tracing::debug!(prompt = self.handle.prompt(), "Card session ended");
                        card = None;
                    }
                },
            }
        }

        None
    }
}

async fn next_card_state(card: &mut Option<CardSession>) -> Option<LowLevelAuthState> {
    match card.as_mut() {
        Some(states) => states.next().await,
        None => future::pending().await,
    }
}
