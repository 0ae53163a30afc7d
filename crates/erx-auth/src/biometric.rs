//! Secure-element prompt: biometric unlock followed by the identity provider handshake.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::bridge::{AuthenticationBridge, BiometricCeremony};
use crate::config::{AuthenticatorConfig, ConfigError};
use crate::prompt::{AuthStream, PromptAuthenticator, PromptCore, Signal, attempt_stream};
use crate::types::{
    AuthResult, AuthScope, InitialAuthenticationData, LowLevelAuthState, Profile, ProfileId,
};

/// Observable state of the secure-element prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecureElementState {
    /// No attempt running.
    #[default]
    None,
    /// Ceremony or handshake running.
    InProgress,
}

impl fmt::Display for SecureElementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::InProgress => write!(f, "in progress"),
        }
    }
}

/// Which step of the handshake failed. Stays set until cleared by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum SecureElementError {
    /// The identity provider could not be reached.
    RemoteCommunicationFailed,
    /// The identity provider rejected the device key; the user should fall
    /// back to another method for this profile.
    RemoteCommunicationAltAuthNotSuccessful {
        /// The affected profile.
        profile_id: ProfileId,
    },
    /// The identity provider presented an invalid certificate.
    RemoteCommunicationInvalidCertificate,
    /// The identity provider's OCSP response was invalid.
    RemoteCommunicationInvalidOcsp,
}

impl SecureElementError {
    fn from_low_level(state: LowLevelAuthState, profile_id: &ProfileId) -> Self {
        match state {
            LowLevelAuthState::IdpCommunicationFailed => Self::RemoteCommunicationFailed,
            LowLevelAuthState::IdpCommunicationInvalidCertificate => {
                Self::RemoteCommunicationInvalidCertificate
            }
            LowLevelAuthState::IdpCommunicationInvalidOcspResponse => {
                Self::RemoteCommunicationInvalidOcsp
            }
            _ => Self::RemoteCommunicationAltAuthNotSuccessful {
                profile_id: profile_id.clone(),
            },
        }
    }
}

impl fmt::Display for SecureElementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteCommunicationFailed => write!(f, "remote communication failed"),
            Self::RemoteCommunicationAltAuthNotSuccessful { profile_id } => {
                write!(f, "device key rejected for profile {profile_id}")
            }
            Self::RemoteCommunicationInvalidCertificate => {
                write!(f, "invalid identity provider certificate")
            }
            Self::RemoteCommunicationInvalidOcsp => write!(f, "invalid OCSP response"),
        }
    }
}

/// Prompt authenticating with the device-bound key.
#[derive(Clone)]
pub struct BiometricPromptAuthenticator {
    inner: Arc<Inner>,
}

struct Inner {
    core: Arc<PromptCore<Infallible, SecureElementState>>,
    bridge: Arc<dyn AuthenticationBridge>,
    ceremony: Arc<dyn BiometricCeremony>,
    show_error: watch::Sender<Option<SecureElementError>>,
}

impl BiometricPromptAuthenticator {
    /// Creates the prompt.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `config` does not validate.
    pub fn new(
        bridge: Arc<dyn AuthenticationBridge>,
        ceremony: Arc<dyn BiometricCeremony>,
        config: &AuthenticatorConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (show_error, _) = watch::channel(None);
        Ok(Self {
            inner: Arc::new(Inner {
                core: PromptCore::new("secure element", config.transition_capacity),
                bridge,
                ceremony,
                show_error,
            }),
        })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SecureElementState {
        self.inner.core.state()
    }

    /// Receiver always holding the latest state.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SecureElementState> {
        self.inner.core.watch_state()
    }

    /// Receiver of every state transition.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SecureElementState> {
        self.inner.core.subscribe()
    }

    /// Profile of the running attempt.
    #[must_use]
    pub fn profile(&self) -> Option<Profile> {
        self.inner.core.profile()
    }

    /// The last handshake failure, if not yet cleared.
    #[must_use]
    pub fn show_error(&self) -> Option<SecureElementError> {
        self.inner.show_error.borrow().clone()
    }

    /// Receiver always holding the current handshake failure.
    #[must_use]
    pub fn watch_error(&self) -> watch::Receiver<Option<SecureElementError>> {
        self.inner.show_error.subscribe()
    }

    /// Dismisses the handshake failure.
    pub fn clear_error(&self) {
        self.inner.show_error.send_replace(None);
    }
}

#[async_trait]
impl PromptAuthenticator for BiometricPromptAuthenticator {
    fn authenticate(&self, profile_id: &ProfileId, scope: AuthScope) -> AuthStream {
        let inner = Arc::clone(&self.inner);
        let profile_id = profile_id.clone();
        attempt_stream(async move { inner.run(profile_id, scope).await })
    }

    async fn cancel_authentication(&self) {
        if self.inner.core.cancel() {
            tracing::debug!("Secure element cancellation requested");
        }
    }
}

impl Inner {
    async fn run(self: Arc<Self>, profile_id: ProfileId, scope: AuthScope) -> Option<AuthResult> {
        let mut attempt = self.core.begin();

        let profile = match self.bridge.authenticate_for(&profile_id).await {
            Ok(InitialAuthenticationData::SecureElement { profile }) => profile,
            Ok(other) => {
                tracing::debug!(
                    profile_id = %profile_id,
                    method = other.method(),
                    "Profile is not bound to a secure element key"
                );
                return Some(AuthResult::Cancelled);
            }
            Err(e) => {
                tracing::warn!(profile_id = %profile_id, error = %e, "Failed to classify profile");
                return Some(AuthResult::Cancelled);
            }
        };

        attempt.set_profile(profile.clone());
        attempt.set_state(SecureElementState::InProgress);

        let result = tokio::select! {
            signal = attempt.next_signal() => match signal {
                Signal::Request(never) => match never {},
                Signal::Cancel => {
                    tracing::info!(profile_id = %profile_id, "Secure element authentication cancelled");
                    AuthResult::Cancelled
                }
                Signal::Superseded => {
                    tracing::debug!(profile_id = %profile_id, "Secure element attempt superseded");
                    AuthResult::Cancelled
                }
            },
            result = self.unlock_and_handshake(&profile, &profile_id, scope) => {
                tracing::info!(profile_id = %profile_id, scope = %scope, result = %result, "Secure element authentication finished");
                result
            }
        };

        Some(result)
    }

    async fn unlock_and_handshake(
        &self,
        profile: &Profile,
        profile_id: &ProfileId,
        scope: AuthScope,
    ) -> AuthResult {
        if let Err(e) = self.ceremony.authenticate(profile).await {
            tracing::info!(profile_id = %profile_id, error = %e, "Biometric ceremony not successful");
            return AuthResult::Cancelled;
        }

        let mut states = self.bridge.do_secure_element_authentication(profile_id, scope);
        while let Some(state) = states.next().await {
            if state.is_final() {
                return AuthResult::Authenticated;
            }
            if !state.is_failure() {
                continue;
            }
            if state == LowLevelAuthState::UserNotAuthenticated {
                return AuthResult::UserNotAuthenticated;
            }
            let error = SecureElementError::from_low_level(state, profile_id);
            tracing::warn!(
                profile_id = %profile_id,
                low_level = ?state,
                error = %error,
                "Secure element handshake failed"
            );
            self.show_error.send_replace(Some(error));
            return AuthResult::Cancelled;
        }

        tracing::warn!(profile_id = %profile_id, "Secure element handshake ended without a result");
        AuthResult::Cancelled
    }
}
