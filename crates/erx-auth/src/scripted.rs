//! In-process collaborators replaying scripted behaviour.
//!
//! Used by the simulator and the tests in place of real hardware and a real
//! identity provider. Every script is serde-deserializable, so scenarios can
//! be written in TOML:
//!
//! ```toml
//! [[enrollments]]
//! method = "health_card"
//! can = "123123"
//! profile = { id = "p-1", name = "Ada" }
//!
//! [[card_sessions]]
//! states = ["health_card_communication_channel_ready", "authentication_flow_finished"]
//! step_delay = "150ms"
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use url::Url;

use crate::bridge::{AppLauncher, AuthenticationBridge, BiometricCeremony, TagSource};
use crate::error::{BridgeError, CeremonyError, TagSourceError};
use crate::types::{
    AuthScope, InitialAuthenticationData, InsuranceProvider, LowLevelAuthState, NfcTag, Profile,
    ProfileId,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Scripted collaborator mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// States one card or secure-element session reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionScript {
    /// States in the order they are reported.
    pub states: Vec<LowLevelAuthState>,

    /// Pause before each state.
    #[serde(with = "humantime_serde")]
    pub step_delay: Option<Duration>,

    /// Keep the session open after the last state, like a card still in the field.
    pub hold_open: bool,
}

impl SessionScript {
    /// A session reporting `states` without delay.
    #[must_use]
    pub fn new(states: impl IntoIterator<Item = LowLevelAuthState>) -> Self {
        Self {
            states: states.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Sets the pause before each state.
    #[must_use]
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }

    /// Keeps the session open after the last state.
    #[must_use]
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// A complete successful card session.
    #[must_use]
    pub fn card_success() -> Self {
        Self::new([
            LowLevelAuthState::AuthenticationFlowInitialized,
            LowLevelAuthState::HealthCardCommunicationChannelReady,
            LowLevelAuthState::HealthCardCommunicationTrustedChannelEstablished,
            LowLevelAuthState::HealthCardCommunicationCertificateLoaded,
            LowLevelAuthState::HealthCardCommunicationFinished,
            LowLevelAuthState::IdpCommunicationFinished,
            LowLevelAuthState::AuthenticationFlowFinished,
        ])
    }

    fn play(self) -> BoxStream<'static, LowLevelAuthState> {
        let delay = self.step_delay;
        let states = stream::iter(self.states).then(move |state| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            state
        });
        if self.hold_open {
            states.chain(stream::pending()).boxed()
        } else {
            states.boxed()
        }
    }
}

/// Scripted answer of a bridge call that either succeeds or fails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BridgeOutcome {
    /// The call succeeds.
    #[default]
    Ok,
    /// The provider produced a malformed redirect.
    InvalidRedirect {
        /// Failure description.
        message: String,
    },
    /// The provider rejected the request.
    Provider {
        /// Failure description.
        message: String,
    },
    /// The provider could not be reached.
    Network {
        /// Failure description.
        message: String,
    },
}

impl BridgeOutcome {
    fn into_result(self, provider: &str) -> Result<(), BridgeError> {
        match self {
            Self::Ok => Ok(()),
            Self::InvalidRedirect { message } => Err(BridgeError::invalid_redirect(provider, message)),
            Self::Provider { message } => Err(BridgeError::provider(provider, message)),
            Self::Network { message } => Err(BridgeError::network(message)),
        }
    }
}

/// Scripted insurance app directory and redirect handling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalScript {
    /// Providers returned by the directory.
    pub providers: Vec<InsuranceProvider>,

    /// Redirect into the insurance app; derived from the provider id when absent.
    pub redirect: Option<Url>,

    /// Answer when starting the app-based flow.
    pub authentication: BridgeOutcome,

    /// Answer when completing it with the app's redirect.
    pub authorization: BridgeOutcome,
}

/// Everything a [`ScriptedBridge`] replays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeScript {
    /// Credential classification per profile.
    pub enrollments: Vec<InitialAuthenticationData>,

    /// One script per discovered tag, consumed in order.
    pub card_sessions: Vec<SessionScript>,

    /// Replayed for every secure-element handshake.
    pub secure_element: SessionScript,

    /// Insurance app behaviour.
    pub external: ExternalScript,

    /// Delay added to every request/response call.
    #[serde(with = "humantime_serde")]
    pub latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct CallCounters {
    classify: AtomicUsize,
    card_sessions: AtomicUsize,
    secure_element: AtomicUsize,
    external_authentication: AtomicUsize,
    external_authorization: AtomicUsize,
}

/// Decrements the open session count when the session stream is dropped.
struct SessionGuard(Arc<AtomicUsize>);

impl SessionGuard {
    fn open(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(count))
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// [`AuthenticationBridge`] replaying a [`BridgeScript`].
///
/// A tag discovered after the card session queue ran dry reports an
/// interrupted session, as if the card was pulled away immediately.
#[derive(Debug)]
pub struct ScriptedBridge {
    enrollments: Mutex<HashMap<ProfileId, InitialAuthenticationData>>,
    card_sessions: Mutex<VecDeque<SessionScript>>,
    secure_element: Mutex<SessionScript>,
    external: Mutex<ExternalScript>,
    latency: Option<Duration>,
    calls: CallCounters,
    open_card_sessions: Arc<AtomicUsize>,
    scopes: Mutex<Vec<AuthScope>>,
    removed: Mutex<Vec<ProfileId>>,
}

impl Default for ScriptedBridge {
    fn default() -> Self {
        Self::from_script(BridgeScript::default())
    }
}

impl ScriptedBridge {
    /// Creates a bridge without enrollments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bridge replaying `script`.
    #[must_use]
    pub fn from_script(script: BridgeScript) -> Self {
        let enrollments = script
            .enrollments
            .into_iter()
            .map(|data| (data.profile().id.clone(), data))
            .collect();
        Self {
            enrollments: Mutex::new(enrollments),
            card_sessions: Mutex::new(script.card_sessions.into()),
            secure_element: Mutex::new(script.secure_element),
            external: Mutex::new(script.external),
            latency: script.latency,
            calls: CallCounters::default(),
            open_card_sessions: Arc::new(AtomicUsize::new(0)),
            scopes: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        }
    }

    /// Adds or replaces the classification of a profile.
    #[must_use]
    pub fn with_enrollment(self, data: InitialAuthenticationData) -> Self {
        self.enroll(data);
        self
    }

    /// Queues a card session script.
    #[must_use]
    pub fn with_card_session(self, script: SessionScript) -> Self {
        self.push_card_session(script);
        self
    }

    /// Sets the secure-element handshake script.
    #[must_use]
    pub fn with_secure_element(self, script: SessionScript) -> Self {
        self.set_secure_element(script);
        self
    }

    /// Sets the insurance app behaviour.
    #[must_use]
    pub fn with_external(self, script: ExternalScript) -> Self {
        self.set_external(script);
        self
    }

    /// Delays every request/response call by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Adds or replaces the classification of a profile.
    pub fn enroll(&self, data: InitialAuthenticationData) {
        lock(&self.enrollments).insert(data.profile().id.clone(), data);
    }

    /// Queues a card session script.
    pub fn push_card_session(&self, script: SessionScript) {
        lock(&self.card_sessions).push_back(script);
    }

    /// Sets the secure-element handshake script.
    pub fn set_secure_element(&self, script: SessionScript) {
        *lock(&self.secure_element) = script;
    }

    /// Sets the insurance app behaviour.
    pub fn set_external(&self, script: ExternalScript) {
        *lock(&self.external) = script;
    }

    /// Number of profile classifications served.
    #[must_use]
    pub fn classify_calls(&self) -> usize {
        self.calls.classify.load(Ordering::SeqCst)
    }

    /// Number of card sessions started.
    #[must_use]
    pub fn card_session_calls(&self) -> usize {
        self.calls.card_sessions.load(Ordering::SeqCst)
    }

    /// Number of card session streams not yet dropped.
    #[must_use]
    pub fn open_card_sessions(&self) -> usize {
        self.open_card_sessions.load(Ordering::SeqCst)
    }

    /// Number of secure-element handshakes started.
    #[must_use]
    pub fn secure_element_calls(&self) -> usize {
        self.calls.secure_element.load(Ordering::SeqCst)
    }

    /// Number of app-based flows started.
    #[must_use]
    pub fn external_authentication_calls(&self) -> usize {
        self.calls.external_authentication.load(Ordering::SeqCst)
    }

    /// Number of app redirects processed.
    #[must_use]
    pub fn external_authorization_calls(&self) -> usize {
        self.calls.external_authorization.load(Ordering::SeqCst)
    }

    /// Scope of every card, secure-element and app-based flow, in call order.
    #[must_use]
    pub fn scopes(&self) -> Vec<AuthScope> {
        lock(&self.scopes).clone()
    }

    /// Profiles whose credential was removed.
    #[must_use]
    pub fn removed(&self) -> Vec<ProfileId> {
        lock(&self.removed).clone()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl AuthenticationBridge for ScriptedBridge {
    async fn authenticate_for(
        &self,
        profile_id: &ProfileId,
    ) -> Result<InitialAuthenticationData, BridgeError> {
        self.calls.classify.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        let data = lock(&self.enrollments).get(profile_id).cloned();
        data.ok_or_else(|| BridgeError::not_found(profile_id.as_str()))
    }

    fn do_secure_element_authentication(
        &self,
        profile_id: &ProfileId,
        scope: AuthScope,
    ) -> BoxStream<'static, LowLevelAuthState> {
        self.calls.secure_element.fetch_add(1, Ordering::SeqCst);
        lock(&self.scopes).push(scope);
        tracing::debug!(profile_id = %profile_id, scope = %scope, "Scripted secure element handshake");
        lock(&self.secure_element).clone().play()
    }

    fn do_health_card_authentication(
        &self,
        profile_id: &ProfileId,
        scope: AuthScope,
        _can: &str,
        _pin: &SecretString,
        tag: &NfcTag,
    ) -> BoxStream<'static, LowLevelAuthState> {
        self.calls.card_sessions.fetch_add(1, Ordering::SeqCst);
        lock(&self.scopes).push(scope);
        let script = lock(&self.card_sessions).pop_front().unwrap_or_else(|| {
            SessionScript::new([LowLevelAuthState::HealthCardCommunicationInterrupted])
        });
        tracing::debug!(
            profile_id = %profile_id,
            scope = %scope,
            tag = %tag.uid_hex(),
            "Scripted card session"
        );

        let guard = SessionGuard::open(&self.open_card_sessions);
        script
            .play()
            .map(move |state| {
                let _open = &guard;
                state
            })
            .boxed()
    }

    async fn load_external_authenticators(&self) -> Result<Vec<InsuranceProvider>, BridgeError> {
        self.simulate_latency().await;
        Ok(lock(&self.external).providers.clone())
    }

    async fn do_external_authentication(
        &self,
        profile_id: &ProfileId,
        scope: AuthScope,
        authenticator_id: &str,
        authenticator_name: &str,
    ) -> Result<Url, BridgeError> {
        self.calls.external_authentication.fetch_add(1, Ordering::SeqCst);
        lock(&self.scopes).push(scope);
        tracing::debug!(
            profile_id = %profile_id,
            scope = %scope,
            authenticator = %authenticator_name,
            "Scripted external authentication"
        );
        self.simulate_latency().await;

        let script = lock(&self.external).clone();
        script.authentication.into_result(authenticator_name)?;
        match script.redirect {
            Some(redirect) => Ok(redirect),
            None => Url::parse(&format!(
                "https://{authenticator_id}.insurance.invalid/authorize"
            ))
            .map_err(|e| BridgeError::invalid_redirect(authenticator_name, e.to_string())),
        }
    }

    async fn do_external_authorization(&self, redirect: &Url) -> Result<(), BridgeError> {
        self.calls.external_authorization.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        let outcome = lock(&self.external).authorization.clone();
        outcome.into_result(redirect.host_str().unwrap_or("unknown"))
    }

    async fn do_remove_authentication(&self, profile_id: &ProfileId) -> Result<(), BridgeError> {
        self.simulate_latency().await;
        {
            let mut enrollments = lock(&self.enrollments);
            let Some(current) = enrollments.get(profile_id) else {
                return Err(BridgeError::not_found(profile_id.as_str()));
            };
            let profile = current.profile().clone();
            enrollments.insert(profile_id.clone(), InitialAuthenticationData::None { profile });
        }
        lock(&self.removed).push(profile_id.clone());
        Ok(())
    }
}

/// [`TagSource`] fed by [`ScriptedTagSource::tap`].
///
/// Every call to [`TagSource::tags`] opens its own channel; a tap reaches
/// every reader still open at that moment.
#[derive(Debug)]
pub struct ScriptedTagSource {
    readers: Mutex<Vec<mpsc::UnboundedSender<Result<NfcTag, TagSourceError>>>>,
    nfc_enabled: AtomicBool,
}

impl Default for ScriptedTagSource {
    fn default() -> Self {
        Self {
            readers: Mutex::new(Vec::new()),
            nfc_enabled: AtomicBool::new(true),
        }
    }
}

impl ScriptedTagSource {
    /// Creates a tag source with NFC switched on.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches the simulated NFC interface on or off.
    pub fn set_nfc_enabled(&self, enabled: bool) {
        self.nfc_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Holds `tag` against the device. Returns how many readers saw it.
    pub fn tap(&self, tag: NfcTag) -> usize {
        self.deliver(Ok(tag))
    }

    /// Reports `error` to every open reader.
    pub fn fail(&self, error: TagSourceError) -> usize {
        self.deliver(Err(error))
    }

    /// Number of readers still open.
    #[must_use]
    pub fn readers(&self) -> usize {
        let mut readers = lock(&self.readers);
        readers.retain(|reader| !reader.is_closed());
        readers.len()
    }

    fn deliver(&self, item: Result<NfcTag, TagSourceError>) -> usize {
        let mut readers = lock(&self.readers);
        readers.retain(|reader| reader.send(item.clone()).is_ok());
        readers.len()
    }
}

impl TagSource for ScriptedTagSource {
    fn tags(&self) -> BoxStream<'static, Result<NfcTag, TagSourceError>> {
        if !self.nfc_enabled.load(Ordering::SeqCst) {
            return stream::iter([Err(TagSourceError::NfcDisabled)]).boxed();
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        lock(&self.readers).push(sender);
        stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        })
        .boxed()
    }
}

/// Scripted answer of the biometric ceremony.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CeremonyOutcome {
    /// The user was verified.
    #[default]
    Success,
    /// The user dismissed the ceremony.
    Cancelled,
    /// Verification failed.
    Failed {
        /// Failure description.
        message: String,
    },
    /// No biometric enrolled.
    NotEnrolled,
}

/// Behaviour of a [`ScriptedCeremony`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CeremonyScript {
    /// How the ceremony ends.
    pub outcome: CeremonyOutcome,

    /// Time the user takes.
    #[serde(with = "humantime_serde")]
    pub delay: Option<Duration>,

    /// Never finish, like a user who walked away.
    pub hold_open: bool,
}

/// [`BiometricCeremony`] replaying a [`CeremonyScript`].
#[derive(Debug, Default)]
pub struct ScriptedCeremony {
    script: Mutex<CeremonyScript>,
    calls: AtomicUsize,
}

impl ScriptedCeremony {
    /// Creates a ceremony replaying `script`.
    #[must_use]
    pub fn new(script: CeremonyScript) -> Self {
        Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    /// Replaces the script for the next ceremonies.
    pub fn set_script(&self, script: CeremonyScript) {
        *lock(&self.script) = script;
    }

    /// Number of ceremonies shown.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BiometricCeremony for ScriptedCeremony {
    async fn authenticate(&self, profile: &Profile) -> Result<(), CeremonyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = lock(&self.script).clone();
        tracing::debug!(profile_id = %profile.id, outcome = ?script.outcome, "Scripted biometric ceremony");

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        if script.hold_open {
            future::pending::<()>().await;
        }
        match script.outcome {
            CeremonyOutcome::Success => Ok(()),
            CeremonyOutcome::Cancelled => Err(CeremonyError::Cancelled),
            CeremonyOutcome::Failed { message } => Err(CeremonyError::Failed { message }),
            CeremonyOutcome::NotEnrolled => Err(CeremonyError::NotEnrolled),
        }
    }
}

/// Behaviour of a [`ScriptedLauncher`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherScript {
    /// Whether an app handles the redirect.
    pub launchable: bool,
}

impl Default for LauncherScript {
    fn default() -> Self {
        Self { launchable: true }
    }
}

/// [`AppLauncher`] recording every redirect it was asked to open.
#[derive(Debug)]
pub struct ScriptedLauncher {
    launchable: AtomicBool,
    launched: Mutex<Vec<Url>>,
}

impl Default for ScriptedLauncher {
    fn default() -> Self {
        Self::new(LauncherScript::default())
    }
}

impl ScriptedLauncher {
    /// Creates a launcher following `script`.
    #[must_use]
    pub fn new(script: LauncherScript) -> Self {
        Self {
            launchable: AtomicBool::new(script.launchable),
            launched: Mutex::new(Vec::new()),
        }
    }

    /// Redirects opened so far.
    #[must_use]
    pub fn launched(&self) -> Vec<Url> {
        lock(&self.launched).clone()
    }
}

impl AppLauncher for ScriptedLauncher {
    fn launch(&self, target: &Url) -> bool {
        if !self.launchable.load(Ordering::SeqCst) {
            tracing::debug!(target = %target, "No app handles the redirect");
            return false;
        }
        lock(&self.launched).push(target.clone());
        true
    }
}
