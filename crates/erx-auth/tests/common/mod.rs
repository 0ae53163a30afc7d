#![allow(dead_code)]

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use erx_auth::prelude::*;
use erx_auth::scripted::{
    CeremonyScript, LauncherScript, ScriptedBridge, ScriptedCeremony, ScriptedLauncher,
    ScriptedTagSource,
};
use futures_util::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub const CARD_USER: &str = "card-user";
pub const DEVICE_USER: &str = "device-user";
pub const APP_USER: &str = "app-user";
pub const NEW_USER: &str = "new-user";

pub const CAN: &str = "123123";
pub const PIN: &str = "123456";

pub fn card_enrollment() -> InitialAuthenticationData {
    InitialAuthenticationData::HealthCard {
        can: CAN.to_string(),
        profile: Profile::new(CARD_USER, "Ada Lovelace").with_insurance_identifier("X110411675"),
    }
}

pub fn device_enrollment() -> InitialAuthenticationData {
    InitialAuthenticationData::SecureElement {
        profile: Profile::new(DEVICE_USER, "Grace Hopper"),
    }
}

pub fn app_enrollment() -> InitialAuthenticationData {
    InitialAuthenticationData::External {
        authenticator_id: "101575519".to_string(),
        authenticator_name: "Gesund KK".to_string(),
        profile: Profile::new(APP_USER, "Alan Turing"),
    }
}

pub fn unenrolled() -> InitialAuthenticationData {
    InitialAuthenticationData::None {
        profile: Profile::new(NEW_USER, "Edsger Dijkstra"),
    }
}

pub fn tag() -> NfcTag {
    NfcTag::new(vec![0x04, 0x5a, 0x11, 0xc2])
}

/// An orchestrator wired to scripted collaborators.
pub struct Harness {
    pub bridge: Arc<ScriptedBridge>,
    pub tags: Arc<ScriptedTagSource>,
    pub ceremony: Arc<ScriptedCeremony>,
    pub launcher: Arc<ScriptedLauncher>,
    pub authenticator: Authenticator,
}

impl Harness {
    pub fn new(bridge: ScriptedBridge) -> Self {
        Self::with_parts(bridge, CeremonyScript::default(), LauncherScript::default())
    }

    pub fn with_parts(
        bridge: ScriptedBridge,
        ceremony: CeremonyScript,
        launcher: LauncherScript,
    ) -> Self {
        let bridge = Arc::new(bridge);
        let tags = Arc::new(ScriptedTagSource::new());
        let ceremony = Arc::new(ScriptedCeremony::new(ceremony));
        let launcher = Arc::new(ScriptedLauncher::new(launcher));
        let authenticator = Authenticator::with_collaborators(
            bridge.clone(),
            tags.clone(),
            ceremony.clone(),
            launcher.clone(),
            &AuthenticatorConfig::default(),
        )
        .expect("default config is valid");

        Self {
            bridge,
            tags,
            ceremony,
            launcher,
            authenticator,
        }
    }

    pub fn health_card(&self) -> &HealthCardPromptAuthenticator {
        self.authenticator.health_card()
    }

    pub fn secure_element(&self) -> &BiometricPromptAuthenticator {
        self.authenticator.secure_element()
    }

    pub fn external(&self) -> &ExternalPromptAuthenticator {
        self.authenticator.external()
    }

    pub fn start(&self, profile_id: &str) -> JoinHandle<Vec<AuthResult>> {
        spawn_attempt(
            self.authenticator
                .authenticate_for_prescriptions(&ProfileId::from(profile_id)),
        )
    }
}

pub fn spawn_attempt(stream: AuthStream) -> JoinHandle<Vec<AuthResult>> {
    tokio::spawn(stream.collect::<Vec<_>>())
}

pub async fn finish(attempt: JoinHandle<Vec<AuthResult>>) -> Vec<AuthResult> {
    timeout(TIMEOUT, attempt)
        .await
        .expect("attempt timed out")
        .expect("attempt panicked")
}

pub async fn next_transition<S: Clone + Debug>(transitions: &mut broadcast::Receiver<S>) -> S {
    timeout(TIMEOUT, transitions.recv())
        .await
        .expect("timed out waiting for a transition")
        .expect("transition channel closed")
}

pub async fn expect_transitions<S: Clone + Debug + PartialEq>(
    transitions: &mut broadcast::Receiver<S>,
    expected: &[S],
) {
    for want in expected {
        let got = next_transition(transitions).await;
        assert_eq!(&got, want);
    }
}

pub async fn wait_for_state<S>(state: &mut watch::Receiver<S>, mut f: impl FnMut(&S) -> bool) {
    timeout(TIMEOUT, state.wait_for(|s| f(s)))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

/// Lets spawned tasks process what was just sent.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
