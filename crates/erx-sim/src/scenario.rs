//! Scenario model and replay.
//!
//! A scenario names the profile to authenticate, scripts every collaborator
//! and lists the user steps to perform while the attempt runs:
//!
//! ```toml
//! [scenario]
//! profile_id = "card-user"
//! expect = "authenticated"
//!
//! [[scenario.steps]]
//! action = "enter_pin"
//! pin = "123456"
//!
//! [[scenario.steps]]
//! action = "tap"
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use erx_auth::prelude::*;
use erx_auth::scripted::{
    BridgeScript, CeremonyScript, LauncherScript, ScriptedBridge, ScriptedCeremony,
    ScriptedLauncher, ScriptedTagSource,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use tokio::time::timeout;
use url::Url;

/// Tag used by `tap` steps that do not name one.
const DEFAULT_TAG_UID: [u8; 7] = [0x04, 0x5a, 0x11, 0xc2, 0x3e, 0x6f, 0x80];

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Scenario {
    /// Shown in the run header.
    pub name: String,
    pub profile_id: ProfileId,
    pub scope: AuthScope,
    /// Result the run must end with.
    pub expect: Option<AuthResult>,
    /// Upper bound for every step and for the final result.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub bridge: BridgeScript,
    pub ceremony: CeremonyScript,
    pub launcher: LauncherScript,
    pub steps: Vec<Step>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            name: String::new(),
            profile_id: ProfileId::new(""),
            scope: AuthScope::Prescriptions,
            expect: None,
            timeout: Duration::from_secs(10),
            bridge: BridgeScript::default(),
            ceremony: CeremonyScript::default(),
            launcher: LauncherScript::default(),
            steps: Vec::new(),
        }
    }
}

impl Scenario {
    pub fn validate(&self) -> Result<(), String> {
        if self.profile_id.as_str().trim().is_empty() {
            return Err("scenario.profile_id must be set".into());
        }
        if self.timeout.is_zero() {
            return Err("scenario.timeout must be > 0".into());
        }
        Ok(())
    }
}

/// One user or platform action.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Do nothing for a while.
    Wait {
        #[serde(with = "humantime_serde")]
        duration: Duration,
    },
    /// Enter the health card PIN.
    EnterPin { pin: String },
    /// Hold a card against the device once the prompt searches for one.
    Tap {
        #[serde(default)]
        tag: Option<NfcTag>,
    },
    /// Switch NFC on or off.
    SetNfc { enabled: bool },
    /// Confirm the insurance app.
    SelectInsurance,
    /// Return from the insurance app once it was launched.
    Redirect { url: Url },
    /// Cancel every prompt, including the insurance app.
    Cancel,
    /// Cancel the secure-element and health card prompts.
    CancelAll,
}

/// A state change observed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub prompt: &'static str,
    pub state: String,
}

impl Transition {
    fn new(prompt: &'static str, state: impl ToString) -> Self {
        Self {
            prompt,
            state: state.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub result: Option<AuthResult>,
    pub transitions: Vec<Transition>,
    pub show_error: Option<SecureElementError>,
    pub launched: Vec<Url>,
}

/// Scripted collaborators wired into an [`Authenticator`].
pub struct Simulation {
    tags: Arc<ScriptedTagSource>,
    launcher: Arc<ScriptedLauncher>,
    authenticator: Authenticator,
}

impl Simulation {
    pub fn new(scenario: &Scenario, config: &AuthenticatorConfig) -> Result<Self> {
        let bridge = Arc::new(ScriptedBridge::from_script(scenario.bridge.clone()));
        let tags = Arc::new(ScriptedTagSource::new());
        let ceremony = Arc::new(ScriptedCeremony::new(scenario.ceremony.clone()));
        let launcher = Arc::new(ScriptedLauncher::new(scenario.launcher.clone()));
        let authenticator = Authenticator::with_collaborators(
            bridge,
            tags.clone(),
            ceremony,
            launcher.clone(),
            config,
        )
        .context("failed to build authenticator")?;

        Ok(Self {
            tags,
            launcher,
            authenticator,
        })
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    /// Runs `scenario` and reports every transition through `on_transition` as it happens.
    pub async fn run<F>(&self, scenario: &Scenario, on_transition: F) -> Result<Report>
    where
        F: Fn(&Transition) + Send + Sync + 'static,
    {
        let receivers = Receivers {
            health_card: self.authenticator.health_card().subscribe(),
            secure_element: self.authenticator.secure_element().subscribe(),
            external: self.authenticator.external().subscribe(),
        };
        let (stop, stopped) = oneshot::channel();
        let recorder = tokio::spawn(record(receivers, stopped, on_transition));

        let stream = match scenario.scope {
            AuthScope::Prescriptions => self
                .authenticator
                .authenticate_for_prescriptions(&scenario.profile_id),
            AuthScope::PairedDevices => self
                .authenticator
                .authenticate_for_paired_devices(&scenario.profile_id),
        };
        let mut attempt = tokio::spawn(stream.collect::<Vec<_>>());
        tracing::info!(profile_id = %scenario.profile_id, scope = %scenario.scope, "Authentication started");

        for (index, step) in scenario.steps.iter().enumerate() {
            tracing::debug!(step = index + 1, ?step, "Running step");
            let applied = match timeout(scenario.timeout, self.apply(step)).await {
                Ok(applied) => applied,
                Err(_) => Err(anyhow::anyhow!("timed out after {:?}", scenario.timeout)),
            };
            if let Err(e) = applied {
                attempt.abort();
                recorder.abort();
                return Err(e.context(format!("step {} ({step:?}) failed", index + 1)));
            }
        }

        let results = match timeout(scenario.timeout, &mut attempt).await {
            Ok(joined) => joined.context("authentication task failed")?,
            Err(_) => {
                attempt.abort();
                recorder.abort();
                anyhow::bail!(
                    "authentication did not finish within {:?}",
                    scenario.timeout
                );
            }
        };

        let _ = stop.send(());
        let transitions = recorder.await.context("transition recorder failed")?;

        Ok(Report {
            result: results.into_iter().next(),
            transitions,
            show_error: self.authenticator.secure_element().show_error(),
            launched: self.launcher.launched(),
        })
    }

    async fn apply(&self, step: &Step) -> Result<()> {
        match step {
            Step::Wait { duration } => tokio::time::sleep(*duration).await,
            Step::EnterPin { pin } => {
                let prompt = self.authenticator.health_card();
                prompt.on_credentials_entered(pin.as_str()).await?;
                // Settled once the prompt listens for a card or refused to
                prompt
                    .watch_state()
                    .wait_for(|s| {
                        matches!(
                            s,
                            HealthCardState::Searching
                                | HealthCardState::Reading(_)
                                | HealthCardState::Error(
                                    HealthCardError::NfcDisabled
                                        | HealthCardError::HealthCardBlocked
                                )
                        )
                    })
                    .await
                    .map(|_| ())
                    .context("health card prompt is gone")?;
            }
            Step::Tap { tag } => {
                let mut state = self.authenticator.health_card().watch_state();
                let searching = state
                    .wait_for(|s| {
                        matches!(
                            s,
                            HealthCardState::Searching
                                | HealthCardState::Reading(_)
                                | HealthCardState::Error(_)
                        )
                    })
                    .await
                    .map(|_| ());
                searching.context("health card prompt is gone")?;

                let tag = tag
                    .clone()
                    .unwrap_or_else(|| NfcTag::new(DEFAULT_TAG_UID.to_vec()));
                if self.tags.tap(tag.clone()) == 0 {
                    tracing::warn!(tag = %tag.uid_hex(), "No reader saw the tag");
                }
            }
            Step::SetNfc { enabled } => self.tags.set_nfc_enabled(*enabled),
            Step::SelectInsurance => {
                self.authenticator.external().on_insurance_selected().await?;
            }
            Step::Redirect { url } => {
                let mut state = self.authenticator.external().watch_state();
                state
                    .wait_for(|s| matches!(s, ExternalState::AwaitingAuthorization { .. }))
                    .await
                    .map(|_| ())
                    .context("insurance app was never launched")?;
                self.authenticator
                    .external()
                    .on_authorization_redirect(url.clone())
                    .await?;
            }
            Step::Cancel => {
                self.authenticator.cancel_all_authentications().await;
                self.authenticator.external().cancel_authentication().await;
            }
            Step::CancelAll => self.authenticator.cancel_all_authentications().await,
        }
        Ok(())
    }
}

struct Receivers {
    health_card: broadcast::Receiver<HealthCardState>,
    secure_element: broadcast::Receiver<SecureElementState>,
    external: broadcast::Receiver<ExternalState>,
}

async fn record<F>(
    mut receivers: Receivers,
    mut stopped: oneshot::Receiver<()>,
    on_transition: F,
) -> Vec<Transition>
where
    F: Fn(&Transition) + Send + Sync + 'static,
{
    let mut transitions = Vec::new();
    let mut push = |transition: Transition| {
        on_transition(&transition);
        transitions.push(transition);
    };

    loop {
        let transition = tokio::select! {
            _ = &mut stopped => break,
            Ok(state) = receivers.health_card.recv() => Transition::new("health card", state),
            Ok(state) = receivers.secure_element.recv() => Transition::new("secure element", state),
            Ok(state) = receivers.external.recv() => Transition::new("external", state),
        };
        push(transition);
    }

    // Whatever was published before the stop signal
    while let Ok(state) = receivers.health_card.try_recv() {
        push(Transition::new("health card", state));
    }
    while let Ok(state) = receivers.secure_element.try_recv() {
        push(Transition::new("secure element", state));
    }
    while let Ok(state) = receivers.external.try_recv() {
        push(Transition::new("external", state));
    }

    transitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_parse_from_toml_values() {
        #[derive(Deserialize)]
        struct Steps {
            steps: Vec<Step>,
        }

        let parsed: Steps = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [[steps]]
                action = "enter_pin"
                pin = "123456"

                [[steps]]
                action = "wait"
                duration = "250ms"

                [[steps]]
                action = "tap"
                tag = "04a1ff"

                [[steps]]
                action = "cancel_all"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(
            parsed.steps,
            vec![
                Step::EnterPin {
                    pin: "123456".to_string()
                },
                Step::Wait {
                    duration: Duration::from_millis(250)
                },
                Step::Tap {
                    tag: Some(NfcTag::new(vec![0x04, 0xa1, 0xff]))
                },
                Step::CancelAll,
            ]
        );
    }

    #[test]
    fn test_scenario_validation() {
        let mut scenario = Scenario::default();
        assert!(scenario.validate().is_err());

        scenario.profile_id = ProfileId::from("p-1");
        assert!(scenario.validate().is_ok());

        scenario.timeout = Duration::ZERO;
        assert!(scenario.validate().is_err());
    }
}
