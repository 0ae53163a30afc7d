//! Insurance app prompt: redirect into a third-party app and back.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use url::Url;

use crate::ErxResult;
use crate::bridge::{AppLauncher, AuthenticationBridge};
use crate::config::{AuthenticatorConfig, ConfigError};
use crate::error::BridgeError;
use crate::prompt::{
    AttemptHandle, AuthStream, Latest, PromptAuthenticator, PromptCore, Signal, attempt_stream,
};
use crate::types::{AuthResult, AuthScope, InitialAuthenticationData, Profile, ProfileId};

/// Observable state of the insurance app prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExternalState {
    /// No attempt running.
    #[default]
    None,
    /// Waiting for the user to confirm the insurance app.
    SelectInsurance {
        /// Display name of the insurance provider.
        authenticator_name: String,
    },
    /// The insurance app was opened; waiting for it to redirect back.
    AwaitingAuthorization {
        /// Display name of the insurance provider.
        authenticator_name: String,
    },
}

impl fmt::Display for ExternalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::SelectInsurance { authenticator_name } => {
                write!(f, "select insurance ({authenticator_name})")
            }
            Self::AwaitingAuthorization { authenticator_name } => {
                write!(f, "awaiting authorization ({authenticator_name})")
            }
        }
    }
}

#[derive(Debug)]
enum ExternalRequest {
    InsuranceSelected,
    AuthorizationRedirect(Url),
}

/// Prompt authenticating through an insurance provider's app.
#[derive(Clone)]
pub struct ExternalPromptAuthenticator {
    inner: Arc<Inner>,
}

struct Inner {
    core: Arc<PromptCore<ExternalRequest, ExternalState>>,
    bridge: Arc<dyn AuthenticationBridge>,
    launcher: Arc<dyn AppLauncher>,
}

impl ExternalPromptAuthenticator {
    /// Creates the prompt.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `config` does not validate.
    pub fn new(
        bridge: Arc<dyn AuthenticationBridge>,
        launcher: Arc<dyn AppLauncher>,
        config: &AuthenticatorConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                core: PromptCore::new("external", config.transition_capacity),
                bridge,
                launcher,
            }),
        })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ExternalState {
        self.inner.core.state()
    }

    /// Receiver always holding the latest state.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ExternalState> {
        self.inner.core.watch_state()
    }

    /// Receiver of every state transition.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ExternalState> {
        self.inner.core.subscribe()
    }

    /// Profile of the running attempt.
    #[must_use]
    pub fn profile(&self) -> Option<Profile> {
        self.inner.core.profile()
    }

    /// Confirms the insurance app. Waits until an attempt listens and its
    /// request slot is free; returns once the request is queued.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::RequestNotDelivered` if the request could not be handed over.
    pub async fn on_insurance_selected(&self) -> ErxResult<()> {
        self.inner.core.send(ExternalRequest::InsuranceSelected).await
    }

    /// Queues the redirect the insurance app sent back.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::RequestNotDelivered` if the request could not be handed over.
    pub async fn on_authorization_redirect(&self, redirect: Url) -> ErxResult<()> {
        self.inner
            .core
            .send(ExternalRequest::AuthorizationRedirect(redirect))
            .await
    }

    /// Asks the running attempt to stop. Waits until an attempt listens.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::RequestNotDelivered` if the request could not be handed over.
    pub async fn on_cancel(&self) -> ErxResult<()> {
        self.inner.core.cancel_when_listening().await
    }
}

#[async_trait]
impl PromptAuthenticator for ExternalPromptAuthenticator {
    fn authenticate(&self, profile_id: &ProfileId, scope: AuthScope) -> AuthStream {
        let inner = Arc::clone(&self.inner);
        let profile_id = profile_id.clone();
        attempt_stream(async move { inner.run(profile_id, scope).await })
    }

    async fn cancel_authentication(&self) {
        if self.inner.core.cancel() {
            tracing::debug!("External cancellation requested");
        }
    }
}

fn classify(error: &BridgeError) -> AuthResult {
    if error.is_redirect_format_error() {
        AuthResult::RedirectLinkNotRight
    } else {
        AuthResult::Cancelled
    }
}

impl Inner {
    async fn run(self: Arc<Self>, profile_id: ProfileId, scope: AuthScope) -> Option<AuthResult> {
        let mut attempt = self.core.begin();

        let (authenticator_id, authenticator_name, profile) =
            match self.bridge.authenticate_for(&profile_id).await {
                Ok(InitialAuthenticationData::External {
                    authenticator_id,
                    authenticator_name,
                    profile,
                }) => (authenticator_id, authenticator_name, profile),
                Ok(other) => {
                    tracing::debug!(
                        profile_id = %profile_id,
                        method = other.method(),
                        "Profile is not bound to an insurance app"
                    );
                    return Some(AuthResult::Cancelled);
                }
                Err(e) => {
                    tracing::warn!(profile_id = %profile_id, error = %e, "Failed to classify profile");
                    return Some(AuthResult::Cancelled);
                }
            };

        attempt.set_profile(profile);
        attempt.set_state(ExternalState::SelectInsurance {
            authenticator_name: authenticator_name.clone(),
        });

        let mut step: Latest<Option<AuthResult>> = Latest::new();
        loop {
            tokio::select! {
                signal = attempt.next_signal() => match signal {
                    Signal::Request(ExternalRequest::InsuranceSelected) => {
                        if step.cancel() {
                            tracing::debug!(profile_id = %profile_id, "Dropping previous insurance app request");
                        }
                        attempt.set_state(ExternalState::SelectInsurance {
                            authenticator_name: authenticator_name.clone(),
                        });
                        let launch = Arc::clone(&self).launch(
                            attempt.handle(),
                            profile_id.clone(),
                            scope,
                            authenticator_id.clone(),
                            authenticator_name.clone(),
                        );
                        step.replace(launch);
                    }
                    Signal::Request(ExternalRequest::AuthorizationRedirect(redirect)) => {
                        if !matches!(attempt.state(), ExternalState::AwaitingAuthorization { .. }) {
                            tracing::warn!(profile_id = %profile_id, "Ignoring redirect, insurance app was not opened");
                            continue;
                        }
                        step.replace(Arc::clone(&self).authorize(profile_id.clone(), redirect));
                    }
                    Signal::Cancel => {
                        step.cancel();
                        tracing::info!(profile_id = %profile_id, "External authentication cancelled");
                        return Some(AuthResult::Cancelled);
                    }
                    Signal::Superseded => {
                        tracing::debug!(profile_id = %profile_id, "External attempt superseded");
                        return Some(AuthResult::Cancelled);
                    }
                },
                outcome = step.finished(), if step.is_running() => {
                    if let Some(result) = outcome {
                        tracing::info!(profile_id = %profile_id, scope = %scope, result = %result, "External authentication finished");
                        return Some(result);
                    }
                }
            }
        }
    }

    /// Requests the redirect and opens the insurance app.
    ///
    /// Resolves `None` once the app is open and the attempt waits for its answer.
    async fn launch(
        self: Arc<Self>,
        handle: AttemptHandle<ExternalRequest, ExternalState>,
        profile_id: ProfileId,
        scope: AuthScope,
        authenticator_id: String,
        authenticator_name: String,
    ) -> Option<AuthResult> {
        let redirect = match self
            .bridge
            .do_external_authentication(&profile_id, scope, &authenticator_id, &authenticator_name)
            .await
        {
            Ok(redirect) => redirect,
            Err(e) => {
                tracing::warn!(
                    profile_id = %profile_id,
                    authenticator = %authenticator_name,
                    error = %e,
                    "External authentication failed"
                );
                return Some(classify(&e));
            }
        };

        if !self.launcher.launch(&redirect) {
            tracing::warn!(
                profile_id = %profile_id,
                authenticator = %authenticator_name,
                "Insurance app could not be opened"
            );
            return Some(AuthResult::Cancelled);
        }

        tracing::debug!(profile_id = %profile_id, authenticator = %authenticator_name, "Insurance app opened");
        handle.set_state(ExternalState::AwaitingAuthorization { authenticator_name });
        None
    }

    async fn authorize(self: Arc<Self>, profile_id: ProfileId, redirect: Url) -> Option<AuthResult> {
        match self.bridge.do_external_authorization(&redirect).await {
            Ok(()) => Some(AuthResult::Authenticated),
            Err(e) => {
                tracing::warn!(profile_id = %profile_id, error = %e, "External authorization failed");
                Some(classify(&e))
            }
        }
    }
}
