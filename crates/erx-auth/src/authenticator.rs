//! Orchestrator dispatching a profile to the prompt of its credential.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};

use crate::ErxResult;
use crate::biometric::BiometricPromptAuthenticator;
use crate::bridge::{AppLauncher, AuthenticationBridge, BiometricCeremony, TagSource};
use crate::config::{AuthenticatorConfig, ConfigError};
use crate::external::ExternalPromptAuthenticator;
use crate::health_card::HealthCardPromptAuthenticator;
use crate::prompt::{AuthStream, PromptAuthenticator};
use crate::types::{AuthResult, AuthScope, InitialAuthenticationData, InsuranceProvider, ProfileId};

/// Entry point for authenticating a profile.
///
/// Holds one prompt per strategy and asks the bridge which one a profile
/// needs. Apart from the prompts and the bridge it keeps no state.
#[derive(Clone)]
pub struct Authenticator {
    secure_element: BiometricPromptAuthenticator,
    health_card: HealthCardPromptAuthenticator,
    external: ExternalPromptAuthenticator,
    bridge: Arc<dyn AuthenticationBridge>,
}

impl Authenticator {
    /// Creates an orchestrator from existing prompts.
    #[must_use]
    pub fn new(
        secure_element: BiometricPromptAuthenticator,
        health_card: HealthCardPromptAuthenticator,
        external: ExternalPromptAuthenticator,
        bridge: Arc<dyn AuthenticationBridge>,
    ) -> Self {
        Self {
            secure_element,
            health_card,
            external,
            bridge,
        }
    }

    /// Creates the three prompts over shared collaborators.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `config` does not validate.
    pub fn with_collaborators(
        bridge: Arc<dyn AuthenticationBridge>,
        tag_source: Arc<dyn TagSource>,
        ceremony: Arc<dyn BiometricCeremony>,
        launcher: Arc<dyn AppLauncher>,
        config: &AuthenticatorConfig,
    ) -> Result<Self, ConfigError> {
        let secure_element =
            BiometricPromptAuthenticator::new(Arc::clone(&bridge), ceremony, config)?;
        let health_card =
            HealthCardPromptAuthenticator::new(Arc::clone(&bridge), tag_source, config)?;
        let external = ExternalPromptAuthenticator::new(Arc::clone(&bridge), launcher, config)?;
        Ok(Self::new(secure_element, health_card, external, bridge))
    }

    /// Authenticates `profile_id` for fetching and redeeming prescriptions.
    #[must_use]
    pub fn authenticate_for_prescriptions(&self, profile_id: &ProfileId) -> AuthStream {
        self.authenticate(profile_id, AuthScope::Prescriptions)
    }

    /// Authenticates `profile_id` for managing paired devices.
    #[must_use]
    pub fn authenticate_for_paired_devices(&self, profile_id: &ProfileId) -> AuthStream {
        self.authenticate(profile_id, AuthScope::PairedDevices)
    }

    fn authenticate(&self, profile_id: &ProfileId, scope: AuthScope) -> AuthStream {
        let this = self.clone();
        let profile_id = profile_id.clone();
        stream::once(async move { this.dispatch(profile_id, scope).await })
            .flatten()
            .boxed()
    }

    async fn dispatch(self, profile_id: ProfileId, scope: AuthScope) -> AuthStream {
        let data = match self.bridge.authenticate_for(&profile_id).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(profile_id = %profile_id, error = %e, "Failed to classify profile");
                return stream::iter([AuthResult::Cancelled]).boxed();
            }
        };

        tracing::debug!(
            profile_id = %profile_id,
            scope = %scope,
            method = data.method(),
            "Dispatching authentication"
        );
        match data {
            InitialAuthenticationData::None { .. } => {
                tracing::info!(profile_id = %profile_id, "Profile has no credential enrolled");
                stream::iter([AuthResult::NoneEnrolled]).boxed()
            }
            InitialAuthenticationData::HealthCard { .. } => {
                self.health_card.authenticate(&profile_id, scope)
            }
            InitialAuthenticationData::SecureElement { .. } => {
                self.secure_element.authenticate(&profile_id, scope)
            }
            InitialAuthenticationData::External { .. } => {
                self.external.authenticate(&profile_id, scope)
            }
        }
    }

    /// Cancels the secure-element and health card prompts.
    ///
    /// The insurance app prompt keeps running: its attempt completes when
    /// the user returns from the app.
    pub async fn cancel_all_authentications(&self) {
        tokio::join!(
            self.secure_element.cancel_authentication(),
            self.health_card.cancel_authentication(),
        );
    }

    /// Lists the insurance providers offering app-based authentication.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Bridge` if the directory could not be loaded.
    pub async fn external_authenticators(&self) -> ErxResult<Vec<InsuranceProvider>> {
        Ok(self.bridge.load_external_authenticators().await?)
    }

    /// Removes the stored credential of `profile_id`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Bridge` if the bridge refused.
    pub async fn remove_authentication(&self, profile_id: &ProfileId) -> ErxResult<()> {
        self.bridge.do_remove_authentication(profile_id).await?;
        tracing::info!(profile_id = %profile_id, "Authentication removed");
        Ok(())
    }

    /// The secure-element prompt.
    #[must_use]
    pub fn secure_element(&self) -> &BiometricPromptAuthenticator {
        &self.secure_element
    }

    /// The health card prompt.
    #[must_use]
    pub fn health_card(&self) -> &HealthCardPromptAuthenticator {
        &self.health_card
    }

    /// The insurance app prompt.
    #[must_use]
    pub fn external(&self) -> &ExternalPromptAuthenticator {
        &self.external
    }
}
