//! Collaborator traits consumed by the prompts.
//!
//! The prompts never talk to hardware or the network themselves. Everything
//! that leaves the process goes through one of these traits:
//!
//! - [`AuthenticationBridge`] - identity provider, card sessions and enrollment lookups
//! - [`TagSource`] - contactless tag discovery
//! - [`BiometricCeremony`] - the platform biometric prompt
//! - [`AppLauncher`] - opening a third-party insurance app
//!
//! [`crate::scripted`] provides in-process implementations for simulation and tests.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use secrecy::SecretString;
use url::Url;

use crate::error::{BridgeError, CeremonyError, TagSourceError};
use crate::types::{
    AuthScope, InitialAuthenticationData, InsuranceProvider, LowLevelAuthState, NfcTag, Profile,
    ProfileId,
};

/// Hardware and identity provider operations behind the prompts.
///
/// Implementations are treated as stateless services: every method may be
/// called concurrently for different profiles. Streams returned by the
/// session methods are dropped as soon as the prompt no longer needs them;
/// dropping must release the underlying card session or network call.
#[async_trait]
pub trait AuthenticationBridge: Send + Sync {
    /// Classifies which authentication method the profile is bound to.
    async fn authenticate_for(
        &self,
        profile_id: &ProfileId,
    ) -> Result<InitialAuthenticationData, BridgeError>;

    /// Runs the secure-element handshake with the identity provider.
    fn do_secure_element_authentication(
        &self,
        profile_id: &ProfileId,
        scope: AuthScope,
    ) -> BoxStream<'static, LowLevelAuthState>;

    /// Runs one card session on a discovered tag.
    fn do_health_card_authentication(
        &self,
        profile_id: &ProfileId,
        scope: AuthScope,
        can: &str,
        pin: &SecretString,
        tag: &NfcTag,
    ) -> BoxStream<'static, LowLevelAuthState>;

    /// Lists the insurance providers offering app-based authentication.
    async fn load_external_authenticators(&self) -> Result<Vec<InsuranceProvider>, BridgeError>;

    /// Starts the app-based flow and returns the redirect into the insurance app.
    async fn do_external_authentication(
        &self,
        profile_id: &ProfileId,
        scope: AuthScope,
        authenticator_id: &str,
        authenticator_name: &str,
    ) -> Result<Url, BridgeError>;

    /// Completes the app-based flow with the redirect the insurance app sent back.
    async fn do_external_authorization(&self, redirect: &Url) -> Result<(), BridgeError>;

    /// Removes the stored credential of a profile.
    async fn do_remove_authentication(&self, profile_id: &ProfileId) -> Result<(), BridgeError>;
}

/// Source of contactless tag discoveries.
pub trait TagSource: Send + Sync {
    /// Opens a stream of discovered tags.
    ///
    /// The stream ends or yields an error when the interface becomes unusable.
    fn tags(&self) -> BoxStream<'static, Result<NfcTag, TagSourceError>>;
}

/// Platform biometric prompt guarding the secure-element key.
#[async_trait]
pub trait BiometricCeremony: Send + Sync {
    /// Asks the user to unlock the key of `profile`.
    ///
    /// Dropping the returned future dismisses the prompt.
    async fn authenticate(&self, profile: &Profile) -> Result<(), CeremonyError>;
}

/// Opens third-party insurance apps.
pub trait AppLauncher: Send + Sync {
    /// Opens `target`; returns `false` if no app could handle it.
    fn launch(&self, target: &Url) -> bool;
}
