//! # erx-auth
//!
//! Authentication orchestration for the e-prescription client.
//!
//! This crate provides:
//! - One prompt per credential type (health card, device key, insurance app)
//! - A uniform, cancellable `authenticate` contract across all prompts
//! - An orchestrator dispatching a profile to the prompt it is bound to
//! - Scripted collaborators for simulation and tests
//!
//! ## Overview
//!
//! Each prompt runs one attempt at a time and exposes its progress as an
//! observable state. The UI drives an attempt by sending step requests
//! (credentials entered, insurance selected, cancel). Every attempt ends in
//! exactly one [`AuthResult`]; failures are classified, never propagated.
//!
//! ## Modules
//!
//! - [`config`] - Prompt configuration
//! - [`error`] - Error types of the collaborators and the request API
//! - [`types`] - Profiles, scopes, results and the bridge vocabulary
//! - [`bridge`] - Traits for the identity provider and platform collaborators
//! - [`prompt`] - The prompt capability shared by all strategies
//! - [`health_card`] - Health card and PIN
//! - [`biometric`] - Device-bound key unlocked by biometrics
//! - [`external`] - Third-party insurance app
//! - [`authenticator`] - Orchestrator
//! - [`scripted`] - In-process collaborators replaying scripts

pub mod authenticator;
pub mod biometric;
pub mod bridge;
pub mod config;
pub mod error;
pub mod external;
pub mod health_card;
pub mod prompt;
pub mod scripted;
pub mod types;

pub use authenticator::Authenticator;
pub use biometric::{BiometricPromptAuthenticator, SecureElementError, SecureElementState};
pub use bridge::{AppLauncher, AuthenticationBridge, BiometricCeremony, TagSource};
pub use config::{AuthenticatorConfig, ConfigError, HealthCardConfig};
pub use error::{AuthError, BridgeError, CeremonyError, ErrorCategory, TagSourceError};
pub use external::{ExternalPromptAuthenticator, ExternalState};
pub use health_card::{
    HealthCardError, HealthCardPromptAuthenticator, HealthCardState, ReadingProgress,
};
pub use prompt::{AuthStream, PromptAuthenticator};
pub use types::{
    AuthResult, AuthScope, InitialAuthenticationData, InsuranceProvider, LowLevelAuthState,
    NfcTag, Profile, ProfileId,
};

/// Type alias for results of the request API.
pub type ErxResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use erx_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::ErxResult;
    pub use crate::authenticator::Authenticator;
    pub use crate::biometric::{
        BiometricPromptAuthenticator, SecureElementError, SecureElementState,
    };
    pub use crate::bridge::{AppLauncher, AuthenticationBridge, BiometricCeremony, TagSource};
    pub use crate::config::{AuthenticatorConfig, ConfigError, HealthCardConfig};
    pub use crate::error::{AuthError, BridgeError, CeremonyError, ErrorCategory, TagSourceError};
    pub use crate::external::{ExternalPromptAuthenticator, ExternalState};
    pub use crate::health_card::{
        HealthCardError, HealthCardPromptAuthenticator, HealthCardState, ReadingProgress,
    };
    pub use crate::prompt::{AuthStream, PromptAuthenticator};
    pub use crate::types::{
        AuthResult, AuthScope, InitialAuthenticationData, InsuranceProvider, LowLevelAuthState,
        NfcTag, Profile, ProfileId,
    };
}
