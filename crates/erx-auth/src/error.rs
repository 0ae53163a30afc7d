//! Error types for the authentication prompts and their collaborators.
//!
//! Nothing in this module ever reaches a caller of
//! [`PromptAuthenticator::authenticate`](crate::prompt::PromptAuthenticator::authenticate):
//! the prompts classify every failure into an
//! [`AuthResult`](crate::types::AuthResult) or an observable state. The error
//! types here describe the boundaries around that contract: the bridge, the
//! platform collaborators and the UI-facing request API.

use std::fmt;

/// Errors reported by an [`AuthenticationBridge`](crate::bridge::AuthenticationBridge).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The identity provider could not be reached or timed out.
    #[error("Network error: {message}")]
    Network {
        /// Description of the network failure.
        message: String,
    },

    /// The insurance provider answered with a redirect that cannot be used.
    #[error("Invalid redirect from {provider}: {message}")]
    InvalidRedirect {
        /// The insurance provider that produced the redirect.
        provider: String,
        /// Description of what is wrong with the redirect.
        message: String,
    },

    /// The identity provider or insurance provider rejected the request.
    #[error("Provider error: {provider} - {message}")]
    Provider {
        /// The provider name.
        provider: String,
        /// Description of the error.
        message: String,
    },

    /// The profile is unknown to the bridge.
    #[error("Profile not found: {profile_id}")]
    NotFound {
        /// The profile that could not be resolved.
        profile_id: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl BridgeError {
    /// Creates a new `Network` error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRedirect` error.
    #[must_use]
    pub fn invalid_redirect(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRedirect {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Provider` error.
    #[must_use]
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(profile_id: impl Into<String>) -> Self {
        Self::NotFound {
            profile_id: profile_id.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if the provider produced a malformed redirect.
    ///
    /// These surface as [`AuthResult::RedirectLinkNotRight`](crate::types::AuthResult::RedirectLinkNotRight)
    /// instead of a plain cancellation.
    #[must_use]
    pub fn is_redirect_format_error(&self) -> bool {
        matches!(self, Self::InvalidRedirect { .. })
    }
}

/// Errors reported by a [`TagSource`](crate::bridge::TagSource).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagSourceError {
    /// The contactless interface is switched off.
    #[error("NFC is disabled")]
    NfcDisabled,

    /// The contactless interface is missing or busy.
    #[error("NFC unavailable: {message}")]
    Unavailable {
        /// Description of why tags cannot be read.
        message: String,
    },
}

/// Errors reported by a [`BiometricCeremony`](crate::bridge::BiometricCeremony).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CeremonyError {
    /// The user dismissed the ceremony.
    #[error("Biometric ceremony cancelled")]
    Cancelled,

    /// The ceremony ran but did not verify the user.
    #[error("Biometric ceremony failed: {message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },

    /// No biometric is enrolled on this device.
    #[error("No biometric enrolled")]
    NotEnrolled,
}

/// Errors returned by the UI-facing request API and the orchestrator passthroughs.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The entered PIN does not have the expected shape.
    #[error("Invalid PIN: expected {min} to {max} digits")]
    InvalidPin {
        /// Minimum accepted PIN length.
        min: usize,
        /// Maximum accepted PIN length.
        max: usize,
    },

    /// The request could not be handed to an active attempt.
    #[error("Request not delivered to the {prompt} prompt")]
    RequestNotDelivered {
        /// The prompt that should have received the request.
        prompt: &'static str,
    },

    /// A bridge operation failed.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl AuthError {
    /// Creates a new `RequestNotDelivered` error.
    #[must_use]
    pub fn request_not_delivered(prompt: &'static str) -> Self {
        Self::RequestNotDelivered { prompt }
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidPin { .. } => ErrorCategory::Validation,
            Self::RequestNotDelivered { .. } => ErrorCategory::Protocol,
            Self::Bridge(BridgeError::InvalidRedirect { .. }) => ErrorCategory::Protocol,
            Self::Bridge(BridgeError::Network { .. } | BridgeError::Provider { .. }) => {
                ErrorCategory::Remote
            }
            Self::Bridge(BridgeError::NotFound { .. }) => ErrorCategory::Configuration,
            Self::Bridge(BridgeError::Internal { .. }) => ErrorCategory::Internal,
        }
    }
}

/// Categories of authentication errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Input rejected before it reached a prompt.
    Validation,
    /// Request routing or redirect shape problems.
    Protocol,
    /// Identity provider or insurance provider failures.
    Remote,
    /// Enrollment or configuration problems.
    Configuration,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Protocol => write!(f, "protocol"),
            Self::Remote => write!(f, "remote"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
