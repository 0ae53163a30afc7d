//! Shared types for the authentication prompts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a user profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(String);

impl ProfileId {
    /// Creates a new profile identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProfileId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ProfileId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Token privilege requested from the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScope {
    /// Fetch and redeem prescriptions.
    Prescriptions,
    /// Manage the devices paired with the insurance account.
    PairedDevices,
}

impl fmt::Display for AuthScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prescriptions => write!(f, "prescriptions"),
            Self::PairedDevices => write!(f, "paired_devices"),
        }
    }
}

/// Terminal outcome of one authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthResult {
    /// The identity provider issued a token for the requested scope.
    Authenticated,
    /// No progress was made; retrying is safe.
    Cancelled,
    /// The identity provider does not recognise the user on this device.
    UserNotAuthenticated,
    /// The profile has no credential configured.
    NoneEnrolled,
    /// The insurance provider answered with a malformed redirect.
    RedirectLinkNotRight,
}

impl fmt::Display for AuthResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authenticated => write!(f, "authenticated"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::UserNotAuthenticated => write!(f, "user not authenticated"),
            Self::NoneEnrolled => write!(f, "none enrolled"),
            Self::RedirectLinkNotRight => write!(f, "redirect link not right"),
        }
    }
}

/// Display data of the profile an attempt runs for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Profile identifier.
    pub id: ProfileId,
    /// Display name.
    pub name: String,
    /// Health insurance number shown next to the name.
    #[serde(default)]
    pub insurance_identifier: String,
}

impl Profile {
    /// Creates a profile without an insurance identifier.
    #[must_use]
    pub fn new(id: impl Into<ProfileId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            insurance_identifier: String::new(),
        }
    }

    /// Sets the insurance identifier.
    #[must_use]
    pub fn with_insurance_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.insurance_identifier = identifier.into();
        self
    }
}

/// The credential a profile is bound to, as classified by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum InitialAuthenticationData {
    /// No credential configured.
    None {
        /// The profile.
        profile: Profile,
    },
    /// A card access number is on file; the PIN is entered interactively.
    HealthCard {
        /// Card access number printed on the card.
        can: String,
        /// The profile.
        profile: Profile,
    },
    /// A device-bound key unlocked by biometrics.
    SecureElement {
        /// The profile.
        profile: Profile,
    },
    /// A third-party insurance app.
    External {
        /// Identifier of the insurance provider.
        authenticator_id: String,
        /// Display name of the insurance provider.
        authenticator_name: String,
        /// The profile.
        profile: Profile,
    },
}

impl InitialAuthenticationData {
    /// The profile this classification belongs to.
    #[must_use]
    pub fn profile(&self) -> &Profile {
        match self {
            Self::None { profile }
            | Self::HealthCard { profile, .. }
            | Self::SecureElement { profile }
            | Self::External { profile, .. } => profile,
        }
    }

    /// Short name of the authentication method, for logging.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::None { .. } => "none",
            Self::HealthCard { .. } => "health_card",
            Self::SecureElement { .. } => "secure_element",
            Self::External { .. } => "external",
        }
    }
}

/// A contactless tag discovered by the platform.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NfcTag {
    #[serde(with = "hex::serde")]
    uid: Vec<u8>,
}

impl NfcTag {
    /// Creates a tag handle from its UID.
    #[must_use]
    pub fn new(uid: impl Into<Vec<u8>>) -> Self {
        Self { uid: uid.into() }
    }

    /// Raw tag UID.
    #[must_use]
    pub fn uid(&self) -> &[u8] {
        &self.uid
    }

    /// Tag UID as lowercase hex.
    #[must_use]
    pub fn uid_hex(&self) -> String {
        hex::encode(&self.uid)
    }
}

impl fmt::Debug for NfcTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NfcTag").field(&self.uid_hex()).finish()
    }
}

/// Entry of the external insurance app directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceProvider {
    /// Provider identifier passed back to the bridge.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// Progress and failure states reported by the bridge for card and
/// secure-element sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowLevelAuthState {
    AuthenticationFlowInitialized,
    HealthCardCommunicationChannelReady,
    HealthCardCommunicationTrustedChannelEstablished,
    HealthCardCommunicationCertificateLoaded,
    HealthCardCommunicationFinished,
    IdpCommunicationFinished,
    AuthenticationFlowFinished,

    HealthCardCommunicationInterrupted,

    HealthCardCardAccessNumberWrong,
    HealthCardPin2RetriesLeft,
    HealthCardPin1RetryLeft,
    HealthCardBlocked,

    IdpCommunicationFailed,
    IdpCommunicationInvalidCertificate,
    IdpCommunicationInvalidOcspResponse,

    SecureElementCryptographyFailed,
    UserNotAuthenticated,
}

impl LowLevelAuthState {
    /// Returns `true` for states reporting a failed session.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::HealthCardCommunicationInterrupted
                | Self::HealthCardCardAccessNumberWrong
                | Self::HealthCardPin2RetriesLeft
                | Self::HealthCardPin1RetryLeft
                | Self::HealthCardBlocked
                | Self::IdpCommunicationFailed
                | Self::IdpCommunicationInvalidCertificate
                | Self::IdpCommunicationInvalidOcspResponse
                | Self::SecureElementCryptographyFailed
                | Self::UserNotAuthenticated
        )
    }

    /// Returns `true` for intermediate states of a running session.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFlowInitialized
                | Self::HealthCardCommunicationChannelReady
                | Self::HealthCardCommunicationTrustedChannelEstablished
                | Self::HealthCardCommunicationCertificateLoaded
                | Self::HealthCardCommunicationFinished
                | Self::IdpCommunicationFinished
        )
    }

    /// Returns `true` once the identity provider issued the token.
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::AuthenticationFlowFinished)
    }
}
