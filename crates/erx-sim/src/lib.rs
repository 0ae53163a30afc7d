//! Scenario simulator for the authentication prompts.
//!
//! Loads a TOML scenario, wires the scripted collaborators of
//! [`erx_auth::scripted`] into an [`erx_auth::Authenticator`], performs the
//! scripted user steps and reports every state transition.

pub mod config;
pub mod observability;
pub mod output;
pub mod scenario;
