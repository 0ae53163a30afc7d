mod common;

use std::time::Duration;

use common::*;
use erx_auth::prelude::*;
use erx_auth::scripted::{
    CeremonyOutcome, CeremonyScript, LauncherScript, ScriptedBridge, SessionScript,
};

fn device_bridge(handshake: SessionScript) -> ScriptedBridge {
    ScriptedBridge::new()
        .with_enrollment(device_enrollment())
        .with_secure_element(handshake)
}

#[tokio::test]
async fn successful_handshake_authenticates() {
    let harness = Harness::new(device_bridge(SessionScript::new([
        LowLevelAuthState::AuthenticationFlowInitialized,
        LowLevelAuthState::IdpCommunicationFinished,
        LowLevelAuthState::AuthenticationFlowFinished,
    ])));
    let prompt = harness.secure_element();
    let mut transitions = prompt.subscribe();

    let attempt = harness.start(DEVICE_USER);
    expect_transitions(
        &mut transitions,
        &[SecureElementState::InProgress, SecureElementState::None],
    )
    .await;

    assert_eq!(finish(attempt).await, vec![AuthResult::Authenticated]);
    assert_eq!(harness.ceremony.calls(), 1);
    assert_eq!(harness.bridge.secure_element_calls(), 1);
    assert!(prompt.show_error().is_none());
}

#[tokio::test]
async fn user_not_authenticated_is_its_own_result() {
    let harness = Harness::new(device_bridge(SessionScript::new([
        LowLevelAuthState::AuthenticationFlowInitialized,
        LowLevelAuthState::UserNotAuthenticated,
    ])));

    let attempt = harness.start(DEVICE_USER);
    assert_eq!(finish(attempt).await, vec![AuthResult::UserNotAuthenticated]);
    assert!(harness.secure_element().show_error().is_none());
    assert_eq!(harness.secure_element().state(), SecureElementState::None);
}

#[tokio::test]
async fn handshake_failure_sets_sticky_error() {
    let harness = Harness::new(device_bridge(SessionScript::new([
        LowLevelAuthState::IdpCommunicationFailed,
    ])));
    let prompt = harness.secure_element();

    let attempt = harness.start(DEVICE_USER);
    assert_eq!(finish(attempt).await, vec![AuthResult::Cancelled]);
    assert_eq!(
        prompt.show_error(),
        Some(SecureElementError::RemoteCommunicationFailed)
    );
    assert_eq!(prompt.state(), SecureElementState::None);

    // A later success does not clear it; only the caller does.
    harness.bridge.set_secure_element(SessionScript::new([
        LowLevelAuthState::AuthenticationFlowFinished,
    ]));
    let attempt = harness.start(DEVICE_USER);
    assert_eq!(finish(attempt).await, vec![AuthResult::Authenticated]);
    assert!(prompt.show_error().is_some());

    prompt.clear_error();
    assert!(prompt.show_error().is_none());
}

#[tokio::test]
async fn rejected_device_key_names_the_profile() {
    let harness = Harness::new(device_bridge(SessionScript::new([
        LowLevelAuthState::SecureElementCryptographyFailed,
    ])));
    let prompt = harness.secure_element();
    let mut errors = prompt.watch_error();

    let attempt = harness.start(DEVICE_USER);
    assert_eq!(finish(attempt).await, vec![AuthResult::Cancelled]);
    wait_for_state(&mut errors, Option::is_some).await;
    assert_eq!(
        prompt.show_error(),
        Some(SecureElementError::RemoteCommunicationAltAuthNotSuccessful {
            profile_id: ProfileId::from(DEVICE_USER),
        })
    );
}

#[tokio::test]
async fn certificate_and_ocsp_failures_are_distinguished() {
    let cases = [
        (
            LowLevelAuthState::IdpCommunicationInvalidCertificate,
            SecureElementError::RemoteCommunicationInvalidCertificate,
        ),
        (
            LowLevelAuthState::IdpCommunicationInvalidOcspResponse,
            SecureElementError::RemoteCommunicationInvalidOcsp,
        ),
    ];
    for (low_level, expected) in cases {
        let harness = Harness::new(device_bridge(SessionScript::new([low_level])));
        let attempt = harness.start(DEVICE_USER);
        assert_eq!(finish(attempt).await, vec![AuthResult::Cancelled]);
        assert_eq!(harness.secure_element().show_error(), Some(expected));
    }
}

#[tokio::test]
async fn failed_ceremony_skips_the_handshake() {
    let harness = Harness::with_parts(
        device_bridge(SessionScript::new([LowLevelAuthState::AuthenticationFlowFinished])),
        CeremonyScript {
            outcome: CeremonyOutcome::Failed {
                message: "fingerprint not recognised".to_string(),
            },
            ..Default::default()
        },
        LauncherScript::default(),
    );

    let attempt = harness.start(DEVICE_USER);
    assert_eq!(finish(attempt).await, vec![AuthResult::Cancelled]);
    assert_eq!(harness.ceremony.calls(), 1);
    assert_eq!(harness.bridge.secure_element_calls(), 0);
    assert!(harness.secure_element().show_error().is_none());
}

#[tokio::test]
async fn cancel_all_dismisses_running_ceremony() {
    let harness = Harness::with_parts(
        device_bridge(SessionScript::new([LowLevelAuthState::AuthenticationFlowFinished])),
        CeremonyScript {
            hold_open: true,
            ..Default::default()
        },
        LauncherScript::default(),
    );
    let prompt = harness.secure_element();
    let mut state = prompt.watch_state();

    let attempt = harness.start(DEVICE_USER);
    wait_for_state(&mut state, |s| *s == SecureElementState::InProgress).await;
    settle().await;
    assert_eq!(harness.ceremony.calls(), 1);

    harness.authenticator.cancel_all_authentications().await;
    assert_eq!(finish(attempt).await, vec![AuthResult::Cancelled]);
    assert_eq!(prompt.state(), SecureElementState::None);
    assert_eq!(harness.bridge.secure_element_calls(), 0);
}

#[tokio::test]
async fn handshake_ending_without_result_is_cancelled() {
    let harness = Harness::new(device_bridge(
        SessionScript::new([
            LowLevelAuthState::AuthenticationFlowInitialized,
            LowLevelAuthState::IdpCommunicationFinished,
        ])
        .with_step_delay(Duration::from_millis(5)),
    ));

    let attempt = harness.start(DEVICE_USER);
    assert_eq!(finish(attempt).await, vec![AuthResult::Cancelled]);
    assert!(harness.secure_element().show_error().is_none());
}

#[tokio::test]
async fn profile_without_device_key_is_cancelled() {
    let harness = Harness::new(ScriptedBridge::new().with_enrollment(card_enrollment()));
    let prompt = harness.secure_element();

    let attempt = spawn_attempt(
        prompt.authenticate(&ProfileId::from(CARD_USER), AuthScope::PairedDevices),
    );
    assert_eq!(finish(attempt).await, vec![AuthResult::Cancelled]);
    assert_eq!(harness.ceremony.calls(), 0);
}
