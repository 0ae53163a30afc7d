use std::{env, fs};

use erx_auth::{AuthResult, AuthScope};
use erx_sim::config::loader::load_config;
use erx_sim::scenario::Step;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("erx-sim.toml");

    let toml_content = r#"
[logging]
level = "debug"

[authenticator]
transition_capacity = 16

[authenticator.health_card]
pin_min_length = 6
pin_max_length = 8

[scenario]
name = "card"
profile_id = "card-user"
scope = "paired_devices"
expect = "authenticated"
timeout = "3s"

[[scenario.bridge.enrollments]]
method = "health_card"
can = "123123"
profile = { id = "card-user", name = "Erna" }

[[scenario.steps]]
action = "enter_pin"
pin = "123456"

[[scenario.steps]]
action = "tap"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(Some(&path)).expect("should parse config");
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.authenticator.transition_capacity, 16);
    assert_eq!(cfg.scenario.scope, AuthScope::PairedDevices);
    assert_eq!(cfg.scenario.expect, Some(AuthResult::Authenticated));
    assert_eq!(cfg.scenario.timeout.as_secs(), 3);
    assert_eq!(cfg.scenario.bridge.enrollments.len(), 1);
    assert_eq!(cfg.scenario.steps.len(), 2);
    assert_eq!(cfg.scenario.steps[1], Step::Tap { tag: None });

    // 2) Env override should win over file
    unsafe {
        env::set_var("ERX_SIM__AUTHENTICATOR__HEALTH_CARD__PIN_MIN_LENGTH", "4");
    }
    let cfg_env = load_config(Some(&path));
    unsafe {
        env::remove_var("ERX_SIM__AUTHENTICATOR__HEALTH_CARD__PIN_MIN_LENGTH");
    }
    let cfg_env = cfg_env.expect("should parse config with env overrides");
    assert_eq!(cfg_env.authenticator.health_card.pin_min_length, 4);

    // 3) Inverted PIN bounds should error
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[authenticator.health_card]
pin_min_length = 8
pin_max_length = 6

[scenario]
profile_id = "card-user"
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(Some(&invalid_path)).expect_err("expected validation error");
    assert!(format!("{err:#}").contains("authenticator"), "{err:#}");
}

#[test]
fn missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let err = load_config(Some(&dir.path().join("nope.toml"))).expect_err("missing file");
    assert!(err.to_string().contains("not found"));
}

#[test]
fn scenario_without_profile_is_rejected() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("erx-sim.toml");
    fs::write(&path, "[logging]\nlevel = \"info\"\n").expect("write toml");

    let err = load_config(Some(&path)).expect_err("expected validation error");
    assert!(format!("{err:#}").contains("profile_id"), "{err:#}");
}
