use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use erx_auth::{AuthResult, HealthCardError};
use erx_sim::config::loader::load_config;
use erx_sim::scenario::{Report, Simulation, Transition};

fn scenario_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("scenarios")
        .join(name)
}

async fn run_scenario(name: &str) -> (Report, Vec<Transition>) {
    let config = load_config(Some(&scenario_path(name))).expect("scenario should load");
    let simulation =
        Simulation::new(&config.scenario, &config.authenticator).expect("simulation");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let report = simulation
        .run(&config.scenario, move |t: &Transition| {
            sink.lock().unwrap().push(t.clone());
        })
        .await
        .expect("scenario should run");

    assert_eq!(report.result, config.scenario.expect, "{name}");
    let seen = seen.lock().unwrap().clone();
    (report, seen)
}

fn states_of<'a>(transitions: &'a [Transition], prompt: &str) -> Vec<&'a str> {
    transitions
        .iter()
        .filter(|t| t.prompt == prompt)
        .map(|t| t.state.as_str())
        .collect()
}

#[tokio::test]
async fn card_success_scenario_authenticates() {
    let (report, seen) = run_scenario("card-success.toml").await;
    assert_eq!(report.result, Some(AuthResult::Authenticated));
    assert_eq!(report.transitions, seen);

    let card = states_of(&report.transitions, "health card");
    assert!(!card.is_empty());
    assert_eq!(card.last().copied(), Some("none"), "{card:?}");
}

#[tokio::test]
async fn blocked_card_scenario_reports_the_block() {
    let (report, _) = run_scenario("card-blocked.toml").await;
    assert_eq!(report.result, Some(AuthResult::Cancelled));

    let blocked = HealthCardError::HealthCardBlocked.to_string();
    let card = states_of(&report.transitions, "health card");
    assert!(
        card.iter().any(|s| s.contains(&blocked)),
        "expected a blocked state in {card:?}"
    );
}

#[tokio::test]
async fn insurance_app_scenario_launches_the_app() {
    let (report, _) = run_scenario("insurance-app.toml").await;
    assert_eq!(report.result, Some(AuthResult::Authenticated));
    assert_eq!(report.launched.len(), 1);
    assert_eq!(
        report.launched[0].as_str(),
        "https://tk.insurance.invalid/authorize?state=xyz"
    );
    assert!(!states_of(&report.transitions, "external").is_empty());
}

#[tokio::test]
async fn device_key_scenario_authenticates() {
    let (report, _) = run_scenario("device-key.toml").await;
    assert_eq!(report.result, Some(AuthResult::Authenticated));
    assert!(report.show_error.is_none());
    assert!(!states_of(&report.transitions, "secure element").is_empty());
}

#[tokio::test]
async fn providers_come_from_the_scenario() {
    let config = load_config(Some(&scenario_path("insurance-app.toml"))).expect("load");
    let simulation = Simulation::new(&config.scenario, &config.authenticator).expect("simulation");
    let providers = simulation
        .authenticator()
        .external_authenticators()
        .await
        .expect("providers");
    let ids: Vec<_> = providers.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, ["tk", "aok"]);
}
