use clap::ValueEnum;
use colored::Colorize;
use erx_auth::{AuthResult, InsuranceProvider};
use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::scenario::{Report, Scenario, Transition};

#[derive(Clone, Copy, ValueEnum, Default, PartialEq, Eq, Debug)]
pub enum OutputFormat {
    /// Live transitions and a coloured summary
    #[default]
    Text,
    /// One JSON document once the run is over
    Json,
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_header(scenario: &Scenario) {
    let name = if scenario.name.is_empty() {
        "unnamed scenario"
    } else {
        scenario.name.as_str()
    };
    println!("{} {}", "Scenario".cyan().bold(), name);
    println!("{}: {}", "Profile".cyan(), scenario.profile_id);
    println!("{}: {}", "Scope".cyan(), scenario.scope);
    println!("{}: {}", "Steps".cyan(), scenario.steps.len());
}

pub fn print_transition(transition: &Transition) {
    println!(
        "  {} {:<15} {}",
        "→".dimmed(),
        transition.prompt.blue(),
        transition.state
    );
}

pub fn print_report(report: &Report) {
    for url in &report.launched {
        println!("{}: {}", "Launched".cyan(), url);
    }
    if let Some(error) = &report.show_error {
        println!("{}: {}", "Secure element error".yellow(), error);
    }
    match report.result {
        Some(result) => println!("{}: {}", "Result".cyan(), colorize(result)),
        None => println!("{}: {}", "Result".cyan(), "(none)".dimmed()),
    }
}

pub fn print_providers(providers: &[InsuranceProvider]) {
    if providers.is_empty() {
        println!("No insurance providers configured.");
        return;
    }
    let mut builder = Builder::default();
    builder.push_record(["ID", "Name"]);
    for provider in providers {
        builder.push_record([provider.id.as_str(), provider.name.as_str()]);
    }
    let table = builder.build().with(Style::rounded()).to_string();
    println!("{table}");
    println!("Total: {}", providers.len());
}

fn colorize(result: AuthResult) -> colored::ColoredString {
    match result {
        AuthResult::Authenticated => result.to_string().green().bold(),
        AuthResult::Cancelled => result.to_string().yellow(),
        AuthResult::UserNotAuthenticated
        | AuthResult::NoneEnrolled
        | AuthResult::RedirectLinkNotRight => result.to_string().red(),
    }
}
