mod cli;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use cli::{Cli, Commands};
use erx_sim::config::loader;
use erx_sim::observability;
use erx_sim::output::{self, OutputFormat, print_error};
use erx_sim::scenario::Simulation;

#[tokio::main]
async fn main() {
    // A missing .env is fine
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = loader::load_config(cli.config.as_deref())?;
    observability::init_tracing_with_level(
        cli.log_level.as_deref().unwrap_or(&config.logging.level),
    );
    let scenario = &config.scenario;
    let text = cli.format == OutputFormat::Text;

    match cli.command {
        Commands::Run => {
            let simulation = Simulation::new(scenario, &config.authenticator)?;
            let report = if text {
                output::print_header(scenario);
                let report = simulation.run(scenario, output::print_transition).await?;
                output::print_report(&report);
                report
            } else {
                let report = simulation.run(scenario, |_| {}).await?;
                output::print_json(&report)?;
                report
            };

            if let Some(expected) = scenario.expect {
                match report.result {
                    Some(actual) if actual == expected => {
                        if text {
                            output::print_success(&format!("Ended with {expected} as expected"));
                        }
                    }
                    Some(actual) => anyhow::bail!("expected {expected}, got {actual}"),
                    None => anyhow::bail!("expected {expected}, got no result"),
                }
            }
        }
        Commands::Check => {
            if text {
                output::print_header(scenario);
                println!(
                    "{}: {}",
                    "Enrollments".cyan(),
                    scenario.bridge.enrollments.len()
                );
                println!(
                    "{}: {}",
                    "Card sessions".cyan(),
                    scenario.bridge.card_sessions.len()
                );
                output::print_success("Scenario is valid");
            } else {
                output::print_json(&config)?;
            }
        }
        Commands::Providers => {
            let simulation = Simulation::new(scenario, &config.authenticator)?;
            let providers = simulation.authenticator().external_authenticators().await?;
            if text {
                output::print_providers(&providers);
            } else {
                output::print_json(&providers)?;
            }
        }
    }

    Ok(())
}
