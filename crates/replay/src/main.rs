use std::{io::IsTerminal, path::PathBuf};

use clap::Parser;
use config::{Config, LogFormat, LoggingConfig};
use eyre::WrapErr;
use serde::Serialize;
use session::{AsyncSession, Event};
use tracing::Instrument;
use tracing_subscriber::EnvFilter;

mod debuggee;
mod scenario;

use debuggee::ScriptedDebuggee;
use scenario::{Scenario, Step};

#[derive(Debug, Parser)]
struct Args {
    /// Scenario to replay
    scenario: PathBuf,

    /// Path to the config file
    #[clap(short, long)]
    config: Option<PathBuf>,
}

/// One line of output per event or rejected step
#[derive(Serialize)]
#[serde(untagged)]
enum Output<'a> {
    Event { step: usize, event: &'a Event },
    Rejected { step: usize, rejected: String },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = match &logging.filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::from_default_env(),
    };
    let json = match logging.format {
        LogFormat::Auto => !std::io::stderr().is_terminal(),
        LogFormat::Pretty => false,
        LogFormat::Json => true,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}

fn print(output: &Output) -> eyre::Result<()> {
    println!(
        "{}",
        serde_json::to_string(output).context("serializing output")?
    );
    Ok(())
}

async fn replay(session: &mut AsyncSession, steps: Vec<Step>) -> eyre::Result<()> {
    for (index, step) in steps.into_iter().enumerate() {
        let span = tracing::info_span!("step", index);
        async {
            tracing::debug!(?step, "applying step");
            match step {
                Step::Notify(notification) => session.notify(notification)?,
                step => {
                    let outcome = session.run(move |session| step.apply(session)).await?;
                    if let Some(Err(rejection)) = outcome {
                        tracing::warn!(%rejection, "step rejected");
                        print(&Output::Rejected {
                            step: index,
                            rejected: rejection.to_string(),
                        })?;
                    }
                }
            }

            // everything sent before this point has been processed
            session.run(|_| ()).await?;
            session.settled().await?;
            while let Some(event) = session.events().try_recv() {
                print(&Output::Event {
                    step: index,
                    event: &event,
                })?;
            }
            Ok::<_, eyre::Report>(())
        }
        .instrument(span)
        .await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Args::parse();
    let config = Config::load_or_default(args.config.as_deref()).context("loading config")?;
    init_tracing(&config.logging);
    let _ = color_eyre::install();
    tracing::debug!(?args, ?config, "starting replay");

    let scenario = Scenario::load(&args.scenario)?;
    let debuggee = ScriptedDebuggee::new(scenario.responses);
    let mut session = AsyncSession::start(debuggee, config.session);

    replay(&mut session, scenario.steps).await?;

    let view = session.view();
    println!(
        "{}",
        serde_json::to_string_pretty(&*view).context("serializing final view")?
    );
    session.shutdown().await
}
