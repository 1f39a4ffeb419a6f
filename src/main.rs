use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use armada::auth::Credentials;
use armada::cli::{Cli, Commands, Display};
use armada::config::AppConfig;
use armada::error::{ArmadaError, Result};
use armada::fleet::{Fleet, Launcher, LogOptions};
use armada::plan::Plan;
use armada::provider;
use armada::remote::SshRemote;

/// Partial success: the operation finished but some ships failed.
const EXIT_PARTIAL: u8 = 4;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let display = Display::new();
    match run(cli, &display).await {
        Ok(code) => code,
        Err(e) => {
            display.print_error(&e.to_string());
            if let Some(action) = e.next_action() {
                display.print_info(&format!("Next: {action}"));
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("armada=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("armada=info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn run(cli: Cli, display: &Display) -> Result<ExitCode> {
    let config = AppConfig::load()?;
    let remote: Arc<dyn armada::Remote> = Arc::new(SshRemote::new(config.command_timeout()));
    let provider = provider::select(&config, Arc::clone(&remote))?;
    let fleet = Fleet::new(Arc::clone(&provider), Arc::clone(&remote), config.clone());

    match cli.command {
        Commands::Sail { plan_dir, ships } => {
            let plan = Plan::load(&plan_dir)?;
            let credentials = Credentials::load()?;

            display.print_info(&format!(
                "Plan loaded: {} ({} tasks, repo {})",
                plan_dir.display(),
                plan.tasks.len(),
                plan.config.repo
            ));

            let launcher = Launcher::new(provider, remote, config);
            let spinner = display.create_spinner("Launching voyage...");
            let result = launcher.sail(&plan, ships, &credentials).await;
            spinner.finish_and_clear();

            let report = result?;
            display.print_launch_report(&report);

            if report.has_ship_failures() {
                return Ok(ExitCode::from(EXIT_PARTIAL));
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Status { voyage_id } => {
            let (voyage, status) = fleet.status(voyage_id.as_deref()).await?;
            display.print_status(&voyage, &status);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Tasks { voyage_id, status } => {
            let (_voyage, tasks) = fleet
                .tasks(Some(&voyage_id), status.map(Into::into))
                .await?;
            display.print_tasks_table(&tasks);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Logs {
            voyage_id,
            ship,
            follow,
            grep,
            tail,
        } => {
            let opts = LogOptions {
                ship,
                follow,
                grep,
                tail,
            };
            fleet.logs(Some(&voyage_id), &opts).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::ResetTask {
            voyage_id,
            task_id,
            all_stale,
        } => {
            if all_stale {
                let reset = fleet.reset_all_stale(Some(&voyage_id)).await?;
                if reset.is_empty() {
                    display.print_info("No stale tasks.");
                } else {
                    for id in &reset {
                        display.print_success(&format!("Reset {id} to pending"));
                    }
                }
                Ok(ExitCode::SUCCESS)
            } else if let Some(task_id) = task_id {
                let task = fleet.reset_task(Some(&voyage_id), &task_id).await?;
                display.print_success(&format!("Reset {} to pending", task.id));
                Ok(ExitCode::SUCCESS)
            } else {
                Err(ArmadaError::Config(
                    "pass a task id or --all-stale".to_string(),
                ))
            }
        }

        Commands::Resume { voyage_id, ships } => {
            let credentials = Credentials::load()?;
            let spinner = display.create_spinner("Adding ships...");
            let result = fleet.resume(Some(&voyage_id), ships, &credentials).await;
            spinner.finish_and_clear();

            let (indices, outcome) = result?;
            for index in &outcome.launched {
                display.print_success(&format!("ship-{index} joined the voyage"));
            }
            for failure in &outcome.failures {
                display.print_warning(&format!("ship-{}: {}", failure.index, failure.error));
            }

            if !outcome.failures.is_empty() {
                return Ok(ExitCode::from(EXIT_PARTIAL));
            }
            if outcome.launched.is_empty() && !indices.is_empty() {
                return Ok(ExitCode::from(EXIT_PARTIAL));
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Shell { voyage_id, ship_id } => {
            // Only returns on failure; on success the process becomes ssh.
            match fleet.shell(&voyage_id, &ship_id).await {
                Ok(never) => match never {},
                Err(e) => Err(e),
            }
        }

        Commands::Abandon { voyage_id } => {
            let count = fleet.abandon(&voyage_id).await?;
            display.print_success(&format!("Destroyed {count} ship(s); storage kept."));
            Ok(ExitCode::SUCCESS)
        }

        Commands::Sink {
            voyage_id,
            include_storage,
            all,
            force,
        } => {
            if all {
                if !force && !display.confirm("Destroy ALL armada VMs?")? {
                    display.print_info("Aborted.");
                    return Ok(ExitCode::SUCCESS);
                }
                let count = fleet.sink_all().await?;
                display.print_success(&format!("Destroyed {count} VM(s)."));
                return Ok(ExitCode::SUCCESS);
            }

            let voyage_id = voyage_id.ok_or_else(|| {
                ArmadaError::Config("pass a voyage id or --all".to_string())
            })?;
            if !force
                && !display.confirm(&format!("Destroy VMs for {voyage_id}?"))?
            {
                display.print_info("Aborted.");
                return Ok(ExitCode::SUCCESS);
            }
            let count = fleet.sink(&voyage_id, include_storage).await?;
            display.print_success(&format!("Destroyed {count} VM(s)."));
            Ok(ExitCode::SUCCESS)
        }

        Commands::Doctor => {
            let report = fleet.doctor().await;
            display.print_doctor(&report);
            if report.all_ok() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}
