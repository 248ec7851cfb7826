//! Instance Ops CLI
//!
//! Entry point for the `instance-ops` command-line tool.

use clap::{Parser, Subcommand};
use instance_ops::config::{env_layer, ConfigLayers, NotifyBackend, Settings, StoreBackend};
use instance_ops::model::{InstanceStatus, JobId, OperationStatus};
use instance_ops::signal::{SignalHandler, EXIT_CODE_INTERRUPTED};
use instance_ops::{
    logging, EffectiveConfig, FileJobStore, GcloudGateway, JobStore, LifecycleService,
    LogNotifier, MemoryJobStore, Notifier, OperationTracker, SendmailNotifier, SupervisorError,
    SupervisorHandle, TrackingOutcome, TrackingState,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "instance-ops")]
#[command(about = "Start/stop cloud instances and track the operations to completion", version)]
struct Cli {
    /// Config file layered over ~/.config/instance-ops/config.toml
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Poll interval in milliseconds
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,

    /// Re-issues allowed after a mismatched outcome
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Notification recipient
    #[arg(long, global = true)]
    recipient: Option<String>,

    /// Job store directory
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Log filter (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an instance and track the operation until it completes
    Start {
        /// Zone of the instance
        #[arg(long, short = 'z')]
        zone: String,

        /// Instance name
        name: String,
    },

    /// Stop an instance and track the operation until it completes
    Stop {
        #[arg(long, short = 'z')]
        zone: String,

        name: String,
    },

    /// Resume tracking an existing job
    Track {
        #[arg(long, short = 'z')]
        zone: String,

        /// Parent job id
        #[arg(long)]
        job: u64,

        /// Provider operation handle to poll
        #[arg(long)]
        operation: String,
    },

    /// Show an instance's provider status
    Status {
        #[arg(long, short = 'z')]
        zone: String,

        name: String,
    },

    /// List instances in every zone
    List {
        /// Only instances in this status (e.g. RUNNING, TERMINATED)
        #[arg(long)]
        status: Option<InstanceStatus>,
    },

    /// Show an instance's start/stop operations (in-flight ones by default)
    Operations {
        #[arg(long, short = 'z')]
        zone: String,

        /// Only operations in this status (PENDING, RUNNING or DONE)
        #[arg(long)]
        status: Option<OperationStatus>,

        name: String,
    },

    /// Show a job and its retry attempts
    Job {
        #[arg(long, short = 'z')]
        zone: String,

        id: u64,
    },

    /// List all recorded jobs
    Jobs,

    /// Print the effective configuration
    Config,
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    if let Commands::Config = cli.command {
        print_output(&config, cli.json, |c| {
            let mut out = String::new();
            for source in &c.sources {
                out.push_str(&format!("# source: {:?}", source.origin));
                if let Some(ref path) = source.path {
                    out.push_str(&format!(" {}", path));
                }
                out.push('\n');
            }
            out.push_str(&serde_json::to_string_pretty(&c.config).unwrap_or_default());
            out
        });
        return;
    }

    let settings = &config.settings;
    if let Err(e) = logging::init(&settings.log.filter, settings.log.format) {
        eprintln!("Logging error: {}", e);
        process::exit(1);
    }

    let service = match build_service(settings) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Start { zone, name } => run_submit(&service, cli.json, || service.start_instance(&zone, &name)),
        Commands::Stop { zone, name } => run_submit(&service, cli.json, || service.stop_instance(&zone, &name)),
        Commands::Track { zone, job, operation } => run_track(&service, cli.json, JobId(job), &zone, &operation),
        Commands::Status { zone, name } => run_query(cli.json, service.instance_status(&zone, &name), |s| {
            format!("{} ({}): {}", name, zone, s)
        }),
        Commands::List { status } => run_query(cli.json, service.list_instances(status), |instances| {
            instances
                .iter()
                .map(|i| format!("{:<32} {:<20} {}", i.name, i.zone, i.status))
                .collect::<Vec<_>>()
                .join("\n")
        }),
        Commands::Operations { zone, status, name } => {
            run_query(cli.json, service.instance_operations(&zone, &name, status), |operations| {
                operations
                    .iter()
                    .map(|op| format!("{:<48} {:<5} {:<8} {}", op.name, op.kind.as_str(), op.status.as_str(), op.timestamps.insert_time))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Commands::Job { zone, id } => run_query(cli.json, service.job(JobId(id), &zone), |view| {
            let mut out = format!(
                "job {}: {} {} in {} status={} successful={}",
                view.job.id, view.job.kind, view.job.name, view.job.zone, view.job.status, view.job.is_successful
            );
            if let Some(ref failure) = view.job.failure {
                out.push_str(&format!("\n  failure: {}", failure));
            }
            for child in &view.children {
                out.push_str(&format!(
                    "\n  retry {}: operation={} successful={}",
                    child.id, child.operation, child.is_successful
                ));
            }
            out
        }),
        Commands::Jobs => run_query(cli.json, service.jobs(), |jobs| {
            jobs.iter()
                .map(|j| format!("{:>6} {:<5} {:<32} {:<20} {}", j.id.0, j.kind.as_str(), j.name, j.zone, j.status))
                .collect::<Vec<_>>()
                .join("\n")
        }),
        Commands::Config => 0,
    };

    shutdown(service.supervisor());
    process::exit(code);
}

fn load_config(cli: &Cli) -> Result<EffectiveConfig, instance_ops::ConfigError> {
    let mut overrides = serde_json::Map::new();
    let mut section = |name: &str, key: &str, value: serde_json::Value| {
        let table = overrides
            .entry(name.to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        if let Some(table) = table.as_object_mut() {
            table.insert(key.to_string(), value);
        }
    };

    if let Some(ms) = cli.poll_interval_ms {
        section("tracking", "poll_interval_ms", ms.into());
    }
    if let Some(n) = cli.max_retries {
        section("tracking", "max_retries", n.into());
    }
    if let Some(ref recipient) = cli.recipient {
        section("notify", "recipient", recipient.clone().into());
    }
    if let Some(ref dir) = cli.store_dir {
        section("store", "dir", dir.to_string_lossy().to_string().into());
    }
    if let Some(ref filter) = cli.log_filter {
        section("log", "filter", filter.clone().into());
    }

    EffectiveConfig::build(ConfigLayers {
        user_file: EffectiveConfig::default_user_file(),
        explicit_file: cli.config.clone(),
        env: env_layer(std::env::vars()),
        cli: if overrides.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(overrides))
        },
    })
}

fn build_service(settings: &Settings) -> Result<LifecycleService, Box<dyn std::error::Error>> {
    let gateway = Arc::new(GcloudGateway::new(settings.gcloud_config()));

    let store: Arc<dyn JobStore> = match settings.store.backend {
        StoreBackend::File => Arc::new(FileJobStore::open(settings.store.resolved_dir())?),
        StoreBackend::Memory => Arc::new(MemoryJobStore::new()),
    };

    let notifier: Arc<dyn Notifier> = match settings.notify.backend {
        NotifyBackend::Log => Arc::new(LogNotifier),
        NotifyBackend::Sendmail => Arc::new(SendmailNotifier::new(settings.sendmail_config())),
    };

    let tracker = OperationTracker::new(gateway.clone(), store.clone(), notifier, settings.tracker_config());
    let supervisor = SupervisorHandle::spawn(Arc::new(tracker))?;

    Ok(LifecycleService::new(
        gateway,
        store,
        supervisor,
        settings.notify.recipient.clone(),
    ))
}

fn install_interrupt(supervisor: &SupervisorHandle) {
    let supervisor = supervisor.clone();
    let handler = SignalHandler::new();
    if let Err(e) = handler.install(move || {
        if let Err(e) = supervisor.shutdown() {
            tracing::error!(error = %e, "shutdown after interrupt failed");
        }
    }) {
        tracing::warn!(error = %e, "could not install interrupt handler");
    }
}

fn run_submit<F>(service: &LifecycleService, json: bool, submit: F) -> i32
where
    F: FnOnce() -> instance_ops::service::ServiceResult<instance_ops::Submitted>,
{
    install_interrupt(service.supervisor());

    let submitted = match submit() {
        Ok(submitted) => submitted,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if !json {
        println!(
            "job {}: {} {} in {} (operation {})",
            submitted.job.id, submitted.job.kind, submitted.job.name, submitted.job.zone, submitted.operation.name
        );
    }

    wait_and_report(service, json, submitted.job.id)
}

fn run_track(service: &LifecycleService, json: bool, id: JobId, zone: &str, operation: &str) -> i32 {
    install_interrupt(service.supervisor());

    if let Err(e) = service.resume(id, zone, operation) {
        eprintln!("Error: {}", e);
        return 1;
    }
    wait_and_report(service, json, id)
}

fn wait_and_report(service: &LifecycleService, json: bool, id: JobId) -> i32 {
    let outcome = match service.supervisor().wait(id) {
        Ok(Some(outcome)) => outcome,
        Ok(None) | Err(SupervisorError::Stopped) => {
            eprintln!("Tracking of job {} was interrupted", id);
            return EXIT_CODE_INTERRUPTED;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    print_output(&outcome, json, describe_outcome);

    match outcome.state {
        TrackingState::Succeeded => 0,
        TrackingState::Cancelled => EXIT_CODE_INTERRUPTED,
        _ => 1,
    }
}

fn describe_outcome(outcome: &TrackingOutcome) -> String {
    let mut out = format!(
        "job {}: {:?} after {} polls, {} retries",
        outcome.job_id, outcome.state, outcome.polls, outcome.retries
    );
    if let Some(ref failure) = outcome.failure {
        out.push_str(&format!("\n  failure: {}", failure));
    }
    out
}

fn run_query<T, F>(json: bool, result: instance_ops::service::ServiceResult<T>, human: F) -> i32
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match result {
        Ok(value) => {
            print_output(&value, json, human);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn print_output<T, F>(value: &T, json: bool, human: F)
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    if json {
        match serde_json::to_string_pretty(value) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
    } else {
        println!("{}", human(value));
    }
}

fn shutdown(supervisor: &SupervisorHandle) {
    match supervisor.shutdown() {
        Ok(_) | Err(SupervisorError::Stopped) => {}
        Err(e) => tracing::warn!(error = %e, "supervisor shutdown failed"),
    }
}
