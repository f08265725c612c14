use medic::cli::output::{self, OutputMode};
use medic::cli::{Cli, Commands};
use medic::config::AppConfig;
use medic::domain::FailureType;
use medic::error::{MedicError, Result};
use medic::metrics::{MetricsProvider, SystemMetrics};
use medic::supervisor::{knowledge_for, FailureDetector, HealthChecker, Troubleshooter};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub(crate) async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Run {
            duration,
            interval,
            dry_run,
            report,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(secs) = duration {
                config.monitor.duration_secs = Some(*secs);
            }
            if let Some(secs) = interval {
                config.monitor.interval_secs = *secs;
            }
            if *dry_run {
                config.monitor.dry_run = true;
            }
            if let Some(path) = report {
                config.monitor.report_path = Some(path.clone());
            }
            validate(&config)?;

            crate::main_runtime::init_logging(&config.logging);
            run_monitor(&config).await?;
        }
        Commands::Check { json } => {
            crate::main_runtime::init_logging_simple();
            let config = load_config(&cli.config)?;
            validate(&config)?;

            let checker = HealthChecker::new(config.services.clone())?;
            let results = checker.check_all().await;
            output::print_health(&results, OutputMode::from_json_flag(*json))?;
        }
        Commands::Detect { json } => {
            crate::main_runtime::init_logging_simple();
            let config = load_config(&cli.config)?;
            validate(&config)?;

            let metrics: Arc<dyn MetricsProvider> = Arc::new(SystemMetrics::new());
            let checker = Arc::new(HealthChecker::new(config.services.clone())?);
            let detector = FailureDetector::standard(metrics, &config.detection, checker);
            let failures = detector.detect_failures().await;
            output::print_failures(&failures, OutputMode::from_json_flag(*json))?;
        }
        Commands::Guide { failure_type } => {
            let failure_type: FailureType = failure_type
                .parse()
                .map_err(MedicError::InvalidConfig)?;
            print_knowledge(failure_type);
        }
        Commands::Config => {
            let config = load_config(&cli.config)?;
            print!("{}", config.to_toml()?);
            if let Err(errors) = config.validate() {
                for e in errors {
                    eprintln!("warning: {e}");
                }
            }
        }
    }

    Ok(())
}

fn load_config(dir: &Path) -> Result<AppConfig> {
    Ok(AppConfig::load_from(dir)?)
}

fn validate(config: &AppConfig) -> Result<()> {
    config
        .validate()
        .map_err(|errors| MedicError::InvalidConfig(errors.join("; ")))
}

async fn run_monitor(config: &AppConfig) -> Result<()> {
    let metrics: Arc<dyn MetricsProvider> = Arc::new(SystemMetrics::new());
    let troubleshooter = Troubleshooter::from_config(config, metrics)?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    let report = troubleshooter.run(cancel).await;
    info!(
        "monitoring finished: {} failures, {} resolved",
        report.total_failures, report.resolved_failures
    );
    Ok(())
}

fn print_knowledge(failure_type: FailureType) {
    let knowledge = knowledge_for(failure_type);
    println!("Playbook: {failure_type}");
    for (title, items) in [
        ("Possible causes", knowledge.possible_causes),
        ("Diagnostic steps", knowledge.diagnostic_steps),
        ("Preventive measures", knowledge.preventive_measures),
    ] {
        println!();
        println!("{title}:");
        for (i, item) in items.iter().enumerate() {
            println!("  {}. {}", i + 1, item);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
