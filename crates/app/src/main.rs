//! Demo entry point: wires the kernel from the environment and runs the
//! scripted asset scenario once.

use std::process::ExitCode;

use kernel_demo::{Config, DemoError, Kernel, LogFormat, ScenarioReport, run_scenario};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn run(config: &Config) -> Result<ScenarioReport, DemoError> {
    let run_id = new_run_id();
    match config.database_url.as_deref() {
        Some(url) => {
            tracing::info!("running against PostgreSQL");
            let (kernel, uow) = Kernel::postgres(config, url).await?;
            run_scenario(&kernel, uow.as_ref(), &run_id).await
        }
        None => {
            tracing::info!("DATABASE_URL not set, running in memory");
            let (kernel, uow) = Kernel::in_memory(config)?;
            run_scenario(&kernel, uow.as_ref(), &run_id).await
        }
    }
}

/// Keys idempotent requests per run, so reruns against one database start
/// fresh.
fn new_run_id() -> String {
    format!("run-{}", chrono::Utc::now().timestamp_millis())
}

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Configuration and tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = match metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
    {
        Ok(handle) => handle,
        Err(err) => {
            tracing::error!(error = %DemoError::from(err), "startup failed");
            return ExitCode::FAILURE;
        }
    };

    // 3. Run the scenario
    let outcome = run(&config).await;

    // 4. Report
    let code = match outcome {
        Ok(report) => {
            tracing::info!(
                asset_id = %report.asset.id,
                replayed_identically = report.replayed_identically,
                rejections = ?report.rejections,
                summary = ?report.summary,
                "scenario succeeded"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "scenario failed");
            ExitCode::FAILURE
        }
    };

    println!("{}", metrics_handle.render());
    code
}
