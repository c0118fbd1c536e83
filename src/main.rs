use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use keelson::assembly::standard_components;
use keelson::config::{self, ConfigService};
use keelson::lifecycle::Runtime;
use keelson::transport::{AdapterRegistry, AdapterType, register_all_adapters};

#[derive(Parser, Debug)]
#[command(name = "keelson")]
#[command(about = "Run the standard component set until SIGINT or SIGTERM", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Transport adapter, overriding the configuration.
    #[arg(short, long)]
    adapter: Option<AdapterType>,

    /// Listening port, overriding the configuration.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The log component may not have started yet.
            eprintln!("keelson: {e:#}");
            tracing::error!(error = %e, "Exiting after startup failure");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = ConfigService::from_env();
    if let Some(adapter) = cli.adapter {
        overrides.set("transport_adapter", adapter.to_string());
    }
    if let Some(port) = cli.port {
        overrides.set("transport_port", port.to_string());
    }
    let config = config::load(cli.config.as_deref(), &overrides)?;

    let mut registry = AdapterRegistry::new();
    register_all_adapters(&mut registry);

    let report = Runtime::builder()
        .components(standard_components(&config, Arc::new(registry))?)
        .build()?
        .run()
        .await?;

    for failure in report.failures() {
        tracing::warn!(
            component = %failure.component,
            outcome = %failure.outcome,
            "Component did not stop cleanly"
        );
    }
    tracing::info!(
        reason = ?report.reason,
        stop_order = ?report.stop_order(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Shutdown complete"
    );
    Ok(())
}
