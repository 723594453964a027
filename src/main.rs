use clap::Parser;
use tracing::{info, warn};

use webchecker::{
    config::load_config_from_sources, orchestrator::Orchestrator, otel,
    web_server::start_prometheus_server,
};

const WEBCHECKER_YAML: &str = "webchecker.yaml";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Target definition file to monitor
    #[arg(short, long, default_value = WEBCHECKER_YAML)]
    file: String,

    /// Check every enabled target once, print the results and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let otel_state = otel::init();
    if let Some(registry) = &otel_state.metrics.registry {
        tokio::spawn(start_prometheus_server(registry.clone()));
    }

    let config = load_config_from_sources(args.file.clone()).await?;
    let orchestrator = Orchestrator::from_config(&config)?;

    if args.once {
        let results = orchestrator.check_all().await;
        let failed = results.iter().filter(|r| !r.success).count();
        for result in &results {
            match (&result.error, result.status_code) {
                (Some(error), _) => warn!(
                    url = result.url,
                    kind = %error.kind,
                    latency_ms = result.latency.as_millis() as u64,
                    "DOWN: {}", error.message
                ),
                (None, Some(status)) if result.success => info!(
                    url = result.url,
                    status,
                    latency_ms = result.latency.as_millis() as u64,
                    cert_days = result.certificate.as_ref().map(|c| c.days_until_expiry),
                    "UP"
                ),
                (None, status) => warn!(
                    url = result.url,
                    status,
                    latency_ms = result.latency.as_millis() as u64,
                    "DOWN"
                ),
            }
        }
        otel_state.shutdown();
        if failed > 0 {
            return Err(format!("{} of {} targets failed", failed, results.len()).into());
        }
        return Ok(());
    }

    let display = orchestrator.on_result(|result| {
        if result.success {
            info!(
                url = result.url,
                status = result.status_code,
                latency_ms = result.latency.as_millis() as u64,
                "Check succeeded"
            );
        } else {
            warn!(
                url = result.url,
                status = result.status_code,
                error = result.error.as_ref().map(|e| e.message.as_str()),
                "Check failed"
            );
        }
    });

    orchestrator.start();
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    orchestrator.shutdown();
    display.abort();
    otel_state.shutdown();

    Ok(())
}
