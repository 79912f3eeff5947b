use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use slotwise::command::Service;
use slotwise::config::Config;
use slotwise::notify::LogNotifier;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Replies own stdout, so logs go to stderr.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let config = Config::from_env();
    slotwise::observability::init(config.metrics_port);

    let service = Service::from_config(&config, Arc::new(LogNotifier));
    let reaper = tokio::spawn(slotwise::reaper::run_offer_reaper(
        service.waitlist().clone(),
        config.reaper_interval(),
    ));

    info!("slotwise ready, reading commands from stdin");
    info!("  offer_ttl: {}h", config.offer_ttl_hours);
    info!("  reaper_interval: {}s", config.reaper_interval_secs);
    info!(
        "  calendar: {}",
        config.calendar_api_url.as_deref().unwrap_or("disabled")
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("failed to register SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("end of input");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = service.handle_line(&line).await;
                let mut out = serde_json::to_vec(&reply)?;
                out.push(b'\n');
                stdout.write_all(&out).await?;
                stdout.flush().await?;
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    reaper.abort();
    info!("slotwise stopped");
    Ok(())
}
