use alphaess_bridge::config::Config;
use alphaess_bridge::driver::BridgeDriver;
use alphaess_bridge::logging::{get_logger, init_logging};
use alphaess_bridge::sink::{OutputSink, StdoutSink};
use alphaess_bridge::vendor;
use alphaess_bridge::web::{self, AppState};
use anyhow::{Context, Result};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    init_logging(&config.logging).context("Failed to initialize logging")?;
    let logger = get_logger("main");
    config.validate().context("Invalid configuration")?;

    logger.info(&format!(
        "AlphaESS bridge {} starting up (generation={}, serial={})",
        env!("APP_VERSION"),
        config.api.generation.as_str(),
        config.device.serial
    ));

    let client = vendor::build_client(&config).context("Failed to build vendor client")?;

    let mut sinks: Vec<Arc<dyn OutputSink>> = Vec::new();
    if config.stdout_sink {
        sinks.push(Arc::new(StdoutSink::new()));
    }

    let (mut driver, handle) = BridgeDriver::new(config.clone(), client, sinks);

    let web_task = if config.web.enabled {
        let state = AppState {
            driver: handle.clone(),
            config: Arc::new(config.clone()),
        };
        let host = config.web.host.clone();
        let port = config.web.port;
        let stop = handle.clone();
        Some(tokio::spawn(async move {
            let shutdown = async move { stop.stopped().await };
            if let Err(e) = web::serve(state, &host, port, shutdown).await {
                get_logger("web").error(&format!("Web server error: {}", e));
            }
        }))
    } else {
        None
    };

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            get_logger("main").info("Interrupt received, shutting down");
            signal_handle.shutdown();
        }
    });

    let result = driver.run().await;
    drop(driver);

    if let Some(task) = web_task {
        if tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .is_err()
        {
            logger.warn("Web server did not stop in time");
        }
    }

    match result {
        Ok(()) => {
            logger.info("Driver shutdown complete");
            Ok(())
        }
        Err(e) => {
            logger.error(&format!("Driver failed with error: {}", e));
            Err(anyhow::anyhow!("Driver error: {}", e))
        }
    }
}
