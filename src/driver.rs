//! Poll scheduler for the AlphaESS bridge
//!
//! One driver per device. It owns the credential manager, the realtime
//! fetcher and the statistics caches, runs ticks on a fixed interval in
//! automatic mode and answers commands from the web surface through a
//! [`DriverHandle`].

use crate::config::{Config, OperatingMode};
use crate::credentials::CredentialManager;
use crate::error::{BridgeError, Result};
use crate::logging::{StructuredLogger, get_device_logger};
use crate::normalize::{OutputDocument, VendorShapeAdapter, build_adapter};
use crate::realtime::RealtimeFetcher;
use crate::sink::{BroadcastSink, OutputSink};
use crate::stats::StatCacheSet;
use crate::vendor::{CredentialSeed, QueryRequest, VendorClient};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

mod commands;
mod tick;
pub mod types;

pub use types::{
    CacheStatus, DriverCommand, DriverState, DriverStatus, QueryResponse, TickCounters,
};

/// Orchestrator bound to one device and account
pub struct BridgeDriver {
    config: Config,
    tz: chrono_tz::Tz,
    client: Arc<dyn VendorClient>,
    adapter: Arc<dyn VendorShapeAdapter>,
    credentials: CredentialManager,
    fetcher: RealtimeFetcher,
    caches: StatCacheSet,
    sinks: Vec<Arc<dyn OutputSink>>,
    state: watch::Sender<DriverState>,
    counters: TickCounters,
    /// Detached statistics refreshes
    refreshes: Vec<JoinHandle<bool>>,
    closed: Arc<AtomicBool>,
    commands_rx: mpsc::UnboundedReceiver<DriverCommand>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,
    logger: StructuredLogger,
}

impl BridgeDriver {
    /// Wire a driver and its handle. Every document goes to the handle's
    /// broadcast sink and to `extra_sinks`.
    pub fn new(
        config: Config,
        client: Arc<dyn VendorClient>,
        extra_sinks: Vec<Arc<dyn OutputSink>>,
    ) -> (Self, DriverHandle) {
        let serial = config.device.serial.trim().to_string();
        let logger = get_device_logger("driver", &serial);

        let adapter = build_adapter(config.api.generation, config.today_formula());
        let seed = CredentialSeed::from_config(&config.credentials, config.api.generation);
        let credentials = CredentialManager::new(
            client.clone(),
            seed,
            config.credentials.safety_margin_seconds,
            &serial,
        );
        let fetcher = RealtimeFetcher::new(
            client.clone(),
            adapter.clone(),
            &serial,
            config.api.backup_realtime,
        );

        let cadences = config
            .statistics
            .cadences()
            .into_iter()
            .filter(|(g, _)| {
                let ok = client.supports_granularity(*g);
                if !ok {
                    logger.warn(&format!(
                        "The {} API has no {} statistics, disabling that cache",
                        config.api.generation.as_str(),
                        g
                    ));
                }
                ok
            })
            .collect::<Vec<_>>();
        let caches = StatCacheSet::new(cadences);

        let broadcast = BroadcastSink::default();
        let mut sinks: Vec<Arc<dyn OutputSink>> = vec![Arc::new(broadcast.clone())];
        sinks.extend(extra_sinks);

        let (state_tx, state_rx) = watch::channel(DriverState::Idle);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

        logger.info(&format!(
            "Driver created: generation={}, mode={:?}, caches={:?}",
            config.api.generation.as_str(),
            config.mode,
            caches.granularities()
        ));

        let driver = Self {
            tz: config.tz(),
            config,
            client,
            adapter,
            credentials,
            fetcher,
            caches,
            sinks,
            state: state_tx,
            counters: TickCounters::default(),
            refreshes: Vec::new(),
            closed: Arc::new(AtomicBool::new(false)),
            commands_rx,
            shutdown_rx,
            logger,
        };
        let handle = DriverHandle {
            commands_tx,
            shutdown_tx,
            state_rx,
            broadcast,
        };
        (driver, handle)
    }

    pub fn serial(&self) -> &str {
        self.config.device.serial.trim()
    }

    pub fn caches(&self) -> &StatCacheSet {
        &self.caches
    }

    pub fn counters(&self) -> &TickCounters {
        &self.counters
    }

    /// Run until shutdown is requested
    pub async fn run(&mut self) -> Result<()> {
        self.logger.info("Starting driver main loop");

        match self.config.mode {
            OperatingMode::Automatic => {
                // first tick fires immediately
                let mut ticker = interval(self.config.poll_interval());
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            self.tick(chrono::Utc::now()).await;
                        }
                        // closed channels disable their branch; polling goes on
                        Some(cmd) = self.commands_rx.recv() => {
                            self.handle_command(cmd).await;
                        }
                        Some(()) = self.shutdown_rx.recv() => {
                            self.logger.info("Shutdown signal received");
                            break;
                        }
                    }
                }
            }
            OperatingMode::Manual => {
                self.logger.info("Manual mode: waiting for queries");
                loop {
                    tokio::select! {
                        Some(cmd) = self.commands_rx.recv() => {
                            self.handle_command(cmd).await;
                        }
                        Some(()) = self.shutdown_rx.recv() => {
                            self.logger.info("Shutdown signal received");
                            break;
                        }
                        else => {
                            self.logger.info("All handles dropped; no queries can arrive");
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Stop accepting refresh results. In-flight refreshes are detached.
    pub(crate) fn shutdown(&mut self) {
        self.state.send_replace(DriverState::ShuttingDown);
        self.closed.store(true, Ordering::SeqCst);
        let detached = self.refreshes.drain(..).filter(|h| !h.is_finished()).count();
        self.logger.info(&format!(
            "Driver shutdown complete ({} refreshes detached)",
            detached
        ));
    }

    /// Await every refresh launched so far
    pub async fn wait_for_refreshes(&mut self) {
        for handle in self.refreshes.drain(..) {
            if let Err(e) = handle.await {
                self.logger
                    .warn(&format!("Statistics refresh task failed: {}", e));
            }
        }
    }
}

/// Cloneable access to a running driver
#[derive(Clone)]
pub struct DriverHandle {
    commands_tx: mpsc::UnboundedSender<DriverCommand>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    state_rx: watch::Receiver<DriverState>,
    broadcast: BroadcastSink,
}

impl DriverHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> DriverCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands_tx
            .send(make(tx))
            .map_err(|_| BridgeError::web("driver is not running"))?;
        rx.await
            .map_err(|_| BridgeError::web("driver dropped the request"))
    }

    /// Ad-hoc vendor query; only accepted in manual mode
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse> {
        self.request(|reply| DriverCommand::Query { request, reply })
            .await?
    }

    pub async fn list_systems(&self) -> Result<Vec<Value>> {
        self.request(|reply| DriverCommand::ListSystems { reply })
            .await?
    }

    pub async fn status(&self) -> Result<DriverStatus> {
        self.request(|reply| DriverCommand::Status { reply }).await
    }

    pub fn state(&self) -> DriverState {
        *self.state_rx.borrow()
    }

    /// Resolve once the driver is shutting down or gone
    pub async fn stopped(&self) {
        let mut rx = self.state_rx.clone();
        let _ = rx.wait_for(|s| *s == DriverState::ShuttingDown).await;
    }

    pub fn latest_document(&self) -> Option<Arc<OutputDocument>> {
        self.broadcast.latest()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<OutputDocument>> {
        self.broadcast.subscribe()
    }

    pub fn shutdown(&self) {
        self.shutdown_tx.send(()).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiGeneration;
    use crate::error::BridgeError;
    use crate::stats::Granularity;
    use crate::vendor::scripted::ScriptedClient;
    use crate::vendor::{AuthGrant, QueryMethod, VendorEnvelope};
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 3, 12, 0, 0).unwrap()
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.device.serial = "AL001".into();
        config.credentials.username = "user".into();
        config.credentials.password = "secret".into();
        config.stdout_sink = false;
        config
    }

    fn login(client: &ScriptedClient) {
        client.push_login(Ok(AuthGrant {
            access_token: "tok".into(),
            expires_in: Some(7200),
            refresh_key: Some("rk".into()),
        }));
    }

    fn realtime(client: &ScriptedClient, data: Value) {
        client.push_realtime(Ok(VendorEnvelope {
            code: 200,
            info: "Success".into(),
            data: Some(data),
        }));
    }

    fn scenario_realtime() -> Value {
        json!({
            "ppv1": 100, "ppv2": 0, "ppv3": 0, "ppv4": 0,
            "pmeter_l1": 20, "pmeter_l2": 0, "pmeter_l3": 0,
            "pbat": -10, "soc": 80
        })
    }

    fn driver(client: &Arc<ScriptedClient>, config: Config) -> (BridgeDriver, DriverHandle) {
        BridgeDriver::new(config, client.clone(), Vec::new())
    }

    #[tokio::test]
    async fn emits_only_after_every_cache_is_warm() {
        let client = Arc::new(ScriptedClient::legacy());
        login(&client);
        realtime(&client, scenario_realtime());
        realtime(&client, scenario_realtime());
        client.push_statistics(Granularity::Hourly, Err(BridgeError::transport("timeout")));
        client.push_statistics(Granularity::Daily, Ok(json!({"Eloads": [0.0, 0.0, 15.0]})));
        client.push_statistics(Granularity::Monthly, Ok(json!({"months": []})));
        client.push_statistics(Granularity::Yearly, Ok(json!([])));
        let (mut d, handle) = driver(&client, config());

        assert!(d.tick(t0()).await.is_none());
        d.wait_for_refreshes().await;
        assert!(!d.caches().all_warm());

        // hourly still cold: retried, still no document
        let t1 = t0() + chrono::Duration::seconds(60);
        assert!(d.tick(t1).await.is_none());
        assert!(handle.latest_document().is_none());
        d.wait_for_refreshes().await;
        assert_eq!(client.count("statistics:hourly"), 2);
        assert_eq!(client.count("statistics:daily"), 1);
    }

    #[tokio::test]
    async fn scenario_document_after_warmup() {
        let client = Arc::new(ScriptedClient::legacy());
        login(&client);
        realtime(&client, scenario_realtime());
        realtime(&client, scenario_realtime());
        client.push_statistics(Granularity::Hourly, Ok(json!([])));
        client.push_statistics(Granularity::Daily, Ok(json!({"Eloads": [0.0, 0.0, 15.0]})));
        client.push_statistics(Granularity::Monthly, Ok(json!([])));
        client.push_statistics(Granularity::Yearly, Ok(json!([])));
        let (mut d, handle) = driver(&client, config());
        let mut rx = handle.subscribe();

        assert!(d.tick(t0()).await.is_none());
        d.wait_for_refreshes().await;

        let doc = d
            .tick(t0() + chrono::Duration::seconds(60))
            .await
            .expect("document after warm-up");
        assert_eq!(doc.payload.consumption, 110.0);
        assert_eq!(doc.payload.grid, 20.0);
        assert_eq!(doc.payload.modules, 100.0);
        assert_eq!(doc.payload.battery.soc, 80.0);
        assert_eq!(doc.payload.battery.load, -10.0);
        assert_eq!(doc.payload.today.consumption, 15.0);

        assert_eq!(rx.recv().await.unwrap().payload.consumption, 110.0);
        assert_eq!(handle.latest_document().unwrap().payload.grid, 20.0);
        assert_eq!(client.count("login"), 1);
        assert_eq!(d.counters().documents, 1);
        assert_eq!(d.counters().skipped, 1);
    }

    #[tokio::test]
    async fn no_credential_skips_fetch() {
        let client = Arc::new(ScriptedClient::legacy());
        client.push_login(Err(BridgeError::transport("dns")));
        let (mut d, _handle) = driver(&client, config());

        assert!(d.tick(t0()).await.is_none());
        assert_eq!(client.calls(), vec!["login"]);
    }

    #[tokio::test]
    async fn vendor_401_invalidates_credential() {
        let client = Arc::new(ScriptedClient::legacy());
        login(&client);
        client.push_realtime(Ok(VendorEnvelope::from_http_status(401, "Unauthorized")));
        client.push_refresh(Ok(AuthGrant {
            access_token: "tok2".into(),
            expires_in: Some(7200),
            refresh_key: Some("rk2".into()),
        }));
        let (mut d, _handle) = driver(&client, config());

        assert!(d.tick(t0()).await.is_none());
        assert!(d.tick(t0() + chrono::Duration::seconds(60)).await.is_none());
        let calls = client.calls();
        assert_eq!(&calls[..3], &["login", "realtime:primary", "refresh:rk"]);
        // no statistics launched after a failed realtime fetch
        assert_eq!(client.count("statistics"), 0);
    }

    #[test]
    fn default_caches_follow_generation_support() {
        let client = Arc::new(ScriptedClient::legacy());
        let (d, _handle) = driver(&client, config());
        assert_eq!(
            d.caches().granularities(),
            vec![
                Granularity::Hourly,
                Granularity::Daily,
                Granularity::Monthly,
                Granularity::Yearly
            ]
        );
        assert_eq!(
            d.caches().get(Granularity::Yearly).unwrap().cadence(),
            chrono::Duration::minutes(1440)
        );

        let mut cfg = config();
        cfg.api.generation = ApiGeneration::OpenApi;
        cfg.credentials.app_id = "alpha123".into();
        cfg.credentials.app_secret = "s3cr3t".into();
        let client = crate::vendor::build_client(&cfg).unwrap();
        let (d, _handle) = BridgeDriver::new(cfg, client, Vec::new());
        assert_eq!(
            d.caches().granularities(),
            vec![Granularity::Hourly, Granularity::Daily]
        );
    }

    #[tokio::test]
    async fn disabled_granularities_do_not_gate() {
        let client = Arc::new(ScriptedClient::legacy());
        login(&client);
        realtime(&client, json!({"pbat": 5}));
        let mut cfg = config();
        cfg.statistics.hourly_minutes = None;
        cfg.statistics.daily_minutes = None;
        cfg.statistics.monthly_minutes = None;
        cfg.statistics.yearly_minutes = None;
        let (mut d, _handle) = driver(&client, cfg);

        let doc = d.tick(t0()).await.unwrap();
        assert_eq!(doc.payload.consumption, 5.0);
        assert_eq!(doc.payload.grid, 0.0);
        assert_eq!(doc.payload.modules, 0.0);
    }

    #[tokio::test]
    async fn query_is_rejected_in_automatic_mode() {
        let client = Arc::new(ScriptedClient::legacy());
        let (mut d, _handle) = driver(&client, config());
        let err = d
            .run_query(QueryRequest::new(QueryMethod::Get, "getEssList", None), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Validation { .. }));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn manual_query_without_serial_is_config_error() {
        let client = Arc::new(ScriptedClient::legacy());
        let mut cfg = config();
        cfg.mode = OperatingMode::Manual;
        cfg.device.serial = String::new();
        let (mut d, _handle) = driver(&client, cfg);

        let err = d
            .run_query(
                QueryRequest::new(QueryMethod::Get, "getLastPowerData", None),
                t0(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Config { .. }));
    }

    #[tokio::test]
    async fn manual_query_returns_request_and_data() {
        let client = Arc::new(ScriptedClient::legacy());
        login(&client);
        let mut cfg = config();
        cfg.mode = OperatingMode::Manual;
        let (mut d, _handle) = driver(&client, cfg);

        let request = QueryRequest::new(QueryMethod::Get, "ESS/GetChargeConfigInfo", None);
        let resp = d.run_query(request.clone(), t0()).await.unwrap();
        assert_eq!(resp.request, request);
        assert_eq!(
            resp.data,
            json!({"command": "ESS/GetChargeConfigInfo", "serial": "AL001"})
        );
    }

    #[tokio::test]
    async fn manual_query_vendor_failure_yields_null_data() {
        let client = Arc::new(ScriptedClient::legacy());
        client.push_login(Err(BridgeError::transport("connection refused")));
        let mut cfg = config();
        cfg.mode = OperatingMode::Manual;
        let (mut d, _handle) = driver(&client, cfg);

        let request = QueryRequest::new(QueryMethod::Get, "ESS/GetChargeConfigInfo", None);
        let resp = d.run_query(request.clone(), t0()).await.unwrap();
        assert_eq!(resp.request, request);
        assert_eq!(resp.data, Value::Null);
        assert_eq!(client.count("query"), 0);
    }

    #[tokio::test]
    async fn manual_query_without_credential_seed_is_config_error() {
        let client = Arc::new(ScriptedClient::legacy());
        let mut cfg = config();
        cfg.mode = OperatingMode::Manual;
        cfg.credentials.password = String::new();
        let (mut d, _handle) = driver(&client, cfg);

        let err = d
            .run_query(QueryRequest::new(QueryMethod::Get, "getEssList", None), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Config { .. }));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn handle_round_trips_through_run_loop() {
        let client = Arc::new(ScriptedClient::legacy());
        login(&client);
        let mut cfg = config();
        cfg.mode = OperatingMode::Manual;
        let (mut d, handle) = driver(&client, cfg);
        let task = tokio::spawn(async move { d.run().await });

        let status = handle.status().await.unwrap();
        assert_eq!(status.mode, OperatingMode::Manual);
        assert_eq!(status.generation, ApiGeneration::Legacy);
        assert_eq!(status.caches.len(), 4);

        let systems = handle.list_systems().await.unwrap();
        assert_eq!(systems, vec![json!({"sysSn": "AL001"})]);

        handle.shutdown();
        task.await.unwrap().unwrap();
        handle.stopped().await;
        assert_eq!(handle.state(), DriverState::ShuttingDown);
        assert!(handle.status().await.is_err());
    }

    #[tokio::test]
    async fn automatic_loop_outlives_dropped_handles() {
        let client = Arc::new(ScriptedClient::legacy());
        login(&client);
        for _ in 0..3 {
            realtime(&client, json!({}));
        }
        let mut cfg = config();
        cfg.poll_interval_seconds = 1;
        cfg.statistics.hourly_minutes = None;
        cfg.statistics.daily_minutes = None;
        cfg.statistics.monthly_minutes = None;
        cfg.statistics.yearly_minutes = None;
        let (mut d, handle) = driver(&client, cfg);
        let task = tokio::spawn(async move { d.run().await });

        drop(handle);
        // first tick is immediate, the second lands one second later
        tokio::time::sleep(std::time::Duration::from_millis(1300)).await;
        assert!(!task.is_finished());
        assert!(client.count("realtime") >= 2);
        task.abort();
    }

    #[tokio::test]
    async fn manual_loop_ends_when_handles_are_dropped() {
        let client = Arc::new(ScriptedClient::legacy());
        let mut cfg = config();
        cfg.mode = OperatingMode::Manual;
        let (mut d, handle) = driver(&client, cfg);
        let task = tokio::spawn(async move { d.run().await });

        drop(handle);
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("manual loop ends")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_discards_late_refreshes() {
        let client = Arc::new(ScriptedClient::legacy());
        login(&client);
        realtime(&client, json!({}));
        client.push_statistics(Granularity::Hourly, Ok(json!([])));
        client.push_statistics(Granularity::Daily, Ok(json!({})));
        client.push_statistics(Granularity::Monthly, Ok(json!([])));
        client.push_statistics(Granularity::Yearly, Ok(json!([])));
        let (mut d, _handle) = driver(&client, config());

        // close before the spawned refreshes get to run
        d.closed.store(true, Ordering::SeqCst);
        d.tick(t0()).await;
        d.wait_for_refreshes().await;
        assert!(!d.caches().all_warm());
    }
}
