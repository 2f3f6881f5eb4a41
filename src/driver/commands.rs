use super::{BridgeDriver, CacheStatus, DriverCommand, DriverStatus, QueryResponse};
use crate::config::OperatingMode;
use crate::error::{BridgeError, Result};
use crate::vendor::{QueryRequest, Session};
use chrono::{DateTime, Utc};
use serde_json::Value;

impl BridgeDriver {
    pub(crate) async fn handle_command(&mut self, cmd: DriverCommand) {
        let now = Utc::now();
        match cmd {
            DriverCommand::Query { request, reply } => {
                let result = self.run_query(request, now).await;
                if let Err(e) = &result {
                    self.logger.warn(&format!("Query rejected: {}", e));
                }
                let _ = reply.send(result);
            }
            DriverCommand::ListSystems { reply } => {
                let _ = reply.send(self.list_systems(now).await);
            }
            DriverCommand::Status { reply } => {
                let _ = reply.send(self.status(now));
            }
        }
    }

    async fn authorized_session(&mut self, now: DateTime<Utc>) -> Result<Session> {
        self.config.validate_credentials()?;
        if !self.credentials.ensure_valid(now).await {
            return Err(BridgeError::auth(0, "no usable credential"));
        }
        self.credentials
            .session(now)
            .ok_or_else(|| BridgeError::auth(0, "no usable credential"))
    }

    /// Pass an ad-hoc request to the vendor and return its `data` verbatim.
    ///
    /// Only misuse (wrong mode, missing serial or credential seed, malformed
    /// command) is an error. Vendor-side failures are logged and answered
    /// with `data: null`.
    pub(crate) async fn run_query(
        &mut self,
        request: QueryRequest,
        now: DateTime<Utc>,
    ) -> Result<QueryResponse> {
        if self.config.mode != OperatingMode::Manual {
            return Err(BridgeError::validation(
                "mode",
                "ad-hoc queries are only accepted in manual mode",
            ));
        }
        if self.serial().is_empty() {
            return Err(BridgeError::config("device.serial is required for queries"));
        }
        self.config.validate_credentials()?;
        request.validate()?;

        self.logger.debug(&format!(
            "Query {} {:?} {}",
            request.id, request.method, request.command
        ));
        let data = match self.forward_query(&request, now).await {
            Ok(data) => data,
            Err(e) => {
                self.logger.warn(&format!(
                    "Query {} {} failed: {}",
                    request.id, request.command, e
                ));
                Value::Null
            }
        };
        Ok(QueryResponse { request, data })
    }

    async fn forward_query(&mut self, request: &QueryRequest, now: DateTime<Utc>) -> Result<Value> {
        let session = self.authorized_session(now).await?;
        let serial = self.serial().to_string();
        let env = self
            .client
            .query(&session, request, Some(&serial))
            .await?
            .ensure_success()?;
        Ok(env.data.unwrap_or(Value::Null))
    }

    pub(crate) async fn list_systems(&mut self, now: DateTime<Utc>) -> Result<Vec<Value>> {
        let session = self.authorized_session(now).await?;
        self.client.list_systems(&session).await
    }

    pub fn status(&self, now: DateTime<Utc>) -> DriverStatus {
        DriverStatus {
            state: *self.state.borrow(),
            mode: self.config.mode,
            generation: self.config.api.generation,
            serial: self.serial().to_string(),
            strategy: self.fetcher.strategy(),
            backup_enabled: self.fetcher.backup_enabled(),
            credential: self.credentials.status(now),
            caches: self
                .caches
                .iter()
                .map(|c| {
                    let snap = c.snapshot();
                    CacheStatus {
                        granularity: c.granularity(),
                        cadence_minutes: c.cadence().num_minutes(),
                        warm: snap.last_refreshed_at.is_some(),
                        last_refreshed_at: snap.last_refreshed_at,
                    }
                })
                .collect(),
            refreshes_in_flight: self.refreshes.iter().filter(|h| !h.is_finished()).count(),
            counters: self.counters.clone(),
        }
    }
}
