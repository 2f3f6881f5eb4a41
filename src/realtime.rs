//! Realtime power-flow fetching
//!
//! The fetch strategy starts at the primary endpoint. When backup is enabled
//! the first unusable primary payload moves it to the backup endpoint for
//! the rest of the instance's life. Without backup, unusable payloads are
//! replaced by an all-zero reading.

use crate::error::{BridgeError, Result};
use crate::logging::{StructuredLogger, get_device_logger};
use crate::normalize::VendorShapeAdapter;
use crate::vendor::envelope::SUCCESS_CODE;
use crate::vendor::{RealtimeEndpoint, Session, VendorClient};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Which realtime endpoint the fetcher targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    Primary,
    Backup,
}

impl FetchStrategy {
    pub fn endpoint(self) -> RealtimeEndpoint {
        match self {
            Self::Primary => RealtimeEndpoint::Primary,
            Self::Backup => RealtimeEndpoint::Backup,
        }
    }
}

/// Realtime payload of one tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealtimeSnapshot {
    pub code: i64,
    pub info: String,
    pub data: Value,
    /// The payload is the zero substitute, not vendor data
    pub substituted: bool,
}

pub struct RealtimeFetcher {
    client: Arc<dyn VendorClient>,
    adapter: Arc<dyn VendorShapeAdapter>,
    serial: String,
    backup_enabled: bool,
    strategy: FetchStrategy,
    logger: StructuredLogger,
}

impl RealtimeFetcher {
    /// `backup_enabled` is ignored for clients without a backup endpoint
    pub fn new(
        client: Arc<dyn VendorClient>,
        adapter: Arc<dyn VendorShapeAdapter>,
        serial: &str,
        backup_enabled: bool,
    ) -> Self {
        let logger = get_device_logger("realtime", serial);
        let supported = client.supports_backup_realtime();
        if backup_enabled && !supported {
            logger.warn("Backup realtime endpoint requested but not available for this API");
        }
        Self {
            backup_enabled: backup_enabled && supported,
            client,
            adapter,
            serial: serial.to_string(),
            strategy: FetchStrategy::Primary,
            logger,
        }
    }

    pub fn strategy(&self) -> FetchStrategy {
        self.strategy
    }

    pub fn backup_enabled(&self) -> bool {
        self.backup_enabled
    }

    /// One-way transition to the backup endpoint; `true` if it changed
    pub fn switch_to_backup(&mut self) -> bool {
        if self.strategy == FetchStrategy::Backup {
            return false;
        }
        self.strategy = FetchStrategy::Backup;
        true
    }

    /// Fetch the current snapshot.
    ///
    /// Transport failures and vendor rejections are returned as errors and
    /// skip the tick. The switch to backup also skips the tick.
    pub async fn fetch(&mut self, session: &Session) -> Result<RealtimeSnapshot> {
        match self.fetch_once(session).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) if e.is_unusable_payload() => {
                if self.backup_enabled && self.switch_to_backup() {
                    self.logger.warn(&format!(
                        "Primary realtime endpoint returned unusable data ({}), switching to backup permanently",
                        e
                    ));
                    return Err(e);
                }
                self.logger.warn(&format!(
                    "Realtime data unusable ({}), substituting zero readings",
                    e
                ));
                Ok(RealtimeSnapshot {
                    code: SUCCESS_CODE,
                    info: format!("substituted: {}", e),
                    data: self.adapter.zero_realtime(),
                    substituted: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_once(&self, session: &Session) -> Result<RealtimeSnapshot> {
        let endpoint = self.strategy.endpoint();
        let env = self
            .client
            .get_realtime(&self.serial, session, endpoint)
            .await?
            .ensure_success()?;
        let data = match env.data {
            Some(data @ Value::Object(_)) => data,
            Some(other) => {
                return Err(BridgeError::parse(format!(
                    "realtime payload is not an object: {}",
                    other
                )));
            }
            None => return Err(BridgeError::empty_payload("realtime")),
        };
        Ok(RealtimeSnapshot {
            code: env.code,
            info: env.info,
            data,
            substituted: false,
        })
    }
}
