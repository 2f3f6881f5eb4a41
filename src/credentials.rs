//! Credential lifecycle
//!
//! Holds the current access token with its expiry and refresh key, and the
//! signing key for generations that sign requests. Renewal happens at the
//! start of a tick; every failure is logged and leaves the previous state in
//! place so the caller simply skips data fetches until the next tick.

use crate::error::BridgeError;
use crate::logging::{StructuredLogger, get_device_logger};
use crate::vendor::{AuthGrant, CredentialSeed, Session, VendorClient};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Lifetimes beyond ten years are treated as ten years
const MAX_LIFETIME_SECONDS: u64 = 10 * 365 * 24 * 3600;

/// Current access credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    /// Renewal deadline with the safety margin applied; `None` never expires
    pub expires_at: Option<DateTime<Utc>>,
    pub refresh_key: Option<String>,
}

impl Credential {
    /// Build from a vendor grant.
    ///
    /// Grants shorter than the margin are renewed at half their lifetime.
    pub fn from_grant(grant: AuthGrant, now: DateTime<Utc>, safety_margin_seconds: u64) -> Self {
        let expires_at = grant.expires_in.map(|lifetime| {
            let effective = if lifetime > safety_margin_seconds {
                lifetime - safety_margin_seconds
            } else {
                lifetime / 2
            };
            let secs = effective.min(MAX_LIFETIME_SECONDS) as i64;
            now.checked_add_signed(chrono::Duration::seconds(secs))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        });
        Self {
            access_token: grant.access_token,
            expires_at,
            refresh_key: grant.refresh_key,
        }
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && self.expires_at.is_none_or(|at| at > now)
    }
}

/// Credential state for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub usable: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub has_refresh_key: bool,
    pub signing_key_ready: bool,
}

pub struct CredentialManager {
    client: Arc<dyn VendorClient>,
    seed: CredentialSeed,
    safety_margin_seconds: u64,
    credential: Option<Credential>,
    signing_key: Option<String>,
    logger: StructuredLogger,
}

impl CredentialManager {
    pub fn new(
        client: Arc<dyn VendorClient>,
        seed: CredentialSeed,
        safety_margin_seconds: u64,
        serial: &str,
    ) -> Self {
        Self {
            client,
            seed,
            safety_margin_seconds,
            credential: None,
            signing_key: None,
            logger: get_device_logger("credentials", serial),
        }
    }

    /// Precondition gate for signed generations; retried on later ticks
    pub async fn ensure_signing_key(&mut self) -> bool {
        if !self.client.requires_signing_key() || self.signing_key.is_some() {
            return true;
        }
        match self.client.discover_signing_key().await {
            Ok(key) => {
                self.logger.info("Signing key discovered");
                self.signing_key = Some(key);
                true
            }
            Err(e) => {
                self.logger
                    .warn(&format!("Signing key discovery failed, will retry: {}", e));
                false
            }
        }
    }

    /// Make sure a usable credential exists, renewing if needed.
    ///
    /// Returns whether the credential is usable afterwards.
    pub async fn ensure_valid(&mut self, now: DateTime<Utc>) -> bool {
        if !self.ensure_signing_key().await {
            return false;
        }
        if self.is_usable(now) {
            return true;
        }

        let signing_key = self.signing_key.clone();
        let signing_key = signing_key.as_deref();
        let refreshable = self
            .credential
            .as_ref()
            .and_then(|c| c.refresh_key.clone().map(|rk| (c.access_token.clone(), rk)));

        let outcome = match refreshable {
            Some((token, refresh_key)) => {
                self.logger.debug("Refreshing access token");
                match self
                    .client
                    .refresh(&self.seed, &token, &refresh_key, signing_key)
                    .await
                {
                    Err(BridgeError::ExpiredRefreshToken) => {
                        self.logger
                            .warn("Refresh key expired, falling back to a fresh login");
                        if let Some(c) = self.credential.as_mut() {
                            c.refresh_key = None;
                        }
                        self.client.login(&self.seed, signing_key).await
                    }
                    other => other,
                }
            }
            None => {
                self.logger
                    .debug(&format!("Logging in as {}", self.seed.principal()));
                self.client.login(&self.seed, signing_key).await
            }
        };

        match outcome {
            Ok(grant) => {
                let credential = Credential::from_grant(grant, now, self.safety_margin_seconds);
                match credential.expires_at {
                    Some(at) => self
                        .logger
                        .info(&format!("Credential renewed, valid until {}", at.to_rfc3339())),
                    None => self.logger.info("Credential established"),
                }
                self.credential = Some(credential);
            }
            Err(e) => {
                self.logger
                    .warn(&format!("Authentication failed, skipping fetches: {}", e));
            }
        }

        self.is_usable(now)
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.credential.as_ref().is_some_and(|c| c.is_usable(now))
    }

    /// Material for authenticated calls; `None` while unusable
    pub fn session(&self, now: DateTime<Utc>) -> Option<Session> {
        if self.client.requires_signing_key() && self.signing_key.is_none() {
            return None;
        }
        self.credential
            .as_ref()
            .filter(|c| c.is_usable(now))
            .map(|c| Session {
                access_token: c.access_token.clone(),
                signing_key: self.signing_key.clone(),
            })
    }

    /// Force renewal on the next tick after the vendor rejected the token.
    /// The refresh key is kept.
    pub fn invalidate(&mut self) {
        if let Some(c) = self.credential.as_mut() {
            c.expires_at = Some(DateTime::<Utc>::MIN_UTC);
            self.logger.info("Credential invalidated by vendor rejection");
        }
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn status(&self, now: DateTime<Utc>) -> CredentialStatus {
        CredentialStatus {
            usable: self.is_usable(now),
            expires_at: self.credential.as_ref().and_then(|c| c.expires_at),
            has_refresh_key: self
                .credential
                .as_ref()
                .is_some_and(|c| c.refresh_key.is_some()),
            signing_key_ready: !self.client.requires_signing_key() || self.signing_key.is_some(),
        }
    }
}
