//! AlphaESS cloud API clients
//!
//! The poller only sees the [`VendorClient`] capability. Each API generation
//! gets its own implementation that knows the endpoint paths, request bodies
//! and authentication headers of that generation.

use crate::config::{ApiGeneration, Config, CredentialsConfig};
use crate::error::{BridgeError, Result};
use crate::stats::Granularity;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub mod envelope;
pub mod open_api;
pub mod portal;
pub mod session;
pub mod signing;

pub use envelope::VendorEnvelope;
pub use open_api::OpenApiClient;
pub use portal::PortalClient;
pub use session::LegacySessionClient;

/// Secret material a login is performed with
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSeed {
    /// Portal account
    Account { username: String, password: String },
    /// Open API application
    App { app_id: String, app_secret: String },
}

impl CredentialSeed {
    pub fn from_config(credentials: &CredentialsConfig, generation: ApiGeneration) -> Self {
        if generation.uses_account_login() {
            Self::Account {
                username: credentials.username.clone(),
                password: credentials.password.clone(),
            }
        } else {
            Self::App {
                app_id: credentials.app_id.clone(),
                app_secret: credentials.app_secret.clone(),
            }
        }
    }

    /// Account name or app id, used for refresh bodies and log lines
    pub fn principal(&self) -> &str {
        match self {
            Self::Account { username, .. } => username,
            Self::App { app_id, .. } => app_id,
        }
    }
}

impl std::fmt::Debug for CredentialSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Account { username, .. } => f
                .debug_struct("Account")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::App { app_id, .. } => f
                .debug_struct("App")
                .field("app_id", app_id)
                .finish_non_exhaustive(),
        }
    }
}

/// Successful login or refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    pub access_token: String,
    /// Lifetime in seconds; `None` for credentials that never expire
    pub expires_in: Option<u64>,
    pub refresh_key: Option<String>,
}

/// Material attached to authenticated calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub signing_key: Option<String>,
}

/// Which realtime endpoint to call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RealtimeEndpoint {
    Primary,
    Backup,
}

/// HTTP verb of an ad-hoc query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryMethod {
    Get,
    Post,
}

/// Ad-hoc query issued in manual mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub id: uuid::Uuid,
    pub method: QueryMethod,
    /// Vendor function name, e.g. `getOneDateEnergyBySn`
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl QueryRequest {
    pub fn new(method: QueryMethod, command: &str, payload: Option<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            method,
            command: command.trim().to_string(),
            payload,
        }
    }

    /// Reject commands that would escape the API base path
    pub fn validate(&self) -> Result<()> {
        let ok = !self.command.is_empty()
            && self
                .command
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '/' || c == '_' || c == '-')
            && !self.command.starts_with('/')
            && !self.command.contains("//");
        if !ok {
            return Err(BridgeError::validation(
                "command",
                "Command must be a relative vendor function name",
            ));
        }
        if self.method == QueryMethod::Post {
            if let Some(payload) = &self.payload {
                if !payload.is_object() {
                    return Err(BridgeError::validation(
                        "payload",
                        "POST payload must be a JSON object",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Capability set of a vendor API generation
#[async_trait::async_trait]
pub trait VendorClient: Send + Sync {
    fn generation(&self) -> ApiGeneration;

    /// Whether authenticated calls need a discovered signing key
    fn requires_signing_key(&self) -> bool {
        false
    }

    /// One-time bootstrap that discovers the signing secret
    async fn discover_signing_key(&self) -> Result<String> {
        Err(BridgeError::config(format!(
            "the {} generation has no signing key bootstrap",
            self.generation().as_str()
        )))
    }

    fn supports_backup_realtime(&self) -> bool {
        false
    }

    fn supports_granularity(&self, granularity: Granularity) -> bool;

    async fn login(&self, seed: &CredentialSeed, signing_key: Option<&str>) -> Result<AuthGrant>;

    /// Renew a session; `ExpiredRefreshToken` when the refresh key is dead
    async fn refresh(
        &self,
        seed: &CredentialSeed,
        access_token: &str,
        refresh_key: &str,
        signing_key: Option<&str>,
    ) -> Result<AuthGrant>;

    /// Raw realtime envelope; callers decide what a missing payload means
    async fn get_realtime(
        &self,
        serial: &str,
        session: &Session,
        endpoint: RealtimeEndpoint,
    ) -> Result<VendorEnvelope>;

    /// Statistics payload for one granularity around `date`
    async fn get_statistics(
        &self,
        serial: &str,
        session: &Session,
        granularity: Granularity,
        date: NaiveDate,
    ) -> Result<Value>;

    async fn list_systems(&self, session: &Session) -> Result<Vec<Value>>;

    /// Pass-through call for manual mode
    async fn query(
        &self,
        session: &Session,
        request: &QueryRequest,
        serial: Option<&str>,
    ) -> Result<VendorEnvelope>;
}

/// Build the client for the configured generation
pub fn build_client(config: &Config) -> Result<Arc<dyn VendorClient>> {
    let timeout = Duration::from_secs(config.api.timeout_seconds.max(1));
    let base = config.api.base_url.as_deref();
    let client: Arc<dyn VendorClient> = match config.api.generation {
        ApiGeneration::Legacy => Arc::new(LegacySessionClient::new(
            base.unwrap_or(session::LEGACY_BASE_URL),
            timeout,
            config.credentials.refresh_expired_codes.clone(),
        )?),
        ApiGeneration::Portal => Arc::new(PortalClient::new(
            base.unwrap_or(portal::PORTAL_BASE_URL),
            timeout,
            config.api.signing.clone(),
            config.credentials.refresh_expired_codes.clone(),
        )?),
        ApiGeneration::OpenApi => Arc::new(OpenApiClient::new(
            base.unwrap_or(open_api::OPEN_API_BASE_URL),
            timeout,
            &config.credentials.app_id,
            &config.credentials.app_secret,
        )?),
    };
    Ok(client)
}

/// Shared reqwest plumbing for the HTTP clients
#[derive(Debug, Clone)]
pub(crate) struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub(crate) fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("alphaess-bridge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let mut base_url = base_url.trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self { client, base_url })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(self.url(path))
    }

    pub(crate) fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(self.url(path))
    }

    /// Fetch an absolute URL as text (signing-key assets)
    pub(crate) async fn fetch_text(&self, url: &str) -> Result<String> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(BridgeError::transport(format!(
                "GET {} returned {}",
                url,
                resp.status()
            )));
        }
        Ok(resp.text().await?)
    }

    /// Send a request and decode the vendor envelope.
    ///
    /// Non-2xx statuses without a vendor body become an envelope carrying the
    /// HTTP status as code.
    pub(crate) async fn send(&self, request: reqwest::RequestBuilder) -> Result<VendorEnvelope> {
        let resp = request.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if status.is_success() {
            return VendorEnvelope::from_body(&body);
        }
        match VendorEnvelope::from_body(&body) {
            Ok(env) if !env.is_success() => Ok(env),
            _ => Ok(VendorEnvelope::from_http_status(
                status.as_u16(),
                status.canonical_reason().unwrap_or("HTTP error"),
            )),
        }
    }
}

/// Flatten the scalar members of a payload object into query parameters
pub(crate) fn payload_query_params(payload: Option<&Value>) -> Vec<(String, String)> {
    let Some(Value::Object(map)) = payload else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(k, v)| {
            let s = match v {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((k.clone(), s))
        })
        .collect()
}

/// POST body of an ad-hoc query with the serial injected under `key`
pub(crate) fn body_with_serial(payload: Option<&Value>, key: &str, serial: Option<&str>) -> Value {
    let mut body = match payload {
        Some(Value::Object(map)) => map.clone(),
        _ => serde_json::Map::new(),
    };
    if let Some(serial) = serial {
        body.entry(key.to_string())
            .or_insert_with(|| Value::String(serial.to_string()));
    }
    Value::Object(body)
}

/// Query parameters of an ad-hoc GET with the serial first
pub(crate) fn params_with_serial(
    payload: Option<&Value>,
    key: &str,
    serial: Option<&str>,
) -> Vec<(String, String)> {
    let mut params = payload_query_params(payload);
    if let Some(serial) = serial {
        if !params.iter().any(|(k, _)| k == key) {
            params.insert(0, (key.to_string(), serial.to_string()));
        }
    }
    params
}

/// Statistics payloads arrive as objects or arrays; anything else is unusable
pub(crate) fn require_statistics(value: Value, endpoint: &str) -> Result<Value> {
    match value {
        Value::Object(_) | Value::Array(_) => Ok(value),
        Value::Null => Err(BridgeError::empty_payload(endpoint)),
        other => Err(BridgeError::parse(format!(
            "{} returned a non-structured payload: {}",
            endpoint, other
        ))),
    }
}

/// Build an [`AuthGrant`] from a login/refresh payload.
///
/// Generations differ in key casing (`AccessToken` vs `accessToken`).
pub(crate) fn grant_from_data(data: &Value) -> Result<AuthGrant> {
    let pick = |keys: &[&str]| keys.iter().find_map(|k| data.get(*k)).cloned();

    let access_token = pick(&["AccessToken", "accessToken", "token"])
        .and_then(|v| v.as_str().map(str::to_string))
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BridgeError::parse("login payload lacks an access token"))?;
    let expires_in = pick(&["ExpiresIn", "expiresIn"]).and_then(|v| {
        v.as_u64()
            .or_else(|| v.as_f64().map(|f| f.max(0.0) as u64))
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
    });
    let refresh_key = pick(&["RefreshTokenKey", "refreshTokenKey"])
        .and_then(|v| v.as_str().map(str::to_string))
        .filter(|s| !s.is_empty());

    Ok(AuthGrant {
        access_token,
        expires_in,
        refresh_key,
    })
}

#[cfg(test)]
pub(crate) mod scripted;
