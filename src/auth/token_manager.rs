// Token lifecycle management: credential loading (JSON file or kiro-cli
// SQLite), refresh-ahead-of-expiry with two auth flavors, and writeback of
// refreshed credentials to the original source.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use rusqlite::Connection;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::types::{
    AuthError, AuthType, AwsSsoOidcRefreshResponse, DeviceRegistration, FileCredentials,
    KiroDesktopRefreshResponse, SqliteTokenData,
};
use crate::config::{get_aws_sso_oidc_url, get_kiro_api_host, get_kiro_refresh_url, Config};
use crate::utils::get_machine_fingerprint;

/// SQLite token keys, searched in priority order.
pub const SQLITE_TOKEN_KEYS: &[&str] = &[
    "kirocli:social:token",
    "kirocli:odic:token",
    "codewhisperer:odic:token",
];

/// SQLite device-registration keys, searched in priority order.
pub const SQLITE_REGISTRATION_KEYS: &[&str] = &[
    "kirocli:odic:device-registration",
    "codewhisperer:odic:device-registration",
];

struct Inner {
    refresh_token: Option<String>,
    access_token: Option<String>,
    profile_arn: Option<String>,
    region: String,
    creds_file: Option<String>,
    sqlite_db: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    scopes: Option<Vec<String>>,
    sso_region: Option<String>,
    sqlite_token_key: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    auth_type: AuthType,
    refresh_threshold: i64,
    refresh_url: String,
    api_host: String,
    fingerprint: String,
    http_client: Client,
}

/// Thread-safe token manager. The lock covers the whole
/// read-check-refresh-return sequence: the refresh call happens while the
/// lock is held, so concurrent requests wait for one refresh instead of
/// racing their own.
pub struct TokenManager {
    inner: Mutex<Inner>,
}

impl Inner {
    fn detect_auth_type(&mut self) {
        if self.client_id.is_some() && self.client_secret.is_some() {
            self.auth_type = AuthType::AwsSsoOidc;
            info!("Detected auth type: AWS SSO OIDC (kiro-cli)");
        } else {
            self.auth_type = AuthType::KiroDesktop;
            info!("Detected auth type: Kiro Desktop");
        }
    }

    fn load_credentials_from_sqlite(&mut self, db_path: &str) {
        let path = match expand_path(db_path) {
            Some(p) => p,
            None => {
                warn!("SQLite database path expansion failed: {}", db_path);
                return;
            }
        };
        if !path.exists() {
            warn!("SQLite database not found: {}", db_path);
            return;
        }

        let conn = match Connection::open(&path) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to open SQLite database: {}", e);
                return;
            }
        };

        for key in SQLITE_TOKEN_KEYS {
            match conn.query_row(
                "SELECT value FROM auth_kv WHERE key = ?1",
                [key],
                |row| row.get::<_, String>(0),
            ) {
                Ok(value) => {
                    self.sqlite_token_key = Some(key.to_string());
                    debug!("Loaded credentials from SQLite key: {}", key);
                    match serde_json::from_str::<SqliteTokenData>(&value) {
                        Ok(data) => {
                            if data.access_token.is_some() {
                                self.access_token = data.access_token;
                            }
                            if data.refresh_token.is_some() {
                                self.refresh_token = data.refresh_token;
                            }
                            if data.profile_arn.is_some() {
                                self.profile_arn = data.profile_arn;
                            }
                            if let Some(ref region) = data.region {
                                // SSO region only; the API region stays put.
                                self.sso_region = Some(region.clone());
                                debug!(
                                    "SSO region from SQLite: {} (API stays at {})",
                                    region, self.region
                                );
                            }
                            if data.scopes.is_some() {
                                self.scopes = data.scopes;
                            }
                            if let Some(ref expires_str) = data.expires_at {
                                match parse_expires_at(expires_str) {
                                    Ok(dt) => self.expires_at = Some(dt),
                                    Err(e) => warn!("Failed to parse expires_at from SQLite: {}", e),
                                }
                            }
                        }
                        Err(e) => error!("JSON decode error in SQLite token data: {}", e),
                    }
                    break;
                }
                Err(rusqlite::Error::QueryReturnedNoRows) => continue,
                Err(e) => {
                    error!("SQLite error querying key {}: {}", key, e);
                    continue;
                }
            }
        }

        for key in SQLITE_REGISTRATION_KEYS {
            match conn.query_row(
                "SELECT value FROM auth_kv WHERE key = ?1",
                [key],
                |row| row.get::<_, String>(0),
            ) {
                Ok(value) => {
                    debug!("Loaded device registration from SQLite key: {}", key);
                    match serde_json::from_str::<DeviceRegistration>(&value) {
                        Ok(reg) => {
                            if reg.client_id.is_some() {
                                self.client_id = reg.client_id;
                            }
                            if reg.client_secret.is_some() {
                                self.client_secret = reg.client_secret;
                            }
                            if reg.region.is_some() && self.sso_region.is_none() {
                                self.sso_region = reg.region;
                            }
                        }
                        Err(e) => error!("JSON decode error in device registration: {}", e),
                    }
                    break;
                }
                Err(rusqlite::Error::QueryReturnedNoRows) => continue,
                Err(e) => {
                    error!("SQLite error querying registration key {}: {}", key, e);
                    continue;
                }
            }
        }

        info!("Credentials loaded from SQLite database: {}", db_path);
    }

    fn load_credentials_from_file(&mut self, file_path: &str) {
        let path = match expand_path(file_path) {
            Some(p) => p,
            None => {
                warn!("Credentials file path expansion failed: {}", file_path);
                return;
            }
        };
        if !path.exists() {
            warn!("Credentials file not found: {}", file_path);
            return;
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                error!("Error reading credentials file: {}", e);
                return;
            }
        };

        let data: FileCredentials = match serde_json::from_str(&content) {
            Ok(d) => d,
            Err(e) => {
                error!("Error parsing credentials file: {}", e);
                return;
            }
        };

        if data.refresh_token.is_some() {
            self.refresh_token = data.refresh_token;
        }
        if data.access_token.is_some() {
            self.access_token = data.access_token;
        }
        if data.profile_arn.is_some() {
            self.profile_arn = data.profile_arn;
        }
        if let Some(ref region) = data.region {
            // A region in the file retargets both the refresh URL and the API host.
            self.region = region.clone();
            self.refresh_url = get_kiro_refresh_url(&self.region);
            self.api_host = get_kiro_api_host(&self.region);
        }
        if let Some(ref hash) = data.client_id_hash {
            self.load_enterprise_device_registration(hash);
        }
        if data.client_id.is_some() {
            self.client_id = data.client_id;
        }
        if data.client_secret.is_some() {
            self.client_secret = data.client_secret;
        }
        if let Some(ref expires_str) = data.expires_at {
            match parse_expires_at(expires_str) {
                Ok(dt) => self.expires_at = Some(dt),
                Err(e) => warn!("Failed to parse expiresAt: {}", e),
            }
        }

        info!("Credentials loaded from {}", file_path);
    }

    /// Enterprise Kiro IDE keeps its OIDC device registration in the AWS SSO
    /// cache, keyed by the clientIdHash from the credentials file.
    fn load_enterprise_device_registration(&mut self, client_id_hash: &str) {
        let home = match dirs::home_dir() {
            Some(h) => h,
            None => return,
        };
        let reg_path = home
            .join(".aws")
            .join("sso")
            .join("cache")
            .join(format!("{}.json", client_id_hash));
        if !reg_path.exists() {
            warn!(
                "Enterprise device registration file not found: {}",
                reg_path.display()
            );
            return;
        }

        let content = match std::fs::read_to_string(&reg_path) {
            Ok(c) => c,
            Err(e) => {
                error!("Error reading enterprise device registration: {}", e);
                return;
            }
        };
        match serde_json::from_str::<DeviceRegistration>(&content) {
            Ok(reg) => {
                if reg.client_id.is_some() {
                    self.client_id = reg.client_id;
                }
                if reg.client_secret.is_some() {
                    self.client_secret = reg.client_secret;
                }
                info!("Enterprise device registration loaded from {}", reg_path.display());
            }
            Err(e) => error!("Error parsing enterprise device registration: {}", e),
        }
    }

    fn save_credentials_to_file(&self) {
        let file_path = match self.creds_file {
            Some(ref f) => f,
            None => return,
        };
        let path = match expand_path(file_path) {
            Some(p) => p,
            None => return,
        };

        // Merge into the existing document so keys we do not manage survive.
        let mut existing: Value = if path.exists() {
            std::fs::read_to_string(&path)
                .ok()
                .and_then(|c| serde_json::from_str(&c).ok())
                .unwrap_or_else(|| Value::Object(Default::default()))
        } else {
            Value::Object(Default::default())
        };

        if let Value::Object(ref mut map) = existing {
            if let Some(ref token) = self.access_token {
                map.insert("accessToken".to_string(), Value::String(token.clone()));
            }
            if let Some(ref token) = self.refresh_token {
                map.insert("refreshToken".to_string(), Value::String(token.clone()));
            }
            if let Some(ref dt) = self.expires_at {
                map.insert("expiresAt".to_string(), Value::String(dt.to_rfc3339()));
            }
            if let Some(ref arn) = self.profile_arn {
                map.insert("profileArn".to_string(), Value::String(arn.clone()));
            }
        }

        match serde_json::to_string_pretty(&existing) {
            Ok(json_str) => match std::fs::write(&path, json_str) {
                Ok(_) => debug!("Credentials saved to {}", file_path),
                Err(e) => error!("Error writing credentials file: {}", e),
            },
            Err(e) => error!("Error serializing credentials: {}", e),
        }
    }

    fn save_credentials_to_sqlite(&self) {
        let db_path = match self.sqlite_db {
            Some(ref d) => d,
            None => return,
        };
        let path = match expand_path(db_path) {
            Some(p) => p,
            None => return,
        };
        if !path.exists() {
            warn!("SQLite database not found for writing: {}", db_path);
            return;
        }

        let conn = match Connection::open_with_flags(
            &path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE,
        ) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to open SQLite database for writing: {}", e);
                return;
            }
        };

        let mut token_data = serde_json::Map::new();
        if let Some(ref at) = self.access_token {
            token_data.insert("access_token".to_string(), Value::String(at.clone()));
        }
        if let Some(ref rt) = self.refresh_token {
            token_data.insert("refresh_token".to_string(), Value::String(rt.clone()));
        }
        if let Some(ref dt) = self.expires_at {
            token_data.insert("expires_at".to_string(), Value::String(dt.to_rfc3339()));
        }
        let region = self.sso_region.as_deref().unwrap_or(&self.region);
        token_data.insert("region".to_string(), Value::String(region.to_string()));
        if let Some(ref scopes) = self.scopes {
            token_data.insert(
                "scopes".to_string(),
                Value::Array(scopes.iter().map(|s| Value::String(s.clone())).collect()),
            );
        }

        let token_json = match serde_json::to_string(&Value::Object(token_data)) {
            Ok(j) => j,
            Err(e) => {
                error!("Error serializing token data for SQLite: {}", e);
                return;
            }
        };

        // Write back to the row we loaded from, falling back over all keys.
        if let Some(ref key) = self.sqlite_token_key {
            match conn.execute(
                "UPDATE auth_kv SET value = ?1 WHERE key = ?2",
                rusqlite::params![token_json, key],
            ) {
                Ok(count) if count > 0 => {
                    debug!("Credentials saved to SQLite key: {}", key);
                    return;
                }
                Ok(_) => warn!("Failed to update SQLite key: {}, trying fallback", key),
                Err(e) => warn!("SQLite error updating key {}: {}", key, e),
            }
        }
        for key in SQLITE_TOKEN_KEYS {
            match conn.execute(
                "UPDATE auth_kv SET value = ?1 WHERE key = ?2",
                rusqlite::params![token_json, key],
            ) {
                Ok(count) if count > 0 => {
                    debug!("Credentials saved to SQLite key: {} (fallback)", key);
                    return;
                }
                Ok(_) => continue,
                Err(e) => {
                    error!("SQLite error updating fallback key {}: {}", key, e);
                    continue;
                }
            }
        }
        warn!("Failed to save credentials to SQLite: no matching keys found");
    }

    fn is_token_expiring_soon(&self) -> bool {
        token_expiring_soon(self.expires_at, self.refresh_threshold)
    }

    fn is_token_expired(&self) -> bool {
        match self.expires_at {
            None => true,
            Some(expires) => Utc::now() >= expires,
        }
    }

    async fn refresh_token_request(&mut self) -> Result<(), AuthError> {
        match self.auth_type {
            AuthType::AwsSsoOidc => self.refresh_token_aws_sso_oidc().await,
            AuthType::KiroDesktop => self.refresh_token_kiro_desktop().await,
        }?;
        // Persist on every successful refresh.
        if self.sqlite_db.is_some() {
            self.save_credentials_to_sqlite();
        } else {
            self.save_credentials_to_file();
        }
        Ok(())
    }

    async fn refresh_token_kiro_desktop(&mut self) -> Result<(), AuthError> {
        let refresh_token = self
            .refresh_token
            .as_ref()
            .ok_or(AuthError::MissingRefreshToken)?
            .clone();
        info!("Refreshing Kiro token via Kiro Desktop Auth...");

        let payload = serde_json::json!({ "refreshToken": refresh_token });
        let user_agent = format!("KiroIDE-0.7.45-{}", self.fingerprint);

        let response = self
            .http_client
            .post(&self.refresh_url)
            .header("Content-Type", "application/json")
            .header("User-Agent", &user_agent)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let data: KiroDesktopRefreshResponse = response.json().await?;
        let new_access_token = data.access_token.ok_or(AuthError::MissingAccessToken)?;
        let expires_in = data.expires_in.unwrap_or(3600);

        self.access_token = Some(new_access_token);
        if let Some(rt) = data.refresh_token {
            self.refresh_token = Some(rt);
        }
        if let Some(arn) = data.profile_arn {
            self.profile_arn = Some(arn);
        }
        self.expires_at = Some(Utc::now() + Duration::seconds(expires_in - 60));

        info!(
            "Token refreshed via Kiro Desktop Auth, expires: {}",
            self.expires_at.map(|d| d.to_rfc3339()).unwrap_or_default()
        );
        Ok(())
    }

    async fn refresh_token_aws_sso_oidc(&mut self) -> Result<(), AuthError> {
        let refresh_token = self
            .refresh_token
            .as_ref()
            .ok_or(AuthError::MissingRefreshToken)?
            .clone();
        let client_id = self.client_id.as_ref().ok_or(AuthError::MissingClientId)?.clone();
        let client_secret = self
            .client_secret
            .as_ref()
            .ok_or(AuthError::MissingClientSecret)?
            .clone();

        info!("Refreshing Kiro token via AWS SSO OIDC...");

        // The OIDC endpoint lives in the SSO region, which may differ from
        // the API region.
        let sso_region = self.sso_region.as_deref().unwrap_or(&self.region);
        let url = get_aws_sso_oidc_url(sso_region);

        let payload = serde_json::json!({
            "grantType": "refresh_token",
            "clientId": client_id,
            "clientSecret": client_secret,
            "refreshToken": refresh_token,
        });

        debug!(
            "AWS SSO OIDC refresh: url={}, sso_region={}, api_region={}",
            url, sso_region, self.region
        );

        let response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("AWS SSO OIDC refresh failed: status={}, body={}", status.as_u16(), body);
            return Err(AuthError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let result: AwsSsoOidcRefreshResponse = response.json().await?;
        let new_access_token = result.access_token.ok_or(AuthError::MissingAccessToken)?;
        let expires_in = result.expires_in.unwrap_or(3600);

        self.access_token = Some(new_access_token);
        if let Some(rt) = result.refresh_token {
            self.refresh_token = Some(rt);
        }
        self.expires_at = Some(Utc::now() + Duration::seconds(expires_in - 60));

        info!(
            "Token refreshed via AWS SSO OIDC, expires: {}",
            self.expires_at.map(|d| d.to_rfc3339()).unwrap_or_default()
        );
        Ok(())
    }
}

impl TokenManager {
    pub fn new(cfg: &Config) -> Self {
        let region = cfg.region.clone();
        let refresh_url = get_kiro_refresh_url(&region);
        let api_host = get_kiro_api_host(&region);
        let fingerprint = get_machine_fingerprint();

        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let mut inner = Inner {
            refresh_token: if cfg.refresh_token.is_empty() {
                None
            } else {
                Some(cfg.refresh_token.clone())
            },
            access_token: None,
            profile_arn: if cfg.profile_arn.is_empty() {
                None
            } else {
                Some(cfg.profile_arn.clone())
            },
            region,
            creds_file: if cfg.creds_file.is_empty() {
                None
            } else {
                Some(cfg.creds_file.clone())
            },
            sqlite_db: if cfg.cli_db_file.is_empty() {
                None
            } else {
                Some(cfg.cli_db_file.clone())
            },
            client_id: None,
            client_secret: None,
            scopes: None,
            sso_region: None,
            sqlite_token_key: None,
            expires_at: None,
            auth_type: AuthType::KiroDesktop,
            refresh_threshold: cfg.token_refresh_threshold,
            refresh_url,
            api_host,
            fingerprint,
            http_client,
        };

        if let Some(ref db_path) = inner.sqlite_db.clone() {
            inner.load_credentials_from_sqlite(db_path);
        } else if let Some(ref file_path) = inner.creds_file.clone() {
            inner.load_credentials_from_file(file_path);
        }
        inner.detect_auth_type();

        info!(
            "Token manager initialized: region={}, api_host={}, auth_type={}",
            inner.region, inner.api_host, inner.auth_type
        );

        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Return a valid bearer token, refreshing ahead of expiry when needed.
    pub async fn get_access_token(&self) -> Result<String, AuthError> {
        let mut inner = self.inner.lock().await;

        if inner.access_token.is_some() && !inner.is_token_expiring_soon() {
            return Ok(inner.access_token.clone().unwrap());
        }

        // SQLite mode: another process (kiro-cli) may have refreshed already,
        // so re-read the store before hitting the refresh endpoint.
        if inner.sqlite_db.is_some() && inner.is_token_expiring_soon() {
            debug!("SQLite mode: reloading credentials before refresh attempt");
            if let Some(db_path) = inner.sqlite_db.clone() {
                inner.load_credentials_from_sqlite(&db_path);
            }
            if inner.access_token.is_some() && !inner.is_token_expiring_soon() {
                debug!("SQLite reload provided fresh token, no refresh needed");
                return Ok(inner.access_token.clone().unwrap());
            }
        }

        if let Err(e) = inner.refresh_token_request().await {
            // Graceful degradation: near-expiry tokens from the shared store
            // stay usable until they actually expire.
            if inner.sqlite_db.is_some() && inner.access_token.is_some() && !inner.is_token_expired()
            {
                warn!("Token refresh failed ({}), using existing token until it expires", e);
                return Ok(inner.access_token.clone().unwrap());
            }
            return Err(e);
        }

        Ok(inner.access_token.clone().unwrap())
    }

    /// Refresh unconditionally (used by the executor after a 403).
    pub async fn force_refresh(&self) -> Result<String, AuthError> {
        let mut inner = self.inner.lock().await;
        inner.refresh_token_request().await?;
        Ok(inner.access_token.clone().unwrap())
    }

    pub async fn profile_arn(&self) -> Option<String> {
        self.inner.lock().await.profile_arn.clone()
    }

    pub async fn api_host(&self) -> String {
        self.inner.lock().await.api_host.clone()
    }

    pub async fn auth_type(&self) -> AuthType {
        self.inner.lock().await.auth_type
    }
}

/// A token counts as expiring when the refresh threshold has already eaten
/// into its remaining lifetime (or when no expiry is known at all).
fn token_expiring_soon(expires_at: Option<DateTime<Utc>>, threshold_secs: i64) -> bool {
    match expires_at {
        None => true,
        Some(expires) => expires <= Utc::now() + Duration::seconds(threshold_secs),
    }
}

/// Parse an RFC 3339 expiry, tolerating a plain trailing `Z`.
fn parse_expires_at(s: &str) -> Result<DateTime<Utc>, AuthError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AuthError::DateParse(format!("invalid expiresAt '{}': {}", s, e)))
}

fn expand_path(path: &str) -> Option<PathBuf> {
    if let Some(stripped) = path.strip_prefix("~") {
        let home = dirs::home_dir()?;
        Some(home.join(stripped.trim_start_matches('/')))
    } else {
        Some(PathBuf::from(path))
    }
}
