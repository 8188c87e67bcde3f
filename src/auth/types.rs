use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Authentication mechanism type.
///
/// - `KiroDesktop`: Kiro IDE credentials using the desktop auth endpoint
/// - `AwsSsoOidc`: AWS SSO OIDC credentials from kiro-cli or Enterprise Kiro IDE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthType {
    /// Kiro Desktop Auth - uses https://prod.{region}.auth.desktop.kiro.dev/refreshToken
    KiroDesktop,
    /// AWS SSO OIDC - uses https://oidc.{region}.amazonaws.com/token
    AwsSsoOidc,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthType::KiroDesktop => write!(f, "kiro_desktop"),
            AuthType::AwsSsoOidc => write!(f, "aws_sso_oidc"),
        }
    }
}

/// Credentials loaded from a JSON file (Kiro IDE format, camelCase).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FileCredentials {
    #[serde(rename = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(rename = "accessToken")]
    pub access_token: Option<String>,
    #[serde(rename = "profileArn")]
    pub profile_arn: Option<String>,
    pub region: Option<String>,
    #[serde(rename = "expiresAt")]
    pub expires_at: Option<String>,
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
    #[serde(rename = "clientSecret")]
    pub client_secret: Option<String>,
    #[serde(rename = "clientIdHash")]
    pub client_id_hash: Option<String>,
}

/// Token data stored in the kiro-cli SQLite database (snake_case).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SqliteTokenData {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub profile_arn: Option<String>,
    pub region: Option<String>,
    pub expires_at: Option<String>,
    pub scopes: Option<Vec<String>>,
}

/// Device registration data from SQLite or an Enterprise cache file.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DeviceRegistration {
    #[serde(alias = "clientId", alias = "client_id")]
    pub client_id: Option<String>,
    #[serde(alias = "clientSecret", alias = "client_secret")]
    pub client_secret: Option<String>,
    pub region: Option<String>,
}

/// Response from the Kiro Desktop Auth refresh endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct KiroDesktopRefreshResponse {
    #[serde(rename = "accessToken")]
    pub access_token: Option<String>,
    #[serde(rename = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(rename = "expiresIn")]
    pub expires_in: Option<i64>,
    #[serde(rename = "profileArn")]
    pub profile_arn: Option<String>,
}

/// Response from the AWS SSO OIDC CreateToken endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsSsoOidcRefreshResponse {
    #[serde(rename = "accessToken")]
    pub access_token: Option<String>,
    #[serde(rename = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(rename = "expiresIn")]
    pub expires_in: Option<i64>,
}

/// Errors specific to the auth module.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Refresh token is not set")]
    MissingRefreshToken,

    #[error("Client ID is not set (required for AWS SSO OIDC)")]
    MissingClientId,

    #[error("Client secret is not set (required for AWS SSO OIDC)")]
    MissingClientSecret,

    #[error("Response does not contain accessToken")]
    MissingAccessToken,

    #[error("Token refresh failed with status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parse error: {0}")]
    DateParse(String),
}
