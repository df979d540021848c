//! OAuth2 client-credentials session for Microsoft Graph.
//!
//! The session holds the bearer token and its expiry. It is mutated only by
//! [`CredentialSession::authenticate`]; a failed exchange leaves the previous
//! token state untouched.
//!
//! ```rust,ignore
//! use batchmail::{CredentialSession, GraphConfig};
//!
//! let mut session = CredentialSession::new(GraphConfig::from_file("config.json")?);
//! if session.is_expired() {
//!     session.authenticate().await?;
//! }
//! ```

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::config::GraphConfig;
use crate::error::MailError;

/// Default identity provider authority.
pub const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com";

/// Graph's default application scope.
pub const GRAPH_DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Tokens live 60 minutes at the provider; the session assumes 55.
const TOKEN_LIFETIME_MINUTES: i64 = 55;

/// Tokens within this many minutes of expiry are treated as expired.
const EXPIRY_MARGIN_MINUTES: i64 = 5;

/// A bearer token and the instant the session stops trusting it.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Credential state for one sending mailbox.
pub struct CredentialSession {
    config: GraphConfig,
    token: Option<AccessToken>,
    authority_url: String,
    scope: String,
    client: Client,
}

impl CredentialSession {
    /// Create a session with no token yet.
    pub fn new(config: GraphConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    /// Create with a custom reqwest client.
    pub fn with_client(config: GraphConfig, client: Client) -> Self {
        Self {
            config,
            token: None,
            authority_url: DEFAULT_AUTHORITY_URL.to_string(),
            scope: GRAPH_DEFAULT_SCOPE.to_string(),
            client,
        }
    }

    /// Set a custom authority URL (for testing or sovereign clouds).
    pub fn authority_url(mut self, url: impl Into<String>) -> Self {
        self.authority_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the requested scope, e.g. `https://graph.microsoft.us/.default`
    /// for a national cloud.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// The tenant's v2.0 token endpoint.
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_url, self.config.tenant_id
        )
    }

    /// The mailbox this session sends as.
    pub fn mailbox(&self) -> &str {
        &self.config.shared_mailbox
    }

    /// The currently held token, expired or not.
    pub fn token(&self) -> Option<&AccessToken> {
        self.token.as_ref()
    }

    /// Seed the session with a token obtained elsewhere.
    pub fn set_token(&mut self, token: AccessToken) {
        self.token = Some(token);
    }

    /// True if no token is held or it expires within the safety margin.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// [`is_expired`](Self::is_expired) evaluated at a given instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match &self.token {
            None => true,
            Some(token) => now >= token.expires_at - Duration::minutes(EXPIRY_MARGIN_MINUTES),
        }
    }

    /// Exchange the client credentials for a fresh bearer token.
    ///
    /// On success the token is stored with an expiry 55 minutes from now.
    /// On failure the previously held token (if any) is kept as-is.
    pub async fn authenticate(&mut self) -> Result<(), MailError> {
        match self.request_token().await {
            Ok(secret) => {
                let expires_at = Utc::now() + Duration::minutes(TOKEN_LIFETIME_MINUTES);
                self.token = Some(AccessToken::new(secret, expires_at));
                tracing::info!(
                    tenant = %self.config.tenant_id,
                    expires_at = %expires_at.to_rfc3339(),
                    "Authentication successful"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(tenant = %self.config.tenant_id, error = %e, "Authentication failed");
                Err(e)
            }
        }
    }

    async fn request_token(&self) -> Result<String, MailError> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("scope", self.scope.as_str()),
            ("grant_type", "client_credentials"),
        ];

        let response = self
            .client
            .post(self.token_url())
            .header("User-Agent", format!("batchmail/{}", crate::VERSION))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body: TokenResponse = response.json().await.unwrap_or_default();

        match body.access_token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(MailError::Authentication(
                body.error_description
                    .or(body.error)
                    .unwrap_or_else(|| format!("no access token in response (HTTP {})", status)),
            )),
        }
    }
}

impl fmt::Debug for CredentialSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSession")
            .field("config", &self.config)
            .field("token", &self.token)
            .field("authority_url", &self.authority_url)
            .field("scope", &self.scope)
            .finish()
    }
}

// ============================================================================
// Token endpoint types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}
