//! Credentials and batch pacing configuration.
//!
//! ## Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `GRAPH_TENANT_ID` | Azure AD tenant ID |
//! | `GRAPH_CLIENT_ID` | Application (client) ID |
//! | `GRAPH_CLIENT_SECRET` | Client secret |
//! | `GRAPH_SHARED_MAILBOX` | Mailbox every message is sent from |

use std::env;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::MailError;

/// The four parameters needed to authenticate and send.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub shared_mailbox: String,
}

/// Config file shape before required-field checks.
#[derive(Debug, Default, Deserialize)]
struct RawGraphConfig {
    tenant_id: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    shared_mailbox: Option<String>,
}

impl GraphConfig {
    /// Build a config from its parts without validating it.
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        shared_mailbox: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            shared_mailbox: shared_mailbox.into(),
        }
    }

    /// Build and validate a config from optional parts (e.g., CLI flags).
    ///
    /// Fields are checked in declaration order; the first missing or empty one
    /// is reported.
    pub fn from_parts(
        tenant_id: Option<String>,
        client_id: Option<String>,
        client_secret: Option<String>,
        shared_mailbox: Option<String>,
    ) -> Result<Self, MailError> {
        let config = Self {
            tenant_id: required(tenant_id, "tenant_id")?,
            client_id: required(client_id, "client_id")?,
            client_secret: required(client_secret, "client_secret")?,
            shared_mailbox: required(shared_mailbox, "shared_mailbox")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config object.
    pub fn from_json(text: &str) -> Result<Self, MailError> {
        let raw: RawGraphConfig = serde_json::from_str(text)
            .map_err(|e| MailError::Configuration(format!("invalid config JSON: {}", e)))?;
        Self::from_parts(
            raw.tenant_id,
            raw.client_id,
            raw.client_secret,
            raw.shared_mailbox,
        )
    }

    /// Load a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MailError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            MailError::Configuration(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&text)
    }

    /// Load from `GRAPH_*` environment variables.
    pub fn from_env() -> Result<Self, MailError> {
        Self::from_parts(
            env::var("GRAPH_TENANT_ID").ok(),
            env::var("GRAPH_CLIENT_ID").ok(),
            env::var("GRAPH_CLIENT_SECRET").ok(),
            env::var("GRAPH_SHARED_MAILBOX").ok(),
        )
    }

    /// Check that the sending mailbox is a valid address.
    pub fn validate(&self) -> Result<(), MailError> {
        Address::parse(&self.shared_mailbox).map(|_| ())
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, MailError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(MailError::MissingField(field)),
    }
}

impl fmt::Debug for GraphConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("shared_mailbox", &self.shared_mailbox)
            .finish()
    }
}

/// Per-batch message and pacing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Subject line shared by every message
    pub subject: String,
    /// Minimum pause between recipients, in seconds
    pub min_delay: u64,
    /// Maximum pause between recipients, in seconds
    pub max_delay: u64,
    /// Additional attempts after the first failed one
    pub max_retries: u32,
    /// CC recipients added to every message
    pub cc: Vec<Address>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            subject: String::new(),
            min_delay: 30,
            max_delay: 120,
            max_retries: 3,
            cc: Vec::new(),
        }
    }
}

impl BatchOptions {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    /// Set the inter-recipient delay range, in seconds.
    pub fn delay(mut self, min: u64, max: u64) -> Self {
        self.min_delay = min;
        self.max_delay = max;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Parse and set the CC list.
    pub fn cc<I, S>(mut self, addrs: I) -> Result<Self, MailError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.cc = addrs
            .into_iter()
            .map(|a| Address::parse(a.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), MailError> {
        if self.min_delay > self.max_delay {
            return Err(MailError::Configuration(format!(
                "min delay ({}s) is greater than max delay ({}s)",
                self.min_delay, self.max_delay
            )));
        }
        Ok(())
    }
}
