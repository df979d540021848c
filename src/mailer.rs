//! Mailer trait and delivery result types.
//!
//! The batch scheduler only talks to a mailer through [`Mailer`], so the
//! Graph client can be swapped for a scripted one in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::email::Email;
use crate::error::MailError;

/// Result of an accepted email delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Provider-assigned request identifier, when the provider returns one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl DeliveryResult {
    /// Create a delivery result without a request identifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a delivery result carrying the provider's request identifier.
    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
        }
    }
}

/// Trait for email delivery providers.
///
/// `deliver` reports every failure as an `Err` value: transport errors,
/// rejected responses, and authentication failures alike. It never panics and
/// performs no retries across attempts; that policy belongs to the caller.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send a single email to its single recipient.
    async fn deliver(&self, email: &Email) -> Result<DeliveryResult, MailError>;

    /// Get the provider name (for logging/debugging).
    fn provider_name(&self) -> &'static str {
        "unknown"
    }
}

#[async_trait]
impl<M: Mailer + ?Sized> Mailer for Box<M> {
    async fn deliver(&self, email: &Email) -> Result<DeliveryResult, MailError> {
        (**self).deliver(email).await
    }

    fn provider_name(&self) -> &'static str {
        (**self).provider_name()
    }
}

#[async_trait]
impl<M: Mailer + ?Sized> Mailer for std::sync::Arc<M> {
    async fn deliver(&self, email: &Email) -> Result<DeliveryResult, MailError> {
        (**self).deliver(email).await
    }

    fn provider_name(&self) -> &'static str {
        (**self).provider_name()
    }
}
