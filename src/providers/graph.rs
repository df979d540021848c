//! Microsoft Graph `sendMail` provider.
//!
//! # Example
//!
//! ```rust,ignore
//! use batchmail::providers::GraphMailer;
//! use batchmail::{Email, GraphConfig, Mailer};
//!
//! let mailer = GraphMailer::new(GraphConfig::from_file("config.json")?);
//! let email = Email::new()
//!     .to("recipient@example.com")
//!     .subject("Hello")
//!     .html_body("<p>Hi</p>");
//!
//! mailer.deliver(&email).await?;
//! ```
//!
//! ## Token handling
//!
//! A token is acquired lazily before the first send and whenever the held one
//! is within five minutes of expiry. If Graph still rejects the token with
//! `InvalidAuthenticationToken`, the mailer re-authenticates and re-sends the
//! same request exactly once. Any other failure is returned to the caller.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::address::Address;
use crate::attachment::Attachment;
use crate::config::GraphConfig;
use crate::email::Email;
use crate::error::MailError;
use crate::mailer::{DeliveryResult, Mailer};
use crate::session::CredentialSession;

/// Graph v1.0 endpoint in the global cloud.
pub const GRAPH_API_URL: &str = "https://graph.microsoft.com/v1.0";

/// Graph error code for an expired or revoked bearer token.
const INVALID_TOKEN_CODE: &str = "InvalidAuthenticationToken";

/// Microsoft Graph email provider sending as one shared mailbox.
pub struct GraphMailer {
    session: Mutex<CredentialSession>,
    mailbox: String,
    client: Client,
    base_url: String,
}

impl GraphMailer {
    /// Create a new Graph mailer. No network call is made until the first send.
    pub fn new(config: GraphConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    /// Create with a custom reqwest client, shared with the credential session.
    pub fn with_client(config: GraphConfig, client: Client) -> Self {
        Self::from_session(CredentialSession::with_client(config, client))
    }

    /// Wrap an existing credential session (e.g., one with a custom authority).
    /// Requests go through the session's HTTP client.
    pub fn from_session(session: CredentialSession) -> Self {
        Self {
            mailbox: session.mailbox().to_string(),
            client: session.client().clone(),
            session: Mutex::new(session),
            base_url: GRAPH_API_URL.to_string(),
        }
    }

    /// Set a custom base URL (for testing).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// The mailbox every message is sent from.
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// Force a token exchange, e.g. to verify credentials before a batch.
    pub async fn authenticate(&self) -> Result<(), MailError> {
        self.session.lock().await.authenticate().await
    }

    /// Whether the next send would need to authenticate first.
    pub async fn is_token_expired(&self) -> bool {
        self.session.lock().await.is_expired()
    }

    fn send_mail_url(&self) -> String {
        format!("{}/users/{}/sendMail", self.base_url, self.mailbox)
    }

    /// Return a usable token, authenticating first if none is held or it is
    /// about to expire. Check and refresh happen under one lock.
    async fn current_token(&self) -> Result<String, MailError> {
        let mut session = self.session.lock().await;
        if session.is_expired() {
            tracing::info!("Access token is missing or expired, authenticating");
            session.authenticate().await?;
        }
        token_secret(&session)
    }

    /// Unconditionally replace the held token.
    async fn refresh_token(&self) -> Result<String, MailError> {
        let mut session = self.session.lock().await;
        session.authenticate().await?;
        token_secret(&session)
    }

    fn build_request<'a>(&self, email: &'a Email) -> Result<SendMailRequest<'a>, MailError> {
        let to = email.to.as_ref().ok_or(MailError::MissingField("to"))?;

        Ok(SendMailRequest {
            message: GraphMessage {
                subject: &email.subject,
                body: GraphBody {
                    content_type: "HTML",
                    content: &email.html_body,
                },
                to_recipients: vec![GraphRecipient::from(to)],
                cc_recipients: email.cc.iter().map(GraphRecipient::from).collect(),
                attachments: &email.attachments,
            },
            save_to_sent_items: email.save_to_sent_items,
        })
    }

    async fn post(
        &self,
        url: &str,
        token: &str,
        request: &SendMailRequest<'_>,
    ) -> Result<SendResponse, MailError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .header("Content-Type", "application/json")
            .header("User-Agent", format!("batchmail/{}", crate::VERSION))
            .header("client-request-id", uuid::Uuid::new_v4().to_string())
            .json(request)
            .send()
            .await?;

        Ok(SendResponse::classify(response).await)
    }

    async fn send(&self, email: &Email) -> Result<DeliveryResult, MailError> {
        let request = self.build_request(email)?;
        let url = self.send_mail_url();

        let token = self.current_token().await?;
        let mut outcome = self.post(&url, &token, &request).await?;

        if outcome == SendResponse::TokenRejected {
            tracing::warn!("Access token rejected during request, re-authenticating");
            let token = self.refresh_token().await?;
            outcome = self.post(&url, &token, &request).await?;
        }

        match outcome {
            SendResponse::Accepted { request_id } => Ok(match request_id {
                Some(id) => DeliveryResult::with_request_id(id),
                None => DeliveryResult::new(),
            }),
            SendResponse::TokenRejected => Err(MailError::provider_with_status(
                "graph",
                "access token rejected after re-authentication",
                StatusCode::UNAUTHORIZED.as_u16(),
            )),
            SendResponse::Rejected { status, message } => {
                Err(MailError::provider_with_status("graph", message, status))
            }
        }
    }
}

fn token_secret(session: &CredentialSession) -> Result<String, MailError> {
    session
        .token()
        .map(|t| t.secret().to_string())
        .ok_or_else(|| MailError::Authentication("no access token held".into()))
}

#[async_trait]
impl Mailer for GraphMailer {
    async fn deliver(&self, email: &Email) -> Result<DeliveryResult, MailError> {
        let recipient = email.to.as_ref().map(|a| a.email.as_str()).unwrap_or("");
        let cc: Vec<&str> = email.cc.iter().map(|a| a.email.as_str()).collect();

        let result = self.send(email).await;
        match &result {
            Ok(r) => tracing::info!(
                recipient = %recipient,
                cc = ?cc,
                request_id = ?r.request_id,
                "Email sent successfully"
            ),
            Err(e) => tracing::error!(
                recipient = %recipient,
                status = e.status(),
                error = %e,
                "Failed to send email"
            ),
        }
        result
    }

    fn provider_name(&self) -> &'static str {
        "graph"
    }
}

// ============================================================================
// Response classification
// ============================================================================

/// What a `sendMail` response means for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SendResponse {
    /// 202: queued for delivery.
    Accepted { request_id: Option<String> },
    /// 401 with `InvalidAuthenticationToken`.
    TokenRejected,
    /// Anything else.
    Rejected { status: u16, message: String },
}

impl SendResponse {
    async fn classify(response: reqwest::Response) -> Self {
        let status = response.status();
        if status == StatusCode::ACCEPTED {
            let request_id = response
                .headers()
                .get("request-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Self::Accepted { request_id };
        }

        let body = response.text().await.unwrap_or_default();
        Self::from_error_body(status, &body)
    }

    fn from_error_body(status: StatusCode, body: &str) -> Self {
        let error = serde_json::from_str::<GraphErrorEnvelope>(body)
            .ok()
            .map(|envelope| envelope.error);

        match error {
            Some(error) if status == StatusCode::UNAUTHORIZED && error.code == INVALID_TOKEN_CODE => {
                Self::TokenRejected
            }
            Some(error) => Self::Rejected {
                status: status.as_u16(),
                message: format!("{}: {}", error.code, error.message),
            },
            None => Self::Rejected {
                status: status.as_u16(),
                message: if body.is_empty() {
                    format!("HTTP {}", status.as_u16())
                } else {
                    body.to_string()
                },
            },
        }
    }
}

// ============================================================================
// Graph API Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMailRequest<'a> {
    message: GraphMessage<'a>,
    save_to_sent_items: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage<'a> {
    subject: &'a str,
    body: GraphBody<'a>,
    to_recipients: Vec<GraphRecipient<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc_recipients: Vec<GraphRecipient<'a>>,
    #[serde(skip_serializing_if = "is_empty_slice")]
    attachments: &'a [Attachment],
}

fn is_empty_slice<T>(slice: &&[T]) -> bool {
    slice.is_empty()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphBody<'a> {
    content_type: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient<'a> {
    email_address: GraphEmailAddress<'a>,
}

#[derive(Debug, Serialize)]
struct GraphEmailAddress<'a> {
    address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

impl<'a> From<&'a Address> for GraphRecipient<'a> {
    fn from(addr: &'a Address) -> Self {
        Self {
            email_address: GraphEmailAddress {
                address: &addr.email,
                name: addr.name.as_deref().filter(|n| !n.is_empty()),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphError,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    code: String,
    #[serde(default)]
    message: String,
}
