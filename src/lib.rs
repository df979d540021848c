//! # Batchmail
//!
//! Send one HTML template to many recipients through Microsoft Graph, one
//! message per recipient, spread out over time.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use batchmail::providers::GraphMailer;
//! use batchmail::{BatchOptions, BatchSender, GraphConfig, MarkupPreprocessor};
//!
//! let config = GraphConfig::from_file("config.json")?;
//! let sender = BatchSender::new(GraphMailer::new(config))
//!     .preprocessor(MarkupPreprocessor::new("template/"));
//!
//! let options = BatchOptions::new("Quarterly update")
//!     .delay(30, 120)
//!     .max_retries(3);
//!
//! let summary = sender.send_batch(&recipients, &template, &options).await;
//! ```
//!
//! ## Pipeline
//!
//! 1. [`MarkupPreprocessor`] strips `<script>`/`<style>` and turns embedded
//!    images into inline attachments referenced by `cid:`. Runs once per batch.
//! 2. [`CredentialSession`] holds the client-credentials token and refreshes
//!    it five minutes before its assumed 55-minute lifetime ends.
//! 3. [`providers::GraphMailer`] posts one `sendMail` request per recipient,
//!    re-authenticating and re-sending once if Graph rejects the token.
//! 4. [`BatchSender`] walks the recipients in order, retrying failures with
//!    exponential backoff (60s doubling, capped at 300s) and pausing a random
//!    number of seconds between recipients.
//!
//! ## Logging
//!
//! Every component logs through [`tracing`]. Install any subscriber to
//! collect the output; the `batchmail` binary uses `tracing-subscriber`
//! honoring `RUST_LOG`.
//!
//! ## Feature Flags
//!
//! - `cli` (default) - the `batchmail` command-line binary
//! - `metrics` - Prometheus-style counters
//!
//! ## Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `batchmail_emails_total` | Counter | provider, status | Recipients resolved |
//! | `batchmail_retries_total` | Counter | provider | Backoff retries scheduled |

/// The version of the batchmail crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod address;
mod attachment;
mod config;
mod email;
mod error;
mod mailer;
mod markup;
mod scheduler;
mod session;

pub mod input;
pub mod providers;
pub mod report;

// Re-exports
pub use address::{Address, ToAddress};
pub use attachment::{image_content_type, Attachment, FILE_ATTACHMENT_ODATA_TYPE};
pub use config::{BatchOptions, GraphConfig};
pub use email::Email;
pub use error::MailError;
pub use mailer::{DeliveryResult, Mailer};
pub use markup::{strip_executable, MarkupPreprocessor, PreparedBody, CONTENT_ID_DOMAIN};
pub use scheduler::{
    backoff_delay, BatchSender, BatchSummary, DeliveryRecord, DeliveryStatus, Sleeper,
    TokioSleeper, WaitKind, BACKOFF_BASE_SECS, BACKOFF_CAP_SECS,
};
pub use session::{AccessToken, CredentialSession, DEFAULT_AUTHORITY_URL, GRAPH_DEFAULT_SCOPE};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::providers::GraphMailer;
    pub use crate::Attachment;
    pub use crate::BatchOptions;
    pub use crate::BatchSender;
    pub use crate::BatchSummary;
    pub use crate::Email;
    pub use crate::GraphConfig;
    pub use crate::MailError;
    pub use crate::Mailer;
    pub use crate::MarkupPreprocessor;
}
