//! Sequential batch delivery with retries and pacing.
//!
//! Each recipient moves through `Pending -> Attempting -> Success`, or through
//! further `Attempting` rounds (separated by exponential backoff) until the
//! retry budget is spent and it ends `Failed`. Recipients are resolved one at a
//! time, in input order, with a randomized pause between consecutive
//! recipients. A failed recipient never stops the batch.
//!
//! ```rust,ignore
//! use batchmail::providers::GraphMailer;
//! use batchmail::{BatchOptions, BatchSender, MarkupPreprocessor};
//!
//! let sender = BatchSender::new(GraphMailer::new(config))
//!     .preprocessor(MarkupPreprocessor::new("template/"));
//! let summary = sender
//!     .send_batch(&recipients, &template, &BatchOptions::new("Hello"))
//!     .await;
//! println!("sent {} of {}", summary.sent, summary.total);
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::config::BatchOptions;
use crate::email::Email;
use crate::mailer::Mailer;
use crate::markup::MarkupPreprocessor;

/// Wait before the first retry, in seconds.
pub const BACKOFF_BASE_SECS: u64 = 60;

/// Longest wait between attempts, in seconds.
pub const BACKOFF_CAP_SECS: u64 = 300;

/// Wait before retry number `retry + 1`: `min(60 * 2^retry, 300)` seconds.
pub fn backoff_delay(retry: u32) -> Duration {
    let secs = 2u64
        .checked_pow(retry)
        .and_then(|factor| factor.checked_mul(BACKOFF_BASE_SECS))
        .map_or(BACKOFF_CAP_SECS, |secs| secs.min(BACKOFF_CAP_SECS));
    Duration::from_secs(secs)
}

/// Why the scheduler is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    /// Between attempts for the same recipient.
    Backoff,
    /// Between two recipients.
    Pacing,
}

/// Source of the scheduler's waits.
///
/// The default [`TokioSleeper`] really sleeps; tests substitute one that
/// records the requested durations and returns immediately.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration, kind: WaitKind);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration, _kind: WaitKind) {
        tokio::time::sleep(duration).await;
    }
}

/// Terminal outcome for one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// One recipient's final outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub timestamp: DateTime<Utc>,
    pub recipient: String,
    pub status: DeliveryStatus,
}

/// Counters and per-recipient outcomes for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    /// Reserved for recipients rejected before sending; currently always 0.
    pub skipped: usize,
    /// Outcomes in input order.
    pub details: Vec<DeliveryRecord>,
}

impl BatchSummary {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            details: Vec::with_capacity(total),
            ..Self::default()
        }
    }

    /// Append a record stamped with the current time.
    pub fn record(&mut self, recipient: impl Into<String>, status: DeliveryStatus) {
        match status {
            DeliveryStatus::Success => self.sent += 1,
            DeliveryStatus::Failed => self.failed += 1,
        }
        self.details.push(DeliveryRecord {
            timestamp: Utc::now(),
            recipient: recipient.into(),
            status,
        });
    }

    /// Every recipient has a terminal outcome.
    pub fn is_complete(&self) -> bool {
        self.sent + self.failed + self.skipped == self.total && self.details.len() == self.total
    }
}

/// Sends one template to many recipients, one message per recipient.
pub struct BatchSender<M> {
    mailer: M,
    preprocessor: MarkupPreprocessor,
    sleeper: Box<dyn Sleeper>,
    rng: Mutex<StdRng>,
}

impl<M: Mailer> BatchSender<M> {
    /// Create a sender with real sleeps and no asset directory.
    pub fn new(mailer: M) -> Self {
        Self {
            mailer,
            preprocessor: MarkupPreprocessor::without_assets(),
            sleeper: Box::new(TokioSleeper),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Set the preprocessor used to prepare the template.
    pub fn preprocessor(mut self, preprocessor: MarkupPreprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    /// Replace the sleeper.
    pub fn sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    /// Seed the pacing RNG for reproducible delays.
    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn mailer(&self) -> &M {
        &self.mailer
    }

    /// Deliver `html_template` to every recipient and report the outcomes.
    ///
    /// The template is sanitized and its images extracted once; every
    /// message shares the result. Never returns early: the summary always
    /// holds exactly one record per recipient, in input order.
    pub async fn send_batch<S: AsRef<str>>(
        &self,
        recipients: &[S],
        html_template: &str,
        options: &BatchOptions,
    ) -> BatchSummary {
        let span = tracing::info_span!(
            "batchmail.send_batch",
            provider = self.mailer.provider_name(),
            total = recipients.len(),
        );

        self.run_batch(recipients, html_template, options)
            .instrument(span)
            .await
    }

    async fn run_batch<S: AsRef<str>>(
        &self,
        recipients: &[S],
        html_template: &str,
        options: &BatchOptions,
    ) -> BatchSummary {
        let body = self.preprocessor.prepare(html_template);
        let total = recipients.len();
        let mut summary = BatchSummary::new(total);

        let (min_delay, max_delay) = pacing_range(options);
        tracing::info!(total, "Starting batch email send");
        tracing::info!(min_delay, max_delay, "Delay range (seconds)");
        if !options.cc.is_empty() {
            let cc: Vec<&str> = options.cc.iter().map(|a| a.email.as_str()).collect();
            tracing::info!(cc = ?cc, "CC recipients");
        }

        for (index, recipient) in recipients.iter().enumerate() {
            let recipient = recipient.as_ref();
            tracing::info!(position = index + 1, total, recipient = %recipient, "Processing recipient");

            let email = Email::new()
                .to(recipient)
                .put_cc(options.cc.clone())
                .subject(options.subject.as_str())
                .html_body(Arc::clone(&body.html))
                .shared_attachments(Arc::clone(&body.attachments));

            let status = self
                .deliver_with_retries(&email, recipient, options.max_retries)
                .await;

            if status == DeliveryStatus::Failed {
                tracing::error!(
                    recipient = %recipient,
                    max_retries = options.max_retries,
                    "Failed to send email after exhausting retries"
                );
            }

            #[cfg(feature = "metrics")]
            metrics::counter!(
                "batchmail_emails_total",
                "provider" => self.mailer.provider_name(),
                "status" => status.as_str()
            )
            .increment(1);

            summary.record(recipient, status);

            if index + 1 < total {
                let delay = self.rng.lock().gen_range(min_delay..=max_delay);
                tracing::info!(delay_secs = delay, "Waiting before next email");
                self.sleeper
                    .sleep(Duration::from_secs(delay), WaitKind::Pacing)
                    .await;
            }
        }

        tracing::info!(
            sent = summary.sent,
            failed = summary.failed,
            "Batch sending completed"
        );
        summary
    }

    async fn deliver_with_retries(
        &self,
        email: &Email,
        recipient: &str,
        max_retries: u32,
    ) -> DeliveryStatus {
        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                tracing::info!(recipient = %recipient, attempt, max_retries, "Retry attempt");
            }

            let error = match self.mailer.deliver(email).await {
                Ok(_) => return DeliveryStatus::Success,
                Err(e) => e,
            };

            if attempt >= max_retries {
                return DeliveryStatus::Failed;
            }

            let delay = backoff_delay(attempt);
            tracing::warn!(
                recipient = %recipient,
                attempt = attempt + 1,
                status = error.status(),
                error = %error,
                delay_secs = delay.as_secs(),
                "Send failed, waiting before retry"
            );

            #[cfg(feature = "metrics")]
            metrics::counter!("batchmail_retries_total", "provider" => self.mailer.provider_name())
                .increment(1);

            self.sleeper.sleep(delay, WaitKind::Backoff).await;
            attempt += 1;
        }
    }
}

/// Inclusive pacing range; an inverted range collapses to `min_delay`.
fn pacing_range(options: &BatchOptions) -> (u64, u64) {
    if options.min_delay > options.max_delay {
        tracing::warn!(
            min_delay = options.min_delay,
            max_delay = options.max_delay,
            "Min delay exceeds max delay, using min delay for every pause"
        );
        (options.min_delay, options.min_delay)
    } else {
        (options.min_delay, options.max_delay)
    }
}
