//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use batchmail::{DeliveryResult, Email, MailError, Mailer, Sleeper, WaitKind};

// ============================================================================
// Scripted mailer
// ============================================================================

/// Returns pre-scripted outcomes in call order, then succeeds.
#[derive(Clone, Default)]
pub struct ScriptedMailer {
    outcomes: Arc<Mutex<VecDeque<bool>>>,
    sent: Arc<Mutex<Vec<Email>>>,
}

impl ScriptedMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes: `true` delivers, `false` fails.
    pub fn script(self, outcomes: impl IntoIterator<Item = bool>) -> Self {
        self.outcomes.lock().unwrap().extend(outcomes);
        self
    }

    /// Every call fails.
    pub fn always_failing(self, calls: usize) -> Self {
        self.script(std::iter::repeat(false).take(calls))
    }

    /// Every email passed to `deliver`, in call order.
    pub fn attempts(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }

    /// Recipient of every attempt, in call order.
    pub fn attempted_recipients(&self) -> Vec<String> {
        self.attempts()
            .iter()
            .map(|e| e.to.as_ref().map(|a| a.email.clone()).unwrap_or_default())
            .collect()
    }
}

#[async_trait]
impl Mailer for ScriptedMailer {
    async fn deliver(&self, email: &Email) -> Result<DeliveryResult, MailError> {
        self.sent.lock().unwrap().push(email.clone());
        let ok = self.outcomes.lock().unwrap().pop_front().unwrap_or(true);
        if ok {
            Ok(DeliveryResult::new())
        } else {
            Err(MailError::provider_with_status("scripted", "rejected", 503))
        }
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

// ============================================================================
// Recording sleeper
// ============================================================================

/// Records every requested wait and returns immediately.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    waits: Arc<Mutex<Vec<(Duration, WaitKind)>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> Vec<(Duration, WaitKind)> {
        self.waits.lock().unwrap().clone()
    }

    pub fn of_kind(&self, kind: WaitKind) -> Vec<Duration> {
        self.waits()
            .into_iter()
            .filter(|(_, k)| *k == kind)
            .map(|(d, _)| d)
            .collect()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration, kind: WaitKind) {
        self.waits.lock().unwrap().push((duration, kind));
    }
}

// ============================================================================
// Log capture
// ============================================================================

/// Collects formatted log output written by a test-local subscriber.
#[derive(Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Install a subscriber for the current thread. Logs are captured until
    /// the returned guard is dropped.
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
