//! Batch scheduler tests with a scripted mailer and a recording sleeper.

mod support;

use std::sync::Arc;
use std::time::Duration;

use batchmail::{
    Address, BatchOptions, BatchSender, DeliveryStatus, MarkupPreprocessor, WaitKind,
};
use support::{LogCapture, RecordingSleeper, ScriptedMailer};

// ============================================================================
// Helper Functions
// ============================================================================

fn recipients(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("user{}@example.com", i)).collect()
}

fn sender(mailer: ScriptedMailer, sleeper: RecordingSleeper) -> BatchSender<ScriptedMailer> {
    BatchSender::new(mailer).sleeper(sleeper).seed(7)
}

fn secs(values: &[u64]) -> Vec<Duration> {
    values.iter().copied().map(Duration::from_secs).collect()
}

// ============================================================================
// Summary and ordering
// ============================================================================

#[tokio::test]
async fn every_recipient_gets_one_record_in_order() {
    let mailer = ScriptedMailer::new();
    let sleeper = RecordingSleeper::new();
    let sender = sender(mailer.clone(), sleeper.clone());

    let list = recipients(4);
    let summary = sender
        .send_batch(&list, "<p>Hi</p>", &BatchOptions::new("Hello").delay(1, 2))
        .await;

    assert_eq!(summary.total, 4);
    assert_eq!(summary.sent, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 0);
    assert!(summary.is_complete());

    let recorded: Vec<&str> = summary.details.iter().map(|d| d.recipient.as_str()).collect();
    assert_eq!(recorded, list.iter().map(String::as_str).collect::<Vec<_>>());
    assert_eq!(mailer.attempted_recipients(), list);
    assert!(summary
        .details
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn empty_batch_sends_nothing_and_never_waits() {
    let mailer = ScriptedMailer::new();
    let sleeper = RecordingSleeper::new();
    let sender = sender(mailer.clone(), sleeper.clone());

    let summary = sender
        .send_batch::<String>(&[], "<p>Hi</p>", &BatchOptions::new("Hello"))
        .await;

    assert_eq!(summary.total, 0);
    assert!(summary.details.is_empty());
    assert!(mailer.attempts().is_empty());
    assert!(sleeper.waits().is_empty());
}

#[tokio::test]
async fn each_message_has_exactly_one_recipient_and_the_shared_cc() {
    let mailer = ScriptedMailer::new();
    let sender = sender(mailer.clone(), RecordingSleeper::new());

    let options = BatchOptions::new("Quarterly update")
        .delay(0, 0)
        .cc(["audit@example.com"])
        .unwrap();
    sender
        .send_batch(&recipients(2), "<p>Hi</p>", &options)
        .await;

    for email in mailer.attempts() {
        assert!(email.to.is_some());
        assert_eq!(email.cc, vec![Address::new("audit@example.com")]);
        assert_eq!(email.subject, "Quarterly update");
        assert!(email.save_to_sent_items);
    }
}

// ============================================================================
// Retries and backoff
// ============================================================================

#[tokio::test]
async fn success_on_third_attempt_waits_60_then_120() {
    let mailer = ScriptedMailer::new().script([false, false, true]);
    let sleeper = RecordingSleeper::new();
    let sender = sender(mailer.clone(), sleeper.clone());

    let summary = sender
        .send_batch(&recipients(1), "<p>Hi</p>", &BatchOptions::new("Hello"))
        .await;

    assert_eq!(summary.sent, 1);
    assert_eq!(summary.details[0].status, DeliveryStatus::Success);
    assert_eq!(mailer.attempts().len(), 3);
    assert_eq!(sleeper.of_kind(WaitKind::Backoff), secs(&[60, 120]));
    assert!(sleeper.of_kind(WaitKind::Pacing).is_empty());
}

#[tokio::test]
async fn exhausted_retries_fail_the_recipient_and_batch_continues() {
    // Recipient 2 fails all 1 + 3 attempts; recipients 1 and 3 succeed.
    let mailer = ScriptedMailer::new().script([true, false, false, false, false, true]);
    let sleeper = RecordingSleeper::new();
    let sender = sender(mailer.clone(), sleeper.clone());

    let list = recipients(3);
    let summary = sender
        .send_batch(&list, "<p>Hi</p>", &BatchOptions::new("Hello").delay(5, 5))
        .await;

    assert_eq!(summary.sent, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.details[1].recipient, "user2@example.com");
    assert_eq!(summary.details[1].status, DeliveryStatus::Failed);
    assert_eq!(summary.details[2].status, DeliveryStatus::Success);

    assert_eq!(mailer.attempts().len(), 6);
    assert_eq!(sleeper.of_kind(WaitKind::Backoff), secs(&[60, 120, 240]));

    // Pacing follows the failed recipient just like a successful one.
    let kinds: Vec<WaitKind> = sleeper.waits().into_iter().map(|(_, k)| k).collect();
    assert_eq!(
        kinds,
        vec![
            WaitKind::Pacing,
            WaitKind::Backoff,
            WaitKind::Backoff,
            WaitKind::Backoff,
            WaitKind::Pacing,
        ]
    );
}

#[tokio::test]
async fn backoff_caps_at_300_seconds() {
    let mailer = ScriptedMailer::new().always_failing(7);
    let sleeper = RecordingSleeper::new();
    let sender = sender(mailer.clone(), sleeper.clone());

    let summary = sender
        .send_batch(
            &recipients(1),
            "<p>Hi</p>",
            &BatchOptions::new("Hello").max_retries(6),
        )
        .await;

    assert_eq!(summary.failed, 1);
    assert_eq!(mailer.attempts().len(), 7);
    assert_eq!(
        sleeper.of_kind(WaitKind::Backoff),
        secs(&[60, 120, 240, 300, 300, 300])
    );
}

#[tokio::test]
async fn zero_retries_means_a_single_attempt() {
    let mailer = ScriptedMailer::new().always_failing(1);
    let sleeper = RecordingSleeper::new();
    let sender = sender(mailer.clone(), sleeper.clone());

    let summary = sender
        .send_batch(
            &recipients(1),
            "<p>Hi</p>",
            &BatchOptions::new("Hello").max_retries(0),
        )
        .await;

    assert_eq!(summary.failed, 1);
    assert_eq!(mailer.attempts().len(), 1);
    assert!(sleeper.waits().is_empty());
}

// ============================================================================
// Pacing
// ============================================================================

#[tokio::test]
async fn pacing_waits_between_recipients_only() {
    let sleeper = RecordingSleeper::new();
    let sender = sender(ScriptedMailer::new(), sleeper.clone());

    sender
        .send_batch(&recipients(5), "<p>Hi</p>", &BatchOptions::new("Hello").delay(30, 120))
        .await;

    let pacing = sleeper.of_kind(WaitKind::Pacing);
    assert_eq!(pacing.len(), 4);
    for wait in pacing {
        assert!(wait >= Duration::from_secs(30) && wait <= Duration::from_secs(120));
    }
}

#[tokio::test]
async fn equal_bounds_give_exact_delay() {
    let sleeper = RecordingSleeper::new();
    let sender = sender(ScriptedMailer::new(), sleeper.clone());

    sender
        .send_batch(&recipients(3), "<p>Hi</p>", &BatchOptions::new("Hello").delay(45, 45))
        .await;

    assert_eq!(sleeper.of_kind(WaitKind::Pacing), secs(&[45, 45]));
}

#[tokio::test]
async fn inverted_range_uses_min_delay() {
    let sleeper = RecordingSleeper::new();
    let sender = sender(ScriptedMailer::new(), sleeper.clone());

    sender
        .send_batch(&recipients(2), "<p>Hi</p>", &BatchOptions::new("Hello").delay(10, 5))
        .await;

    assert_eq!(sleeper.of_kind(WaitKind::Pacing), secs(&[10]));
}

#[tokio::test]
async fn same_seed_gives_same_delays() {
    let first = RecordingSleeper::new();
    let second = RecordingSleeper::new();
    let options = BatchOptions::new("Hello").delay(1, 1000);

    sender(ScriptedMailer::new(), first.clone())
        .send_batch(&recipients(4), "<p>Hi</p>", &options)
        .await;
    sender(ScriptedMailer::new(), second.clone())
        .send_batch(&recipients(4), "<p>Hi</p>", &options)
        .await;

    assert_eq!(first.waits(), second.waits());
}

// ============================================================================
// Template preparation
// ============================================================================

#[tokio::test]
async fn template_is_prepared_once_and_shared() {
    let mailer = ScriptedMailer::new();
    let sender = sender(mailer.clone(), RecordingSleeper::new());

    let template = r#"<style>p{}</style><p>Hi</p><img src="data:image/png;base64,QUJD">"#;
    sender
        .send_batch(&recipients(3), template, &BatchOptions::new("Hello").delay(0, 0))
        .await;

    let attempts = mailer.attempts();
    assert_eq!(attempts.len(), 3);
    assert_eq!(
        &*attempts[0].html_body,
        r#"<p>Hi</p><img src="cid:image_1@example.com">"#
    );
    assert_eq!(attempts[0].attachments.len(), 1);
    assert_eq!(attempts[0].attachments[0].content_id, "image_1@example.com");

    for email in &attempts[1..] {
        assert!(Arc::ptr_eq(&attempts[0].html_body, &email.html_body));
        assert!(Arc::ptr_eq(&attempts[0].attachments, &email.attachments));
    }
}

#[tokio::test]
async fn relative_images_resolve_against_asset_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("images")).unwrap();
    std::fs::write(dir.path().join("images/logo.gif"), b"GIF89a").unwrap();

    let mailer = ScriptedMailer::new();
    let sender = BatchSender::new(mailer.clone())
        .sleeper(RecordingSleeper::new())
        .preprocessor(MarkupPreprocessor::new(dir.path()));

    sender
        .send_batch(&recipients(1), r#"<img src="logo.gif">"#, &BatchOptions::new("Hello"))
        .await;

    let email = &mailer.attempts()[0];
    assert_eq!(&*email.html_body, r#"<img src="cid:image_1@example.com">"#);
    assert_eq!(email.attachments[0].name, "logo.gif");
    assert_eq!(email.attachments[0].content_type, "image/gif");
    assert_eq!(email.attachments[0].decoded_size(), Some(6));
}

// ============================================================================
// Logging
// ============================================================================

#[tokio::test]
async fn failures_are_logged_with_the_recipient() {
    let (logs, _guard) = LogCapture::install();

    let mailer = ScriptedMailer::new().always_failing(2);
    let sender = sender(mailer, RecordingSleeper::new());
    sender
        .send_batch(
            &["gone@example.com"],
            "<p>Hi</p>",
            &BatchOptions::new("Hello").max_retries(1),
        )
        .await;

    let output = logs.contents();
    assert!(output.contains("Send failed, waiting before retry"));
    assert!(output.contains("status=503"));
    assert!(output.contains("attempt=1"));
    assert!(output.contains("Failed to send email after exhausting retries"));
    assert!(output.contains("gone@example.com"));
    assert!(output.contains("batchmail.send_batch"));
}
