//! Email struct with builder pattern.

use std::sync::Arc;

use crate::address::{Address, ToAddress};
use crate::attachment::Attachment;

/// A single-recipient HTML email.
///
/// Each message goes to exactly one `to` address, so recipients never see
/// each other. The HTML body and the attachment list are reference-counted:
/// a batch prepares them once and every per-recipient message points at the
/// same allocation.
///
/// ```
/// use batchmail::Email;
///
/// let email = Email::new()
///     .to("recipient@example.com")
///     .cc("audit@example.com")
///     .subject("Hello!")
///     .html_body("<h1>HTML content</h1>");
/// ```
#[derive(Debug, Clone)]
pub struct Email {
    /// The single primary recipient
    pub to: Option<Address>,
    /// Carbon copy recipients
    pub cc: Vec<Address>,
    /// Email subject line
    pub subject: String,
    /// HTML body
    pub html_body: Arc<str>,
    /// Inline attachments referenced from the HTML body
    pub attachments: Arc<[Attachment]>,
    /// Keep a copy in the sending mailbox's Sent Items folder
    pub save_to_sent_items: bool,
}

impl Default for Email {
    fn default() -> Self {
        Self {
            to: None,
            cc: Vec::new(),
            subject: String::new(),
            html_body: Arc::from(""),
            attachments: Arc::from(Vec::new()),
            save_to_sent_items: true,
        }
    }
}

impl Email {
    /// Create a new empty email.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recipient, replacing any previous one.
    pub fn to(mut self, addr: impl ToAddress) -> Self {
        self.to = Some(addr.to_address());
        self
    }

    /// Add a CC recipient.
    pub fn cc(mut self, addr: impl ToAddress) -> Self {
        self.cc.push(addr.to_address());
        self
    }

    /// Replace all CC recipients.
    pub fn put_cc(mut self, addrs: Vec<Address>) -> Self {
        self.cc = addrs;
        self
    }

    /// Set the subject.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Set the HTML body.
    pub fn html_body(mut self, body: impl Into<Arc<str>>) -> Self {
        self.html_body = body.into();
        self
    }

    /// Add an attachment.
    ///
    /// Copies the shared list; prefer [`Email::shared_attachments`] when the
    /// same list goes out with many messages.
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        let mut list = self.attachments.to_vec();
        list.push(attachment);
        self.attachments = Arc::from(list);
        self
    }

    /// Use an already shared attachment list.
    pub fn shared_attachments(mut self, attachments: Arc<[Attachment]>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Check if the email has the fields required for delivery.
    pub fn is_valid(&self) -> bool {
        self.to.is_some()
    }
}
