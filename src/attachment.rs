//! Inline file attachments referenced from HTML via `cid:`.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::MailError;

/// OData type tag Graph requires on every file attachment.
pub const FILE_ATTACHMENT_ODATA_TYPE: &str = "#microsoft.graph.fileAttachment";

/// An inline email attachment.
///
/// Serializes to the Graph `fileAttachment` resource shape, so a list of these
/// can be placed directly in a `sendMail` request body. The payload is kept
/// base64-encoded: it is produced once per batch and shared by every message.
///
/// # Examples
///
/// ```
/// use batchmail::Attachment;
///
/// let logo = Attachment::inline_base64("image_1", "image/png", "QUJD", "image_1@example.com");
/// assert_eq!(logo.cid_reference(), "cid:image_1@example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Ownership tag marking this as a file attachment
    #[serde(rename = "@odata.type")]
    pub odata_type: String,
    /// Display name
    pub name: String,
    /// MIME content type (e.g., "image/png")
    pub content_type: String,
    /// Base64-encoded payload
    pub content_bytes: String,
    /// Always true for attachments produced by the markup preprocessor
    pub is_inline: bool,
    /// Content-ID used as the `cid:` reference
    pub content_id: String,
}

impl Attachment {
    /// Create an inline attachment from an already base64-encoded payload.
    ///
    /// The payload is carried verbatim.
    pub fn inline_base64(
        name: impl Into<String>,
        content_type: impl Into<String>,
        content_bytes: impl Into<String>,
        content_id: impl Into<String>,
    ) -> Self {
        Self {
            odata_type: FILE_ATTACHMENT_ODATA_TYPE.to_string(),
            name: name.into(),
            content_type: content_type.into(),
            content_bytes: content_bytes.into(),
            is_inline: true,
            content_id: content_id.into(),
        }
    }

    /// Create an inline attachment from raw bytes.
    pub fn inline_bytes(
        name: impl Into<String>,
        content_type: impl Into<String>,
        data: &[u8],
        content_id: impl Into<String>,
    ) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
        Self::inline_base64(name, content_type, encoded, content_id)
    }

    /// Create an inline image attachment from a file on disk.
    ///
    /// The display name is the file name and the content type is inferred
    /// from the extension with [`image_content_type`].
    pub fn inline_image_from_path(
        path: impl AsRef<Path>,
        content_id: impl Into<String>,
    ) -> Result<Self, MailError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image")
            .to_string();

        let data = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MailError::AttachmentFileNotFound(path.display().to_string())
            } else {
                MailError::AttachmentReadError(format!("{}: {}", path.display(), e))
            }
        })?;

        Ok(Self::inline_bytes(
            name,
            image_content_type(path),
            &data,
            content_id,
        ))
    }

    /// The `src` value that references this attachment from HTML.
    pub fn cid_reference(&self) -> String {
        format!("cid:{}", self.content_id)
    }

    /// Size of the decoded payload in bytes, if the payload is valid base64.
    pub fn decoded_size(&self) -> Option<usize> {
        base64::engine::general_purpose::STANDARD
            .decode(self.content_bytes.as_bytes())
            .ok()
            .map(|data| data.len())
    }
}

/// Infer an image MIME type from a file extension.
///
/// Only JPEG and GIF are recognized explicitly; everything else is sent as
/// PNG.
pub fn image_content_type(path: impl AsRef<Path>) -> &'static str {
    let ext = path
        .as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}
