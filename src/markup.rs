//! HTML preparation: sanitization and inline image extraction.
//!
//! Runs once per batch and never stops it. Markup is parsed permissively, and
//! images that cannot be resolved are left as they are with a logged warning.
//!
//! ```
//! use batchmail::MarkupPreprocessor;
//!
//! let pre = MarkupPreprocessor::without_assets();
//! let clean = pre.sanitize("<p>Hi</p><script>evil()</script>");
//! assert_eq!(clean, "<p>Hi</p>");
//!
//! let (html, attachments) = pre.extract_inline_images(r#"<img src="data:image/png;base64,QUJD">"#);
//! assert_eq!(html, r#"<img src="cid:image_1@example.com">"#);
//! assert_eq!(attachments[0].content_bytes, "QUJD");
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use regex::{Captures, Regex};

use crate::attachment::Attachment;

/// Domain part of every minted content identifier.
pub const CONTENT_ID_DOMAIN: &str = "example.com";

/// Subdirectory of the asset directory searched first for relative images.
pub const IMAGES_SUBDIR: &str = "images";

/// Template HTML and attachments ready to be shared by every message.
#[derive(Debug, Clone)]
pub struct PreparedBody {
    pub html: Arc<str>,
    pub attachments: Arc<[Attachment]>,
}

/// Sanitizes templates and turns embedded images into inline attachments.
#[derive(Debug, Clone, Default)]
pub struct MarkupPreprocessor {
    asset_dir: Option<PathBuf>,
}

impl MarkupPreprocessor {
    /// Resolve relative image paths against `asset_dir`.
    ///
    /// A relative `src` is looked up as `<asset_dir>/images/<src>`, then, if
    /// it contains a `/`, as `<asset_dir>/<src>`.
    pub fn new(asset_dir: impl Into<PathBuf>) -> Self {
        Self {
            asset_dir: Some(asset_dir.into()),
        }
    }

    /// A preprocessor that cannot resolve relative image paths.
    pub fn without_assets() -> Self {
        Self::default()
    }

    pub fn asset_dir(&self) -> Option<&Path> {
        self.asset_dir.as_deref()
    }

    /// Sanitize, then extract inline images.
    pub fn prepare(&self, raw_html: &str) -> PreparedBody {
        let clean = self.sanitize(raw_html);
        let (html, attachments) = self.extract_inline_images(&clean);
        PreparedBody {
            html: Arc::from(html),
            attachments: Arc::from(attachments),
        }
    }

    /// Remove `<script>` and `<style>` elements.
    ///
    /// Parsing is permissive and never fails; see [`strip_executable`].
    pub fn sanitize(&self, raw_html: &str) -> String {
        let clean = strip_executable(raw_html);
        if clean.len() != raw_html.len() {
            tracing::debug!(
                removed_bytes = raw_html.len() - clean.len(),
                "Removed script and style content from template"
            );
        }
        clean
    }

    /// Replace embedded image sources with `cid:` references.
    ///
    /// Returns the rewritten HTML and one attachment per rewritten image, in
    /// document order. Content identifiers are `image_<n>@example.com` with
    /// `n` counting from 1.
    pub fn extract_inline_images(&self, html: &str) -> (String, Vec<Attachment>) {
        let mut attachments = Vec::new();

        let rewritten = img_tag_re().replace_all(html, |caps: &Captures<'_>| {
            let tag = &caps[0];
            self.rewrite_img_tag(tag, &mut attachments)
                .unwrap_or_else(|| tag.to_string())
        });

        (rewritten.into_owned(), attachments)
    }

    fn rewrite_img_tag(&self, tag: &str, attachments: &mut Vec<Attachment>) -> Option<String> {
        let (span, src) = find_src_attr(tag)?;

        let attachment = self.resolve_source(src, attachments.len() + 1)?;
        let rewritten = format!(
            "{}src=\"{}\"{}",
            &tag[..span.start],
            attachment.cid_reference(),
            &tag[span.end..]
        );
        attachments.push(attachment);
        Some(rewritten)
    }

    fn resolve_source(&self, src: &str, index: usize) -> Option<Attachment> {
        let content_id = format!("image_{}@{}", index, CONTENT_ID_DOMAIN);

        if src.starts_with("data:") {
            // Non-image or non-base64 data URIs are left alone.
            let caps = data_uri_re().captures(src)?;
            Some(Attachment::inline_base64(
                format!("image_{}", index),
                &caps[1],
                &caps[2],
                content_id,
            ))
        } else if src.starts_with("file://") || src.starts_with('/') {
            tracing::warn!(src = %src, "Local file path detected but not supported");
            None
        } else if src.is_empty() || src.starts_with("http") || src.starts_with("cid:") {
            None
        } else {
            self.load_relative(src, content_id)
        }
    }

    fn load_relative(&self, src: &str, content_id: String) -> Option<Attachment> {
        let Some(dir) = self.asset_dir.as_deref() else {
            tracing::warn!(src = %src, "No asset directory configured, leaving relative image unchanged");
            return None;
        };

        let images_dir = dir.join(IMAGES_SUBDIR);
        let primary = images_dir.join(src);
        let path = if primary.is_file() {
            primary
        } else if src.contains('/') && dir.join(src).is_file() {
            dir.join(src)
        } else {
            tracing::warn!(
                src = %src,
                images_dir = %images_dir.display(),
                "Image file not found"
            );
            return None;
        };

        match Attachment::inline_image_from_path(&path, content_id) {
            Ok(attachment) => {
                tracing::info!(
                    src = %src,
                    content_id = %attachment.content_id,
                    "Processed local image"
                );
                Some(attachment)
            }
            Err(e) => {
                tracing::warn!(src = %src, error = %e, "Failed to load image");
                None
            }
        }
    }
}

/// Remove `<script>`/`<style>` elements and stray closing tags.
///
/// Element content is raw text up to the matching close tag; an element
/// with no close tag runs to the end of the input. Comments are copied
/// verbatim, so a tag inside `<!-- ... -->` is never treated as markup.
///
/// ```
/// use batchmail::strip_executable;
///
/// assert_eq!(strip_executable("<p>Hi</p><script>evil()"), "<p>Hi</p>");
/// assert_eq!(
///     strip_executable("<!-- <script> --><p>Hi</p>"),
///     "<!-- <script> --><p>Hi</p>"
/// );
/// ```
pub fn strip_executable(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut pos = 0;

    while let Some(token) = markup_token_re().find_at(html, pos) {
        out.push_str(&html[pos..token.start()]);
        let text = token.as_str();

        pos = if text.starts_with("<!--") {
            out.push_str(text);
            token.end()
        } else if text.starts_with("</") {
            token.end()
        } else {
            let close = if text[1..].to_ascii_lowercase().starts_with("script") {
                script_close_re()
            } else {
                style_close_re()
            };
            close
                .find_at(html, token.end())
                .map_or(html.len(), |m| m.end())
        };
    }

    out.push_str(&html[pos..]);
    out
}

/// Locate the `src` attribute of an `<img>` tag.
///
/// Attributes are read left to right with quoted values consumed whole, so
/// `src=` inside another attribute's value is never mistaken for the real one.
/// Returns the byte range of the whole attribute and the raw value.
fn find_src_attr(tag: &str) -> Option<(std::ops::Range<usize>, &str)> {
    let offset = tag.get(..4)?.eq_ignore_ascii_case("<img").then_some(4)?;

    attribute_re()
        .captures_iter(&tag[offset..])
        .find(|caps| caps[1].eq_ignore_ascii_case("src"))
        .and_then(|caps| {
            let whole = caps.get(0)?;
            let value = caps.get(2).or_else(|| caps.get(3)).or_else(|| caps.get(4))?;
            Some((
                offset + whole.start()..offset + whole.end(),
                value.as_str(),
            ))
        })
}

// ============================================================================
// Patterns
// ============================================================================

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern is valid"))
}

/// Comments (unterminated ones run to the end), `<script>`/`<style>` opening
/// tags, and their closing tags.
fn markup_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(
        &RE,
        r"(?is)<!--.*?(?:-->|\z)|<(?:script|style)\b[^>]*(?:>|\z)|</(?:script|style)\s*>",
    )
}

fn script_close_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"(?i)</script\s*>")
}

fn style_close_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"(?i)</style\s*>")
}

fn img_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"(?is)<img\b[^>]*>")
}

/// One attribute: a name, optionally followed by a quoted or bare value.
fn attribute_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(
        &RE,
        r#"(?s)([^\s"'>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#,
    )
}

fn data_uri_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"(?s)^data:(image/[^;]+);base64,(.*)$")
}
