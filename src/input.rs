//! Recipient list and template loading.

use std::path::Path;

use serde_json::Value;

use crate::error::MailError;

/// Parse a recipient list.
///
/// A JSON array is tried first; each element is stringified (strings as-is)
/// and trimmed. Anything else is read as plain text, one address per line.
/// Blank entries are dropped in both forms, and order is preserved.
///
/// ```
/// use batchmail::input::parse_recipients;
///
/// assert_eq!(
///     parse_recipients(r#"["a@example.com", " b@example.com "]"#),
///     vec!["a@example.com", "b@example.com"]
/// );
/// assert_eq!(
///     parse_recipients("a@example.com\n\nb@example.com\n"),
///     vec!["a@example.com", "b@example.com"]
/// );
/// ```
pub fn parse_recipients(content: &str) -> Vec<String> {
    let content = content.trim();

    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(content) {
        return items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string().trim().to_string(),
            })
            .filter(|s| !s.is_empty())
            .collect();
    }

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read and parse a recipient file.
pub fn load_recipients(path: impl AsRef<Path>) -> Result<Vec<String>, MailError> {
    let path = path.as_ref();
    let content = read_input(path, "recipients")?;
    Ok(parse_recipients(&content))
}

/// Read an HTML template in full.
pub fn load_template(path: impl AsRef<Path>) -> Result<String, MailError> {
    read_input(path.as_ref(), "HTML template")
}

fn read_input(path: &Path, what: &str) -> Result<String, MailError> {
    std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MailError::Configuration(format!("{} file '{}' not found", what, path.display()))
        } else {
            MailError::Configuration(format!(
                "failed to read {} file '{}': {}",
                what,
                path.display(),
                e
            ))
        }
    })
}
