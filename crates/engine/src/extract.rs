//! Text extraction from source files.

use docsync_core::{AppError, AppResult};
use std::fs;
use std::path::Path;

/// Turns a source file into plain text.
///
/// `AppError::Extraction` means the format cannot be parsed; the file is
/// skipped for this run. `AppError::Io` means it could not be read.
pub trait TextExtractor: Send + Sync + std::fmt::Debug {
    fn extract(&self, path: &Path) -> AppResult<String>;
}

/// Content type classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Markdown,
    Html,
    PlainText,
    /// Binary document formats that need a dedicated parser
    Document,
    Unknown,
}

impl ContentType {
    /// Detect content type from file extension.
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match extension.as_deref() {
            Some("md") | Some("markdown") => Self::Markdown,
            Some("html") | Some("htm") => Self::Html,
            Some("txt") | Some("text") | Some("rst") => Self::PlainText,
            Some("pdf") | Some("docx") | Some("doc") | Some("odt") | Some("rtf") => Self::Document,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::PlainText => "text",
            Self::Document => "document",
            Self::Unknown => "unknown",
        }
    }
}

/// Extractor for UTF-8 text formats (plain text, markdown, HTML).
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> AppResult<String> {
        let content_type = ContentType::from_path(path);

        if content_type == ContentType::Document {
            return Err(AppError::Extraction(format!(
                "{:?}: {} files are not supported by the plain text extractor",
                path,
                path.extension()
                    .map(|e| e.to_string_lossy().to_string())
                    .unwrap_or_default()
            )));
        }

        let bytes = fs::read(path).map_err(|e| {
            AppError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read {:?}: {}", path, e),
            ))
        })?;

        if bytes.contains(&0) {
            return Err(AppError::Extraction(format!("{:?} looks like a binary file", path)));
        }

        let raw = String::from_utf8(bytes)
            .map_err(|_| AppError::Extraction(format!("{:?} is not valid UTF-8", path)))?;
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);

        let text = match content_type {
            ContentType::Markdown => clean_markdown(raw),
            ContentType::Html => clean_html(raw),
            _ => normalize_newlines(raw),
        };

        tracing::debug!(
            "Extracted {} chars of {} from {:?}",
            text.chars().count(),
            content_type.as_str(),
            path
        );

        Ok(text)
    }
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Drop markdown markup that carries no text, keeping paragraph breaks.
fn clean_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for line in normalize_newlines(text).lines() {
        let trimmed = line.trim();

        // Horizontal rules and code fences
        if trimmed.starts_with("---") || trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            continue;
        }

        result.push_str(trimmed.trim_start_matches('#').trim_start());
        result.push('\n');
    }

    collapse_blank_lines(&result)
}

/// Strip tags, scripts and styles from HTML, turning block ends into breaks.
fn clean_html(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('<') {
        result.push_str(&rest[..open]);
        rest = &rest[open..];

        let close = match rest.find('>') {
            Some(close) => close,
            None => {
                rest = "";
                break;
            }
        };
        let tag = rest[1..close].trim().to_ascii_lowercase();
        rest = &rest[close + 1..];

        let name: String = tag
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();

        if !tag.starts_with('/') && (name == "script" || name == "style") {
            let end_tag = format!("</{}", name);
            match rest.to_ascii_lowercase().find(&end_tag) {
                Some(end) => {
                    rest = &rest[end..];
                    if let Some(gt) = rest.find('>') {
                        rest = &rest[gt + 1..];
                    }
                }
                None => rest = "",
            }
            continue;
        }

        if matches!(
            name.as_str(),
            "p" | "div" | "br" | "li" | "tr" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "section"
        ) {
            result.push('\n');
        }
    }
    result.push_str(rest);

    let decoded = result
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    let lines: Vec<&str> = decoded.lines().map(str::trim).collect();
    collapse_blank_lines(&lines.join("\n"))
}

/// Collapse runs of blank lines into a single paragraph break.
fn collapse_blank_lines(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut blank_run = 0;

    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            continue;
        }
        if !result.is_empty() {
            result.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        result.push_str(line);
        blank_run = 0;
    }

    result
}
