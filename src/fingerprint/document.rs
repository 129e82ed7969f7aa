//! Document text extraction and normalization.
//!
//! This module provides functionality for extracting text from various document formats:
//! - PDF documents (via pdf-extract)
//! - Word documents (via docx-rs)
//! - OpenDocument text (content.xml inside the zip container)
//! - RTF (control words stripped)
//! - Plain text and subtitles (TXT, MD, SRT, VTT, SUB)
//!
//! Extracted text is normalized for robust similarity comparison.

use std::fs;
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use super::ExtractionError;

/// Black-box text extraction: `extract_text(file) -> string`.
///
/// Implementations may be OCR-backed; the engine only relies on the output
/// being deterministic for unchanged bytes.
pub trait TextExtractor: Send + Sync {
    /// Extract raw (unnormalized) text from `path`.
    fn extract_text(&self, path: &Path) -> Result<String, ExtractionError>;
}

/// Default extractor for document text.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentExtractor;

impl TextExtractor for DocumentExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, ExtractionError> {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => Self::extract_pdf(path),
            "docx" => Self::extract_docx(path),
            "odt" => Self::extract_odt(path),
            "rtf" => Self::extract_plain_text(path).map(|t| strip_rtf(&t)),
            "srt" | "vtt" | "sub" => Self::extract_plain_text(path).map(|t| strip_subtitle_timing(&t)),
            "txt" | "md" => Self::extract_plain_text(path),
            _ => Err(ExtractionError::unsupported(
                path,
                format!("no text extractor for '.{extension}' files"),
            )),
        }
    }
}

impl DocumentExtractor {
    /// Extract text from a PDF file.
    fn extract_pdf(path: &Path) -> Result<String, ExtractionError> {
        fs::File::open(path).map_err(|e| ExtractionError::from_io(path, &e))?;
        // pdf-extract panics on some malformed inputs
        match panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text(path))) {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(ExtractionError::unsupported(path, e)),
            Err(_) => Err(ExtractionError::unsupported(path, "PDF parser panicked")),
        }
    }

    /// Extract text from a DOCX file.
    fn extract_docx(path: &Path) -> Result<String, ExtractionError> {
        let bytes = fs::read(path).map_err(|e| ExtractionError::from_io(path, &e))?;
        let docx = docx_rs::read_docx(&bytes).map_err(|e| ExtractionError::unsupported(path, e))?;

        let mut text = String::new();
        for child in docx.document.children {
            Self::extract_text_from_child(&child, &mut text);
        }

        Ok(text)
    }

    /// Recursively extract text from DOCX document children.
    fn extract_text_from_child(child: &docx_rs::DocumentChild, text: &mut String) {
        match child {
            docx_rs::DocumentChild::Paragraph(p) => {
                for child in &p.children {
                    if let docx_rs::ParagraphChild::Run(r) = child {
                        for child in &r.children {
                            if let docx_rs::RunChild::Text(t) = child {
                                text.push_str(&t.text);
                            }
                        }
                    }
                }
                text.push('\n');
            }
            docx_rs::DocumentChild::Table(t) => {
                for row_child in &t.rows {
                    let docx_rs::TableChild::TableRow(tr) = row_child;
                    for cell_child in &tr.cells {
                        let docx_rs::TableRowChild::TableCell(tc) = cell_child;
                        for child in &tc.children {
                            match child {
                                docx_rs::TableCellContent::Paragraph(p) => {
                                    Self::extract_text_from_child(
                                        &docx_rs::DocumentChild::Paragraph(p.clone()),
                                        text,
                                    );
                                }
                                docx_rs::TableCellContent::Table(t) => {
                                    Self::extract_text_from_child(
                                        &docx_rs::DocumentChild::Table(t.clone()),
                                        text,
                                    );
                                }
                                _ => {}
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// Extract text from an OpenDocument text file.
    fn extract_odt(path: &Path) -> Result<String, ExtractionError> {
        let file = fs::File::open(path).map_err(|e| ExtractionError::from_io(path, &e))?;
        let mut archive =
            zip::ZipArchive::new(file).map_err(|e| ExtractionError::unsupported(path, e))?;
        let mut entry = archive
            .by_name("content.xml")
            .map_err(|e| ExtractionError::unsupported(path, e))?;
        let mut xml = String::new();
        entry
            .read_to_string(&mut xml)
            .map_err(|e| ExtractionError::unsupported(path, e))?;
        Ok(strip_xml(&xml))
    }

    /// Extract text from a plain text file, falling back to Latin-1 for
    /// bytes that are not valid UTF-8.
    fn extract_plain_text(path: &Path) -> Result<String, ExtractionError> {
        let bytes = fs::read(path).map_err(|e| ExtractionError::from_io(path, &e))?;
        Ok(match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => e.into_bytes().iter().map(|&b| char::from(b)).collect(),
        })
    }
}

fn xml_tag_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").ok()).as_ref()
}

fn rtf_control_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\[a-zA-Z]+-?\d* ?|\\'[0-9a-fA-F]{2}|[{}]").ok())
        .as_ref()
}

/// Drop XML markup, keeping paragraph breaks as whitespace.
fn strip_xml(xml: &str) -> String {
    match xml_tag_regex() {
        Some(re) => re.replace_all(xml, " ").into_owned(),
        None => xml.to_string(),
    }
}

/// Drop RTF control words, escapes and group braces.
fn strip_rtf(rtf: &str) -> String {
    match rtf_control_regex() {
        Some(re) => re.replace_all(rtf, " ").into_owned(),
        None => rtf.to_string(),
    }
}

/// Drop subtitle cue numbers, timing lines and the WEBVTT header so that
/// re-timed subtitles compare on their dialogue alone.
fn strip_subtitle_timing(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| {
            !line.contains("-->")
                && !line.eq_ignore_ascii_case("webvtt")
                && !line.chars().all(|c| c.is_ascii_digit())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Normalize text for robust similarity comparison.
///
/// Normalization includes:
/// - Unicode compatibility composition (NFKC)
/// - Converting to lowercase
/// - Removing punctuation and symbols
/// - Collapsing whitespace
#[must_use]
pub fn normalize_text(text: &str) -> String {
    text.nfkc()
        .collect::<String>()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
