//! Inline file storage: uploads are kept base64-encoded inside the order
//! record, so this module only converts between bytes and stored entries.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, FixedOffset};
use packflow_common::order::{FileEntry, StoredFile};
use packflow_common::timefmt;

use crate::errors::OmsError;

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode(data: &str) -> Result<Vec<u8>, OmsError> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| OmsError::Validation(format!("Stored file is not valid base64: {}", e)))
}

/// File type from magic bytes, falling back to `stored_ext`, then `bin`.
pub fn sniff_extension(bytes: &[u8], stored_ext: Option<&str>) -> String {
    if bytes.starts_with(b"%PDF") {
        return "pdf".to_string();
    }
    if bytes.starts_with(b"\x89PNG") {
        return "png".to_string();
    }
    if bytes.starts_with(b"\xff\xd8\xff") {
        return "jpg".to_string();
    }
    stored_ext
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "bin".to_string())
}

pub fn mime_for(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "ai" => "application/postscript",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

fn extension_of(filename: &str) -> Option<&str> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

/// Build the stored form of an upload. Rejects empty and oversized bodies.
pub fn new_entry(
    bytes: &[u8],
    filename: &str,
    uploaded_by: &str,
    now: DateTime<FixedOffset>,
    max_bytes: usize,
) -> Result<StoredFile, OmsError> {
    if bytes.is_empty() {
        return Err(OmsError::Validation("Upload is empty".to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(OmsError::PayloadTooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }
    let ext = sniff_extension(bytes, extension_of(filename));
    let name = if filename.trim().is_empty() {
        format!("upload.{}", ext)
    } else {
        filename.trim().to_string()
    };
    Ok(StoredFile {
        data: encode(bytes),
        ext,
        name,
        size: bytes.len() as u64,
        uploaded_at: timefmt::format_timestamp(now),
        uploaded_by: uploaded_by.to_string(),
    })
}

/// A decoded file ready to send back to a client.
#[derive(Debug, Clone, PartialEq)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub ext: String,
    pub mime: &'static str,
    pub filename: String,
}

pub fn download(entry: &FileEntry, fallback_name: &str) -> Result<Download, OmsError> {
    let bytes = decode(entry.data())?;
    let ext = sniff_extension(&bytes, entry.ext());
    let filename = entry
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}.{}", fallback_name, ext));
    Ok(Download {
        mime: mime_for(&ext),
        bytes,
        ext,
        filename,
    })
}
