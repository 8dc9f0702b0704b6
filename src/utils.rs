//! Utility functions shared by the generation client and the CLI

use base64::{engine::general_purpose, Engine};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{ForgeError, Result};

pub const KB: u64 = 1024;
pub const MB: u64 = KB * 1024;
pub const GB: u64 = MB * 1024;

/// Calculate SHA256 hash of bytes
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Encode bytes as a `data:` URL with the given MIME type
pub fn encode_data_url(mime: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime, general_purpose::STANDARD.encode(data))
}

/// Decode a base64 `data:` URL into its MIME type and payload
pub fn decode_data_url(url: &str) -> Result<(String, Vec<u8>)> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| ForgeError::invalid_input("Not a data URL"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| ForgeError::invalid_input("Data URL has no payload"))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| ForgeError::invalid_input("Only base64 data URLs are supported"))?;

    let bytes = general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| ForgeError::invalid_input(format!("Failed to decode base64: {}", e)))?;

    Ok((mime.to_string(), bytes))
}

/// Replace every character outside `[a-zA-Z0-9]` with `_`
pub fn sanitize_file_stem(prompt: &str) -> String {
    let stem: String = prompt
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    if stem.is_empty() {
        "model".to_string()
    } else {
        stem
    }
}

/// Guess an image MIME type from a file extension
pub fn image_mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Format bytes into human readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}
