//! Capture adapters: microphone, screen, and clipboard.
//!
//! Each adapter owns its own resource. They share only the data URI helpers
//! below, because every image leaves the client as a Base64 data URI.

pub mod clipboard;
pub mod microphone;
pub mod screen;

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

pub use clipboard::{read_clipboard_image, sniff_image_mime};
pub use microphone::{list_input_devices, AudioChunk, MicRecorder};
pub use screen::ScreenShare;

/// `data:<mime>;base64,<payload>`
#[must_use]
pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Split a Base64 data URI into its MIME type and decoded bytes.
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>)> {
    let (mime, payload) = split_data_uri(uri).ok_or_else(|| anyhow!("not a base64 data URI"))?;
    let bytes = STANDARD
        .decode(payload.trim())
        .with_context(|| format!("decode {mime} data URI"))?;
    Ok((mime.to_string(), bytes))
}

/// MIME type and approximate decoded size, without decoding the payload.
#[must_use]
pub fn data_uri_info(uri: &str) -> Option<(&str, usize)> {
    let (mime, payload) = split_data_uri(uri)?;
    let payload = payload.trim();
    let padding = payload.bytes().rev().take_while(|b| *b == b'=').count();
    let bytes = (payload.len() / 4) * 3;
    Some((mime, bytes.saturating_sub(padding)))
}

fn split_data_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    if mime.is_empty() {
        return None;
    }
    Some((mime, payload))
}
