//! Clipboard image paste through an external paste command.

use super::encode_data_uri;
use crate::log_debug;
use anyhow::{anyhow, bail, Context, Result};
use std::process::Command;

/// MIME type from image magic bytes (PNG, JPEG, GIF, WebP).
#[must_use]
pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// Read the clipboard image as a data URI. Non-image content is an error.
pub fn read_clipboard_image(command: Option<&str>) -> Result<String> {
    let argv = match command {
        Some(command) => {
            shell_words::split(command).with_context(|| format!("parse paste command: {command}"))?
        }
        None => default_paste_command(),
    };
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("paste command is empty"))?;
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("launch paste command: {program}"))?;
    if !output.status.success() {
        bail!("paste command exited with status {}", output.status);
    }
    image_from_clipboard_bytes(&output.stdout)
}

fn image_from_clipboard_bytes(bytes: &[u8]) -> Result<String> {
    if bytes.is_empty() {
        bail!("clipboard is empty");
    }
    let mime = sniff_image_mime(bytes).ok_or_else(|| anyhow!("clipboard does not contain an image"))?;
    log_debug(&format!("clipboard image: {mime}, {} bytes", bytes.len()));
    Ok(encode_data_uri(mime, bytes))
}

#[cfg(target_os = "macos")]
fn default_paste_command() -> Vec<String> {
    vec!["pngpaste".to_string(), "-".to_string()]
}

#[cfg(not(target_os = "macos"))]
fn default_paste_command() -> Vec<String> {
    let argv: &[&str] = if std::env::var_os("WAYLAND_DISPLAY").is_some() {
        &["wl-paste", "--type", "image/png"]
    } else {
        &["xclip", "-selection", "clipboard", "-t", "image/png", "-o"]
    };
    argv.iter().map(|s| (*s).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(b"\x89PNG\r\n\x1a\nrest".as_slice(), Some("image/png"))]
    #[case(&[0xFF, 0xD8, 0xFF, 0xE0], Some("image/jpeg"))]
    #[case(b"GIF89a....".as_slice(), Some("image/gif"))]
    #[case(b"RIFF\0\0\0\0WEBPVP8 ".as_slice(), Some("image/webp"))]
    #[case(b"RIFF\0\0\0\0WAVEfmt ".as_slice(), None)]
    #[case(b"hello world".as_slice(), None)]
    fn sniffs_common_image_types(#[case] bytes: &[u8], #[case] expected: Option<&str>) {
        assert_eq!(sniff_image_mime(bytes), expected);
    }

    #[test]
    fn text_clipboard_is_rejected() {
        let err = image_from_clipboard_bytes(b"just text").expect_err("text");
        assert!(err.to_string().contains("does not contain an image"));
        assert!(image_from_clipboard_bytes(b"").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn custom_paste_command_output_is_encoded() {
        let uri = read_clipboard_image(Some("printf 'GIF89a'")).expect("paste");
        assert_eq!(uri, "data:image/gif;base64,R0lGODlh");
    }

    #[test]
    fn unparseable_paste_command_is_an_error() {
        assert!(read_clipboard_image(Some("printf 'unterminated")).is_err());
        assert!(read_clipboard_image(Some("   ")).is_err());
    }
}
