//! Runtime configuration shared by the client binary and the library core.

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8000";
pub const DEFAULT_WS_PATH: &str = "/chatbot/ws";
pub const HTTP_STREAM_PATH: &str = "/chatbot/stream";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
pub const DEFAULT_COMMIT_WAIT_MS: u64 = 3_000;
pub const DEFAULT_AUDIO_CHUNK_MS: u64 = 250;

const MIN_RECONNECT_DELAY_MS: u64 = 100;
const MAX_RECONNECT_DELAY_MS: u64 = 60_000;
const MAX_COMMIT_WAIT_MS: u64 = 30_000;
const MIN_AUDIO_CHUNK_MS: u64 = 20;
const MAX_AUDIO_CHUNK_MS: u64 = 5_000;

/// Which backend contract carries a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Persistent WebSocket with streamed state/transcript/reply frames.
    #[default]
    Ws,
    /// One multipart POST per turn with a streamed text reply.
    Http,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Transport::Ws => "ws",
            Transport::Http => "http",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Parser, Clone)]
#[command(about = "Essence client", author, version)]
pub struct AppConfig {
    /// Backend WebSocket base URL (ws:// or wss://)
    #[arg(long = "server-url", env = "ESSENCE_SERVER_URL", default_value = DEFAULT_SERVER_URL)]
    pub server_url: String,

    /// WebSocket endpoint path on the backend
    #[arg(long = "ws-path", default_value = DEFAULT_WS_PATH)]
    pub ws_path: String,

    /// HTTP base URL for the streaming fallback (derived from --server-url when omitted)
    #[arg(long = "http-url", env = "ESSENCE_HTTP_URL")]
    pub http_url: Option<String>,

    /// Transport used for turns (ws, http)
    #[arg(long = "transport", value_enum, default_value_t = Transport::Ws)]
    pub transport: Transport,

    /// Fixed delay before reconnecting after the socket closes (ms)
    #[arg(long = "reconnect-delay-ms", default_value_t = DEFAULT_RECONNECT_DELAY_MS)]
    pub reconnect_delay_ms: u64,

    /// How long an empty commit waits for a backend transcript before giving up (ms)
    #[arg(long = "commit-wait-ms", default_value_t = DEFAULT_COMMIT_WAIT_MS)]
    pub commit_wait_ms: u64,

    /// Microphone upload chunk duration (ms)
    #[arg(long = "audio-chunk-ms", default_value_t = DEFAULT_AUDIO_CHUNK_MS)]
    pub audio_chunk_ms: u64,

    /// Preferred audio input device name
    #[arg(long = "input-device")]
    pub input_device: Option<String>,

    /// Read finalized bot replies aloud
    #[arg(long = "speak-replies", default_value_t = false)]
    pub speak_replies: bool,

    /// Speech command; the reply text is appended as the final argument
    #[arg(long = "speech-command")]
    pub speech_command: Option<String>,

    /// Screenshot command; receives the output path in $ESSENCE_CAPTURE_PATH
    #[arg(long = "screenshot-command")]
    pub screenshot_command: Option<String>,

    /// Clipboard image command; must write raw image bytes to stdout
    #[arg(long = "paste-command")]
    pub paste_command: Option<String>,

    /// Enable debug logging to a temp file
    #[arg(long = "logs", default_value_t = false)]
    pub logs: bool,

    /// Allow drafts, transcripts, and replies in debug logs
    #[arg(long = "log-content", default_value_t = false)]
    pub log_content: bool,

    /// Disable all logging (overrides --logs)
    #[arg(long = "no-logs", default_value_t = false)]
    pub no_logs: bool,
}

impl AppConfig {
    /// Reject flag combinations the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        let url = self.server_url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            bail!("--server-url must start with ws:// or wss:// (got {url})");
        }
        if !self.ws_path.starts_with('/') {
            bail!("--ws-path must start with '/' (got {})", self.ws_path);
        }
        if let Some(http) = self.http_url.as_deref() {
            if !(http.starts_with("http://") || http.starts_with("https://")) {
                bail!("--http-url must start with http:// or https:// (got {http})");
            }
        }
        if !(MIN_RECONNECT_DELAY_MS..=MAX_RECONNECT_DELAY_MS).contains(&self.reconnect_delay_ms) {
            bail!(
                "--reconnect-delay-ms must be between {MIN_RECONNECT_DELAY_MS} and {MAX_RECONNECT_DELAY_MS}"
            );
        }
        if self.commit_wait_ms > MAX_COMMIT_WAIT_MS {
            bail!("--commit-wait-ms must be at most {MAX_COMMIT_WAIT_MS}");
        }
        if !(MIN_AUDIO_CHUNK_MS..=MAX_AUDIO_CHUNK_MS).contains(&self.audio_chunk_ms) {
            bail!("--audio-chunk-ms must be between {MIN_AUDIO_CHUNK_MS} and {MAX_AUDIO_CHUNK_MS}");
        }
        for (flag, value) in [
            ("--speech-command", &self.speech_command),
            ("--screenshot-command", &self.screenshot_command),
            ("--paste-command", &self.paste_command),
        ] {
            if let Some(command) = value {
                if command.trim().is_empty() {
                    bail!("{flag} must not be empty");
                }
            }
        }
        Ok(())
    }

    /// Full WebSocket endpoint, joining base URL and path without doubling slashes.
    #[must_use]
    pub fn websocket_url(&self) -> String {
        format!(
            "{}{}",
            self.server_url.trim().trim_end_matches('/'),
            self.ws_path
        )
    }

    /// HTTP base for the fallback transport.
    #[must_use]
    pub fn http_base_url(&self) -> String {
        if let Some(http) = self.http_url.as_deref() {
            return http.trim().trim_end_matches('/').to_string();
        }
        let base = self.server_url.trim().trim_end_matches('/');
        if let Some(rest) = base.strip_prefix("wss://") {
            format!("https://{rest}")
        } else if let Some(rest) = base.strip_prefix("ws://") {
            format!("http://{rest}")
        } else {
            base.to_string()
        }
    }

    #[must_use]
    pub fn http_stream_url(&self) -> String {
        format!("{}{HTTP_STREAM_PATH}", self.http_base_url())
    }

    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    #[must_use]
    pub fn commit_wait(&self) -> Duration {
        Duration::from_millis(self.commit_wait_ms)
    }

    #[must_use]
    pub fn audio_chunk(&self) -> Duration {
        Duration::from_millis(self.audio_chunk_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> AppConfig {
        let mut argv = vec!["essence"];
        argv.extend_from_slice(args);
        AppConfig::parse_from(argv)
    }

    #[test]
    fn defaults_match_backend_contract() {
        let cfg = parse(&[]);
        assert_eq!(cfg.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(cfg.commit_wait(), Duration::from_secs(3));
        assert_eq!(cfg.transport, Transport::Ws);
        assert_eq!(cfg.websocket_url(), "ws://localhost:8000/chatbot/ws");
        assert!(cfg.validate().is_ok());
    }

    #[rstest]
    #[case("ws://localhost:8000", "http://localhost:8000/chatbot/stream")]
    #[case("wss://essence.example.com/", "https://essence.example.com/chatbot/stream")]
    fn http_stream_url_derives_scheme(#[case] server: &str, #[case] expected: &str) {
        let cfg = parse(&["--server-url", server]);
        assert_eq!(cfg.http_stream_url(), expected);
    }

    #[test]
    fn explicit_http_url_wins() {
        let cfg = parse(&["--http-url", "https://api.example.com/"]);
        assert_eq!(
            cfg.http_stream_url(),
            "https://api.example.com/chatbot/stream"
        );
    }

    #[test]
    fn trailing_slash_is_not_doubled() {
        let cfg = parse(&["--server-url", "ws://host:9000/"]);
        assert_eq!(cfg.websocket_url(), "ws://host:9000/chatbot/ws");
    }

    #[rstest]
    #[case(&["--server-url", "http://localhost:8000"])]
    #[case(&["--ws-path", "chatbot/ws"])]
    #[case(&["--http-url", "ftp://nope"])]
    #[case(&["--reconnect-delay-ms", "10"])]
    #[case(&["--commit-wait-ms", "60000"])]
    #[case(&["--audio-chunk-ms", "5"])]
    #[case(&["--speech-command", "  "])]
    fn validate_rejects_out_of_range_values(#[case] args: &[&str]) {
        assert!(parse(args).validate().is_err());
    }

    #[test]
    fn transport_display_matches_value_names() {
        assert_eq!(Transport::Ws.to_string(), "ws");
        assert_eq!(Transport::Http.to_string(), "http");
    }
}
