//! One-shot HTTP turn: multipart POST, streamed plain-text reply.

use crate::capture::decode_data_uri;
use crate::log_debug;
use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::Sender;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tokio::runtime::Handle;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpEvent {
    Chunk(String),
    Finished,
    Failed(String),
}

/// Everything one HTTP turn carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpTurn {
    pub text: String,
    /// Complete WAV recording.
    pub audio: Option<Vec<u8>>,
    /// Data URI; the backend takes it as a form string.
    pub image: Option<String>,
}

impl HttpTurn {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.audio.is_none() && self.image.is_none()
    }

    fn into_form(self) -> Result<Form> {
        let mut form = Form::new();
        if !self.text.trim().is_empty() {
            form = form.text("text", self.text);
        }
        if let Some(audio) = self.audio {
            let part = Part::bytes(audio)
                .file_name("recording.wav")
                .mime_str("audio/wav")
                .context("build audio part")?;
            form = form.part("audio", part);
        }
        if let Some(image) = self.image {
            decode_data_uri(&image).context("attach image")?;
            form = form.text("image", image);
        }
        Ok(form)
    }
}

pub fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("build HTTP client")
}

/// Run one turn on `runtime`, reporting chunks and the outcome on `events`.
pub fn spawn_turn(
    runtime: &Handle,
    client: reqwest::Client,
    url: String,
    turn: HttpTurn,
    events: Sender<HttpEvent>,
) {
    runtime.spawn(async move {
        let outcome = stream_turn(&client, &url, turn, &events).await;
        let last = match outcome {
            Ok(()) => HttpEvent::Finished,
            Err(err) => {
                log_debug(&format!("http turn failed: {err:#}"));
                tracing::warn!(error = %format!("{err:#}"), "http turn failed");
                HttpEvent::Failed(format!("{err:#}"))
            }
        };
        let _ = events.send(last);
    });
}

async fn stream_turn(
    client: &reqwest::Client,
    url: &str,
    turn: HttpTurn,
    events: &Sender<HttpEvent>,
) -> Result<()> {
    if turn.is_empty() {
        bail!("nothing to send");
    }
    let response = client
        .post(url)
        .multipart(turn.into_form()?)
        .send()
        .await
        .with_context(|| format!("POST {url}"))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("backend returned {status}: {}", body.trim());
    }

    let mut decoder = Utf8Stream::default();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let bytes = chunk.context("read reply stream")?;
        if let Some(text) = decoder.push(&bytes) {
            events
                .send(HttpEvent::Chunk(text))
                .map_err(|_| anyhow!("session stopped listening"))?;
        }
    }
    if let Some(rest) = decoder.finish() {
        let _ = events.send(HttpEvent::Chunk(rest));
    }
    Ok(())
}

/// Reassembles UTF-8 text split across network chunks.
#[derive(Debug, Default)]
struct Utf8Stream {
    pending: Vec<u8>,
}

impl Utf8Stream {
    /// Decode everything complete so far. Invalid bytes become U+FFFD; a
    /// code point cut off at the tail waits for the next chunk.
    fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        let mut consumed = 0;
        while consumed < self.pending.len() {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    consumed = self.pending.len();
                }
                Err(err) => {
                    let good = err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(
                        &self.pending[consumed..consumed + good],
                    ));
                    consumed += good;
                    match err.error_len() {
                        Some(bad) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            consumed += bad;
                        }
                        None => break,
                    }
                }
            }
        }
        self.pending.drain(..consumed);
        (!text.is_empty()).then_some(text)
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Read a multipart request up to its closing boundary.
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        while !request.ends_with(b"--\r\n") {
            let n = socket.read(&mut buf).await.expect("read");
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        String::from_utf8_lossy(&request).into_owned()
    }

    #[test]
    fn utf8_stream_holds_split_code_points() {
        let mut stream = Utf8Stream::default();
        let bytes = "héllo".as_bytes();
        assert_eq!(stream.push(&bytes[..2]).as_deref(), Some("h"));
        assert_eq!(stream.push(&bytes[2..]).as_deref(), Some("éllo"));
        assert_eq!(stream.finish(), None);

        assert_eq!(stream.push(&[0xE2, 0x82]), None);
        assert_eq!(stream.finish().as_deref(), Some("\u{FFFD}"));
    }

    #[test]
    fn utf8_stream_keeps_split_code_point_after_invalid_byte() {
        let mut stream = Utf8Stream::default();
        assert_eq!(stream.push(&[0xFF, 0xE2, 0x82]).as_deref(), Some("\u{FFFD}"));
        assert_eq!(stream.push(&[0xAC, b'!']).as_deref(), Some("\u{20AC}!"));
        assert_eq!(stream.push(&[b'a', 0xC3, 0x28, b'b']).as_deref(), Some("a\u{FFFD}(b"));
        assert_eq!(stream.finish(), None);
    }

    #[test]
    fn empty_turn_is_detected() {
        assert!(HttpTurn::default().is_empty());
        assert!(!HttpTurn {
            text: "hi".to_string(),
            ..HttpTurn::default()
        }
        .is_empty());
    }

    #[test]
    fn malformed_image_is_rejected_before_sending() {
        let turn = HttpTurn {
            image: Some("not-a-data-uri".to_string()),
            ..HttpTurn::default()
        };
        assert!(turn.into_form().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn streams_reply_chunks_then_finishes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let request = read_request(&mut socket).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\nconnection: close\r\n\r\nHello from Essence")
                .await
                .expect("write");
            let _ = socket.shutdown().await;
            request
        });

        let (tx, rx) = unbounded();
        let client = build_client().expect("client");
        spawn_turn(
            &Handle::current(),
            client,
            format!("http://{addr}/chatbot/stream"),
            HttpTurn {
                text: "what now".to_string(),
                ..HttpTurn::default()
            },
            tx,
        );

        let request = server.await.expect("server task");
        assert!(request.starts_with("POST /chatbot/stream"));
        assert!(request.contains("name=\"text\""));
        assert!(request.contains("what now"));

        let reply = tokio::task::spawn_blocking(move || {
            let mut reply = String::new();
            loop {
                match rx.recv_timeout(Duration::from_secs(5)).expect("event") {
                    HttpEvent::Chunk(text) => reply.push_str(&text),
                    HttpEvent::Finished => return reply,
                    HttpEvent::Failed(err) => panic!("unexpected failure: {err}"),
                }
            }
        })
        .await
        .expect("join");
        assert_eq!(reply, "Hello from Essence");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn turn_uploads_wav_part_and_image_field() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let request = read_request(&mut socket).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                .await;
            let _ = socket.shutdown().await;
            request
        });

        let image = "data:image/png;base64,iVBORw==".to_string();
        let mut audio = b"RIFF".to_vec();
        audio.extend_from_slice(b"-wav-bytes-");
        let (tx, rx) = unbounded();
        spawn_turn(
            &Handle::current(),
            build_client().expect("client"),
            format!("http://{addr}/chatbot/stream"),
            HttpTurn {
                text: String::new(),
                audio: Some(audio),
                image: Some(image.clone()),
            },
            tx,
        );

        let request = server.await.expect("server task");
        let lowered = request.to_ascii_lowercase();
        assert!(lowered.contains("content-type: multipart/form-data; boundary="));
        assert!(request.contains("name=\"audio\"; filename=\"recording.wav\""));
        assert!(lowered.contains("content-type: audio/wav"));
        assert!(request.contains("RIFF-wav-bytes-"));
        assert!(request.contains("name=\"image\""));
        assert!(request.contains(&image));
        assert!(!request.contains("name=\"text\""));

        let event = tokio::task::spawn_blocking(move || {
            let mut events = Vec::new();
            loop {
                let event = rx.recv_timeout(Duration::from_secs(5)).expect("event");
                let done = !matches!(event, HttpEvent::Chunk(_));
                events.push(event);
                if done {
                    return events;
                }
            }
        })
        .await
        .expect("join");
        assert_eq!(
            event,
            vec![HttpEvent::Chunk("ok".to_string()), HttpEvent::Finished]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn error_status_reports_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let _ = read_request(&mut socket).await;
            let _ = socket
                .write_all(b"HTTP/1.1 400 Bad Request\r\ncontent-length: 31\r\nconnection: close\r\n\r\nTranscript or image is required")
                .await;
        });

        let (tx, rx) = unbounded();
        spawn_turn(
            &Handle::current(),
            build_client().expect("client"),
            format!("http://{addr}/chatbot/stream"),
            HttpTurn {
                text: "x".to_string(),
                ..HttpTurn::default()
            },
            tx,
        );
        let event = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(5)))
            .await
            .expect("join")
            .expect("event");
        match event {
            HttpEvent::Failed(err) => assert!(err.contains("400")),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
