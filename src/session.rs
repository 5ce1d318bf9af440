//! Chat session: routes user actions and backend events through the turn
//! buffer, message log, toasts, and playback.
//!
//! The session is synchronous and owns no threads. Hardware and network work
//! it cannot do inline (microphone streams, HTTP turns) is handed back to the
//! event loop as [`SessionEffect`]s.

use crate::capture::{read_clipboard_image, AudioChunk, ScreenShare};
use crate::config::{AppConfig, Transport};
use crate::connection::{ConnectionEvent, ConnectionHandle};
use crate::http_fallback::{HttpEvent, HttpTurn};
use crate::messages::MessageLog;
use crate::playback::{PlaybackEvent, SpeechEngine, Speaker};
use crate::protocol::{
    BackendCommand, ClientFrame, ImageSource, OutboundFrame, ServerFrame, StatePayload,
};
use crate::toast::{ToastCenter, ToastSeverity};
use crate::turn::{CommitOutcome, DeferredResolution, PendingImage, TurnBuffer};
use crate::{log_debug, log_debug_content};
use std::time::Instant;

pub const RESPONDING_TOAST: &str = "Essence is responding...";
pub const UNREADABLE_FRAME_TOAST: &str = "Backend sent an unreadable message";

/// Outbound side of the backend connection.
pub trait FrameSink {
    /// Queue a frame. Returns `false` if it could not be queued.
    fn send_frame(&mut self, frame: OutboundFrame) -> bool;
}

impl FrameSink for ConnectionHandle {
    fn send_frame(&mut self, frame: OutboundFrame) -> bool {
        self.send(frame)
    }
}

/// Everything a user can ask the client to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    /// Replace the draft.
    Type(String),
    /// Commit the turn.
    Send,
    StartMic,
    /// Stop recording and commit.
    StopMic,
    /// Stop recording and drop the turn.
    CancelMic,
    StartShare,
    StopShare,
    Screenshot,
    Paste,
    Reset,
    ToggleSpeech,
    StopSpeech,
}

/// Work the event loop must carry out for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    StartMic,
    /// Stop the recorder, feed its tail chunks back, then call
    /// [`ChatSession::on_recording_stopped`].
    StopMic,
    CancelMic,
    SendHttpTurn(HttpTurn),
}

pub struct ChatSession<S: FrameSink, E: SpeechEngine> {
    transport: Transport,
    sink: Option<S>,
    turn: TurnBuffer,
    messages: MessageLog,
    toasts: ToastCenter,
    speaker: Speaker<E>,
    share: ScreenShare,
    paste_command: Option<String>,
    speak_replies: bool,
    responding: bool,
    connected: bool,
    transcript_preview: String,
    /// WAV bytes of the current recording, kept for the HTTP transport.
    recorded_audio: Vec<u8>,
    dirty: bool,
}

impl<S: FrameSink, E: SpeechEngine> ChatSession<S, E> {
    /// `sink` is the WebSocket side; it is ignored on the HTTP transport.
    pub fn new(config: &AppConfig, sink: Option<S>, speaker: Speaker<E>) -> Self {
        Self {
            transport: config.transport,
            sink,
            turn: TurnBuffer::new(config.commit_wait()),
            messages: MessageLog::new(),
            toasts: ToastCenter::new(),
            speaker,
            share: ScreenShare::new(config.screenshot_command.clone()),
            paste_command: config.paste_command.clone(),
            speak_replies: config.speak_replies,
            responding: false,
            connected: config.transport == Transport::Http,
            transcript_preview: String::new(),
            recorded_audio: Vec::new(),
            dirty: true,
        }
    }

    #[must_use]
    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    #[must_use]
    pub fn toasts(&self) -> &ToastCenter {
        &self.toasts
    }

    #[must_use]
    pub fn turn(&self) -> &TurnBuffer {
        &self.turn
    }

    #[must_use]
    pub fn speaker(&self) -> &Speaker<E> {
        &self.speaker
    }

    #[must_use]
    pub fn sink(&self) -> Option<&S> {
        self.sink.as_ref()
    }

    #[must_use]
    pub fn is_responding(&self) -> bool {
        self.responding
    }

    #[must_use]
    pub fn is_sharing(&self) -> bool {
        self.share.is_active()
    }

    #[must_use]
    pub fn transcript_preview(&self) -> &str {
        &self.transcript_preview
    }

    /// Backend is working and no reply text has arrived yet.
    #[must_use]
    pub fn is_thinking(&self) -> bool {
        self.responding && !self.messages.has_open_reply()
    }

    /// Returns `true` once per change that needs a redraw.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// One-line state summary for the status bar.
    #[must_use]
    pub fn status_line(&self) -> String {
        let mut parts = vec![match (self.transport, self.connected) {
            (Transport::Http, _) => "http",
            (Transport::Ws, true) => "connected",
            (Transport::Ws, false) => "disconnected",
        }];
        if self.turn.is_recording() {
            parts.push("recording");
        }
        if self.share.is_active() {
            parts.push("sharing");
        }
        if self.responding {
            parts.push("responding");
        }
        if self.speak_replies {
            parts.push(if self.speaker.is_speaking() {
                "speaking"
            } else {
                "voice on"
            });
        }
        let queued = self.turn.pending_images().len();
        let mut line = parts.join(" · ");
        if queued > 0 {
            line.push_str(&format!(" · {queued} image(s) queued"));
        }
        line
    }

    /// Raise a toast on behalf of the front end.
    pub fn notify(&mut self, severity: ToastSeverity, message: impl Into<String>, now: Instant) {
        self.toast(severity, message, now);
    }

    fn toast(&mut self, severity: ToastSeverity, message: impl Into<String>, now: Instant) {
        self.toasts.push(severity, message, now);
        self.dirty = true;
    }

    pub fn handle_action(&mut self, action: UserAction, now: Instant) -> Vec<SessionEffect> {
        self.dirty = true;
        match action {
            UserAction::Type(text) => {
                log_debug_content(&format!("draft: {text}"));
                self.turn.set_draft(&text);
                Vec::new()
            }
            UserAction::Send => self.send(now),
            UserAction::StartMic => self.start_mic(now),
            UserAction::StopMic => {
                if self.turn.is_recording() {
                    vec![SessionEffect::StopMic]
                } else {
                    Vec::new()
                }
            }
            UserAction::CancelMic => {
                if !self.turn.is_recording() {
                    return Vec::new();
                }
                self.turn.set_recording(false);
                self.turn.discard();
                self.recorded_audio.clear();
                self.toast(ToastSeverity::Info, "Recording cancelled", now);
                vec![SessionEffect::CancelMic]
            }
            UserAction::StartShare => {
                if self.share.start() {
                    self.toast(ToastSeverity::Success, "Screen share started", now);
                }
                Vec::new()
            }
            UserAction::StopShare => {
                if self.share.stop() {
                    self.toast(ToastSeverity::Info, "Screen share stopped", now);
                }
                Vec::new()
            }
            UserAction::Screenshot => {
                if self.blocked_while_responding(now) {
                    return Vec::new();
                }
                if !self.share.is_active() {
                    self.toast(
                        ToastSeverity::Warning,
                        "Start a screen share first (/share)",
                        now,
                    );
                    return Vec::new();
                }
                self.capture_shared_screen(now);
                Vec::new()
            }
            UserAction::Paste => {
                if self.blocked_while_responding(now) {
                    return Vec::new();
                }
                match read_clipboard_image(self.paste_command.as_deref()) {
                    Ok(uri) => self.attach_image(uri, ImageSource::Pasted, now),
                    Err(err) => {
                        log_debug(&format!("paste failed: {err:#}"));
                        self.toast(ToastSeverity::Error, format!("Paste failed: {err:#}"), now);
                    }
                }
                Vec::new()
            }
            UserAction::Reset => self.reset(now),
            UserAction::ToggleSpeech => {
                self.speak_replies = !self.speak_replies;
                if !self.speak_replies {
                    self.speaker.stop();
                }
                let label = if self.speak_replies {
                    "Spoken replies on"
                } else {
                    "Spoken replies off"
                };
                self.toast(ToastSeverity::Info, label, now);
                Vec::new()
            }
            UserAction::StopSpeech => {
                self.speaker.stop();
                Vec::new()
            }
        }
    }

    fn blocked_while_responding(&mut self, now: Instant) -> bool {
        if self.responding {
            self.toast(ToastSeverity::Info, RESPONDING_TOAST, now);
        }
        self.responding
    }

    fn start_mic(&mut self, now: Instant) -> Vec<SessionEffect> {
        if self.turn.is_recording() || self.blocked_while_responding(now) {
            return Vec::new();
        }
        self.speaker.stop();
        self.turn.set_recording(true);
        self.recorded_audio.clear();
        vec![SessionEffect::StartMic]
    }

    /// The recorder could not be opened.
    pub fn on_mic_failed(&mut self, error: &str, now: Instant) {
        log_debug(&format!("mic start failed: {error}"));
        self.turn.set_recording(false);
        self.toast(ToastSeverity::Error, format!("Microphone unavailable: {error}"), now);
    }

    /// A recorded chunk is ready for upload.
    pub fn on_audio_chunk(&mut self, chunk: AudioChunk) {
        if !self.turn.is_recording() {
            return;
        }
        match self.transport {
            Transport::Ws => {
                let Some(sink) = self.sink.as_mut() else {
                    return;
                };
                if sink.send_frame(OutboundFrame::Audio(chunk.bytes)) {
                    self.turn.mark_audio_streamed();
                } else {
                    log_debug(&format!("audio chunk {} not queued", chunk.seq));
                }
            }
            Transport::Http => {
                self.recorded_audio.extend_from_slice(&chunk.bytes);
                self.turn.mark_audio_streamed();
            }
        }
    }

    /// Recorder stopped and its tail chunks were delivered: commit the turn.
    pub fn on_recording_stopped(&mut self, now: Instant) -> Vec<SessionEffect> {
        if !self.turn.is_recording() {
            return Vec::new();
        }
        self.turn.set_recording(false);
        self.dirty = true;
        self.commit(now)
    }

    fn send(&mut self, now: Instant) -> Vec<SessionEffect> {
        if self.blocked_while_responding(now) {
            return Vec::new();
        }
        if self.turn.is_recording() {
            return vec![SessionEffect::StopMic];
        }
        self.commit(now)
    }

    fn commit(&mut self, now: Instant) -> Vec<SessionEffect> {
        if self.transport == Transport::Ws && !self.connected {
            self.messages.push_apology();
            self.toast(ToastSeverity::Warning, "Not connected to Essence", now);
            return Vec::new();
        }
        match self.turn.commit(now) {
            CommitOutcome::Send(frames) => self.dispatch_turn(frames, now),
            CommitOutcome::Deferred { deadline } => {
                tracing::info!(
                    wait_ms = deadline.saturating_duration_since(now).as_millis() as u64,
                    "empty commit deferred"
                );
                log_debug(&format!(
                    "empty commit deferred for {} ms",
                    deadline.saturating_duration_since(now).as_millis()
                ));
                Vec::new()
            }
            CommitOutcome::AlreadyDeferred { .. } => Vec::new(),
        }
    }

    fn dispatch_turn(&mut self, frames: Vec<ClientFrame>, now: Instant) -> Vec<SessionEffect> {
        match self.transport {
            Transport::Ws => {
                self.send_frames(frames);
                Vec::new()
            }
            Transport::Http => {
                let turn = self.http_turn_from(frames, now);
                if turn.is_empty() {
                    return Vec::new();
                }
                tracing::info!(
                    has_audio = turn.audio.is_some(),
                    has_image = turn.image.is_some(),
                    "http turn dispatched"
                );
                let images = turn.image.iter().cloned().collect();
                self.messages.push_user(&turn.text, images);
                self.responding = true;
                vec![SessionEffect::SendHttpTurn(turn)]
            }
        }
    }

    fn http_turn_from(&mut self, frames: Vec<ClientFrame>, now: Instant) -> HttpTurn {
        let mut turn = HttpTurn::default();
        let mut dropped_images = 0usize;
        for frame in frames {
            match frame {
                ClientFrame::TextInput { text, .. } => turn.text = text,
                ClientFrame::ImageInput { image, .. } => {
                    if turn.image.is_none() {
                        turn.image = Some(image);
                    } else {
                        dropped_images += 1;
                    }
                }
                ClientFrame::Commit | ClientFrame::Reset => {}
            }
        }
        let mut audio = std::mem::take(&mut self.recorded_audio);
        if !audio.is_empty() {
            match crate::capture::microphone::finalize_wav(&mut audio) {
                Ok(()) => turn.audio = Some(audio),
                Err(err) => log_debug(&format!("dropping recording: {err:#}")),
            }
        }
        if dropped_images > 0 {
            self.toast(
                ToastSeverity::Warning,
                format!("HTTP turns carry one image; {dropped_images} dropped"),
                now,
            );
        }
        turn
    }

    fn send_frames(&mut self, frames: Vec<ClientFrame>) {
        let Some(sink) = self.sink.as_mut() else {
            log_debug("no connection; frames dropped");
            return;
        };
        tracing::debug!(frames = frames.len(), "sending client frames");
        for frame in frames {
            let kind = frame.kind();
            if !sink.send_frame(OutboundFrame::Json(frame)) {
                log_debug(&format!("{kind} frame not queued"));
            }
        }
    }

    /// Route a captured image: queued while recording, sent at once otherwise.
    pub fn attach_image(&mut self, data_uri: String, source: ImageSource, now: Instant) {
        self.dirty = true;
        let immediate = !self.turn.is_recording() && self.transport == Transport::Ws && self.connected;
        if !immediate {
            self.turn.add_image(PendingImage::new(data_uri, source));
            self.toast(ToastSeverity::Info, "Image queued for this turn", now);
            return;
        }
        self.send_frames(vec![ClientFrame::ImageInput {
            image: data_uri,
            source,
        }]);
        self.toast(ToastSeverity::Success, "Image sent", now);
    }

    fn capture_shared_screen(&mut self, now: Instant) {
        match self.share.capture() {
            Ok(uri) => self.attach_image(uri, ImageSource::Shared, now),
            Err(err) => {
                log_debug(&format!("screenshot failed: {err:#}"));
                self.toast(ToastSeverity::Error, format!("Screenshot failed: {err:#}"), now);
            }
        }
    }

    fn reset(&mut self, now: Instant) -> Vec<SessionEffect> {
        let was_recording = self.turn.is_recording();
        let frame = self.turn.reset();
        if self.transport == Transport::Ws {
            self.send_frames(vec![frame]);
        }
        self.messages.clear();
        self.speaker.stop();
        self.responding = false;
        self.transcript_preview.clear();
        self.recorded_audio.clear();
        self.toast(ToastSeverity::Info, "Conversation reset", now);
        if was_recording {
            vec![SessionEffect::CancelMic]
        } else {
            Vec::new()
        }
    }

    pub fn handle_connection_event(&mut self, event: ConnectionEvent, now: Instant) {
        self.dirty = true;
        match event {
            ConnectionEvent::Connected => {
                self.connected = true;
                self.toast(ToastSeverity::Success, "Connected to Essence", now);
            }
            ConnectionEvent::Closed { reconnect_in } => {
                let was_connected = std::mem::replace(&mut self.connected, false);
                if self.responding || self.messages.has_open_reply() {
                    tracing::warn!("connection closed while a reply was streaming");
                    self.responding = false;
                    self.messages.push_apology();
                }
                if was_connected {
                    self.toast(
                        ToastSeverity::Warning,
                        format!(
                            "Connection lost; retrying in {}s",
                            reconnect_in.as_secs_f32()
                        ),
                        now,
                    );
                }
            }
            ConnectionEvent::Undecodable(error) => {
                log_debug(&format!("undecodable backend frame: {error}"));
                self.toast(ToastSeverity::Error, UNREADABLE_FRAME_TOAST, now);
            }
            ConnectionEvent::Frame(frame) => self.handle_frame(frame, now),
        }
    }

    fn handle_frame(&mut self, frame: ServerFrame, now: Instant) {
        match frame {
            ServerFrame::StateUpdate(state) => self.apply_state(&state, now),
            ServerFrame::TranscriptUpdate(text) => {
                log_debug_content(&format!("transcript: {text}"));
                self.transcript_preview = text;
                match self.turn.on_transcript(&self.transcript_preview, now) {
                    Some(DeferredResolution::Fire(frames)) => {
                        tracing::info!("deferred commit fired by transcript");
                        log_debug("deferred commit fired by transcript");
                        self.send_frames(frames);
                    }
                    Some(DeferredResolution::Expired) => {
                        log_debug("deferred commit expired");
                    }
                    None => {}
                }
            }
            ServerFrame::ResponseChunk(delta) => {
                self.messages.apply_chunk(&delta);
            }
            ServerFrame::Command(BackendCommand::CaptureScreenshot) => {
                if self.share.is_active() {
                    self.capture_shared_screen(now);
                } else {
                    log_debug("capture_screenshot ignored: no active screen share");
                }
            }
            ServerFrame::Command(BackendCommand::Unsupported) => {
                log_debug("unsupported backend command ignored");
            }
            ServerFrame::CommitConfirmation(confirmation) => {
                self.transcript_preview.clear();
                self.messages
                    .push_user(confirmation.text(), confirmation.all_images());
            }
        }
    }

    fn apply_state(&mut self, state: &StatePayload, now: Instant) {
        if let StatePayload::Snapshot(snapshot) = state {
            if !snapshot.transcript.is_empty() {
                self.transcript_preview.clone_from(&snapshot.transcript);
            }
        }
        if state.is_responding() {
            self.responding = true;
            return;
        }
        self.responding = false;
        self.finish_reply(now);
    }

    fn finish_reply(&mut self, now: Instant) {
        let Some(reply) = self.messages.finalize_reply() else {
            return;
        };
        log_debug_content(&format!("reply: {reply}"));
        if !self.speak_replies {
            return;
        }
        if let PlaybackEvent::Error(err) = self.speaker.speak(&reply) {
            self.toast(ToastSeverity::Warning, format!("Speech unavailable: {err}"), now);
        }
    }

    pub fn handle_http_event(&mut self, event: HttpEvent, now: Instant) {
        self.dirty = true;
        match event {
            HttpEvent::Chunk(delta) => {
                self.messages.apply_chunk(&delta);
            }
            HttpEvent::Finished => {
                self.responding = false;
                self.finish_reply(now);
            }
            HttpEvent::Failed(error) => {
                self.responding = false;
                self.messages.push_apology();
                self.toast(ToastSeverity::Error, format!("Request failed: {error}"), now);
            }
        }
    }

    /// Drive timers: deferred commit expiry, toast expiry, playback end.
    pub fn tick(&mut self, now: Instant) {
        if let Some(DeferredResolution::Expired) = self.turn.poll_deferred(now) {
            tracing::info!("deferred commit expired without a transcript");
            log_debug("deferred commit expired without a transcript");
        }
        if self.toasts.tick(now) {
            self.dirty = true;
        }
        match self.speaker.poll() {
            Some(PlaybackEvent::Error(err)) => {
                self.toast(ToastSeverity::Warning, format!("Speech unavailable: {err}"), now);
            }
            Some(_) => self.dirty = true,
            None => {}
        }
    }
}
