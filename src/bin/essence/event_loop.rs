//! Core runtime loop that feeds stdin commands, backend events, microphone
//! chunks, and HTTP replies into the chat session.

use std::collections::VecDeque;
use std::io::{self, BufRead, IsTerminal};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{never, select, unbounded, Receiver, Sender};
use essence::capture::{AudioChunk, MicRecorder};
use essence::config::AppConfig;
use essence::connection::{ConnectionEvent, ConnectionHandle};
use essence::http_fallback::{spawn_turn, HttpEvent};
use essence::log_debug;
use essence::playback::CommandSpeech;
use essence::session::{ChatSession, SessionEffect};
use essence::toast::ToastSeverity;
use tokio::runtime::Handle;

use crate::commands::{parse_input_line, InputCommand, HELP_TEXT};
use crate::terminal::{compose_frame, current_size, draw_frame, take_sigwinch, FrameView};

const TICK_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) type Session = ChatSession<ConnectionHandle, CommandSpeech>;

/// Long-lived handles the loop needs to carry out session effects.
pub(crate) struct EventLoopDeps {
    pub(crate) runtime: Handle,
    pub(crate) config: AppConfig,
    pub(crate) http_client: Option<reqwest::Client>,
    pub(crate) connection_rx: Option<Receiver<ConnectionEvent>>,
}

struct EventLoopState {
    recorder: Option<MicRecorder>,
    mic_tx: Sender<AudioChunk>,
    mic_rx: Receiver<AudioChunk>,
    http_tx: Sender<HttpEvent>,
    show_help: bool,
    size: (u16, u16),
    redraw: bool,
}

/// Read stdin lines on a helper thread. The channel closes at EOF.
fn spawn_input_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    let spawned = thread::Builder::new()
        .name("essence-input".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        log_debug(&format!("stdin read failed: {err}"));
                        break;
                    }
                }
            }
        });
    if let Err(err) = spawned {
        log_debug(&format!("failed to spawn input reader: {err}"));
    }
    rx
}

pub(crate) fn run_event_loop(session: &mut Session, deps: EventLoopDeps) -> Result<()> {
    let input_rx = spawn_input_reader();
    let mut connection_rx = deps.connection_rx.clone().unwrap_or_else(never);
    let (mic_tx, mic_rx) = unbounded();
    let (http_tx, http_rx) = unbounded();
    let mut state = EventLoopState {
        recorder: None,
        mic_tx,
        mic_rx: mic_rx.clone(),
        http_tx,
        show_help: false,
        size: current_size(),
        redraw: true,
    };
    let interactive = io::stdout().is_terminal();

    let mut running = true;
    while running {
        let mut connection_stopped = false;
        select! {
            recv(input_rx) -> line => match line {
                Ok(line) => running = handle_input_line(session, &mut state, &deps, &line),
                Err(_) => running = false,
            },
            recv(connection_rx) -> event => match event {
                Ok(event) => session.handle_connection_event(event, Instant::now()),
                Err(_) => connection_stopped = true,
            },
            recv(mic_rx) -> chunk => {
                if let Ok(chunk) = chunk {
                    session.on_audio_chunk(chunk);
                }
            },
            recv(http_rx) -> event => {
                if let Ok(event) = event {
                    session.handle_http_event(event, Instant::now());
                }
            },
            default(TICK_INTERVAL) => {}
        }
        if connection_stopped {
            log_debug("connection manager stopped");
            connection_rx = never();
        }

        session.tick(Instant::now());
        if take_sigwinch() {
            state.size = current_size();
            state.redraw = true;
        }
        if session.take_dirty() {
            state.redraw = true;
        }
        if state.redraw && running {
            state.redraw = false;
            if interactive {
                redraw(session, &state)?;
            }
        }
    }

    if let Some(recorder) = state.recorder.take() {
        recorder.cancel();
    }
    let connected = session.sink().is_some_and(ConnectionHandle::is_connected);
    log_debug(&format!("event loop finished (connected={connected})"));
    Ok(())
}

/// Returns `false` when the user asked to quit.
fn handle_input_line(
    session: &mut Session,
    state: &mut EventLoopState,
    deps: &EventLoopDeps,
    line: &str,
) -> bool {
    let now = Instant::now();
    if std::mem::take(&mut state.show_help) {
        state.redraw = true;
    }
    match parse_input_line(line) {
        InputCommand::Empty => {
            state.redraw = true;
        }
        InputCommand::Quit => return false,
        InputCommand::Help => {
            state.show_help = true;
            state.redraw = true;
        }
        InputCommand::Unknown(name) => {
            session.notify(
                ToastSeverity::Warning,
                format!("Unknown command {name} (try /help)"),
                now,
            );
        }
        InputCommand::Actions(actions) => {
            for action in actions {
                let effects = session.handle_action(action, Instant::now());
                apply_effects(session, state, deps, effects);
            }
        }
    }
    true
}

fn apply_effects(
    session: &mut Session,
    state: &mut EventLoopState,
    deps: &EventLoopDeps,
    effects: Vec<SessionEffect>,
) {
    let mut queue: VecDeque<SessionEffect> = effects.into();
    while let Some(effect) = queue.pop_front() {
        match effect {
            SessionEffect::StartMic => {
                match MicRecorder::start(
                    deps.config.input_device.as_deref(),
                    deps.config.audio_chunk(),
                    state.mic_tx.clone(),
                ) {
                    Ok(recorder) => {
                        tracing::info!(device = recorder.device_name(), "recording started");
                        state.recorder = Some(recorder);
                    }
                    Err(err) => session.on_mic_failed(&format!("{err:#}"), Instant::now()),
                }
            }
            SessionEffect::StopMic => {
                if let Some(recorder) = state.recorder.take() {
                    recorder.stop();
                }
                for chunk in state.mic_rx.try_iter() {
                    session.on_audio_chunk(chunk);
                }
                queue.extend(session.on_recording_stopped(Instant::now()));
            }
            SessionEffect::CancelMic => {
                if let Some(recorder) = state.recorder.take() {
                    recorder.cancel();
                }
                let dropped = state.mic_rx.try_iter().count();
                if dropped > 0 {
                    log_debug(&format!("dropped {dropped} audio chunk(s) after cancel"));
                }
            }
            SessionEffect::SendHttpTurn(turn) => match deps.http_client.as_ref() {
                Some(client) => spawn_turn(
                    &deps.runtime,
                    client.clone(),
                    deps.config.http_stream_url(),
                    turn,
                    state.http_tx.clone(),
                ),
                None => {
                    let _ = state.http_tx.send(HttpEvent::Failed(
                        "HTTP transport is not configured".to_string(),
                    ));
                }
            },
        }
    }
}

fn redraw(session: &Session, state: &EventLoopState) -> Result<()> {
    let view = FrameView {
        messages: session.messages().messages(),
        thinking: session.is_thinking(),
        toasts: session.toasts().active().iter().collect(),
        transcript_preview: session.transcript_preview(),
        draft: session.turn().draft(),
        status: session.status_line(),
        overlay: state.show_help.then_some(HELP_TEXT),
    };
    let (cols, rows) = state.size;
    let frame = compose_frame(&view, cols, rows);
    draw_frame(&mut io::stdout().lock(), &frame)?;
    Ok(())
}
