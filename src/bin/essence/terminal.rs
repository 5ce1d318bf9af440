//! Screen handling for the chat view: alternate screen, resize signal, and
//! frame drawing.

use anyhow::{anyhow, Result};
use crossterm::{
    cursor::{MoveTo, Show},
    execute, queue,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor},
    terminal::{size as terminal_size, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};
use essence::log_debug;
use essence::messages::Sender;
use essence::render::{display_width, render_messages, wrap_text, LineRole};
use essence::toast::{format_toast_line, Toast, ToastSeverity};
use std::io::{self, Write};
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

pub(crate) const PROMPT: &str = "> ";

static SIGWINCH_RECEIVED: AtomicBool = AtomicBool::new(false);
static ALT_SCREEN_ENABLED: AtomicBool = AtomicBool::new(false);
static PANIC_HOOK_INSTALLED: OnceLock<()> = OnceLock::new();

extern "C" fn handle_sigwinch(_: libc::c_int) {
    SIGWINCH_RECEIVED.store(true, Ordering::SeqCst);
}

pub(crate) fn install_sigwinch_handler() -> Result<()> {
    unsafe {
        // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
        let handler = handle_sigwinch as *const () as libc::sighandler_t;
        if libc::signal(libc::SIGWINCH, handler) == libc::SIG_ERR {
            log_debug("failed to install SIGWINCH handler");
            return Err(anyhow!("failed to install SIGWINCH handler"));
        }
    }
    Ok(())
}

pub(crate) fn take_sigwinch() -> bool {
    SIGWINCH_RECEIVED.swap(false, Ordering::SeqCst)
}

pub(crate) fn current_size() -> (u16, u16) {
    terminal_size().unwrap_or((80, 24))
}

/// Keeps the alternate screen active and restores the shell on drop or panic.
pub(crate) struct ScreenGuard;

impl ScreenGuard {
    pub(crate) fn enter() -> io::Result<Self> {
        install_panic_hook();
        execute!(io::stdout(), EnterAlternateScreen)?;
        ALT_SCREEN_ENABLED.store(true, Ordering::SeqCst);
        Ok(ScreenGuard)
    }
}

impl Drop for ScreenGuard {
    fn drop(&mut self) {
        restore_screen();
    }
}

fn restore_screen() {
    let mut stdout = io::stdout();
    if ALT_SCREEN_ENABLED.swap(false, Ordering::SeqCst) {
        let _ = execute!(stdout, LeaveAlternateScreen);
    }
    let _ = execute!(stdout, Show);
    let _ = stdout.flush();
}

fn install_panic_hook() {
    PANIC_HOOK_INSTALLED.get_or_init(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            restore_screen();
            let location = info
                .location()
                .map(|loc| format!("{}:{}", loc.file(), loc.line()))
                .unwrap_or_else(|| "unknown".to_string());
            log_debug(&format!("panic at {location}"));
            previous(info);
        }));
    });
}

/// Borrowed session state needed for one frame.
pub(crate) struct FrameView<'a> {
    pub(crate) messages: &'a [essence::messages::Message],
    pub(crate) thinking: bool,
    pub(crate) toasts: Vec<&'a Toast>,
    pub(crate) transcript_preview: &'a str,
    pub(crate) draft: &'a str,
    pub(crate) status: String,
    /// Shown instead of the conversation while set.
    pub(crate) overlay: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FrameLine {
    pub(crate) color: Option<Color>,
    pub(crate) dim: bool,
    pub(crate) text: String,
}

impl FrameLine {
    fn plain(text: String) -> Self {
        Self {
            color: None,
            dim: false,
            text,
        }
    }

    fn colored(color: Color, text: String) -> Self {
        Self {
            color: Some(color),
            dim: false,
            text,
        }
    }
}

fn severity_color(severity: ToastSeverity) -> Color {
    match severity {
        ToastSeverity::Info => Color::Blue,
        ToastSeverity::Success => Color::Green,
        ToastSeverity::Warning => Color::Yellow,
        ToastSeverity::Error => Color::Red,
    }
}

fn clip(text: &str, cols: usize) -> String {
    if display_width(text) <= cols {
        return text.to_string();
    }
    wrap_text(text, cols).into_iter().next().unwrap_or_default()
}

/// Lay out a full screen: the tail of the conversation above a footer with
/// toasts, the live transcript, the draft, and the status line. The prompt
/// row is left free.
pub(crate) fn compose_frame(view: &FrameView<'_>, cols: u16, rows: u16) -> Vec<FrameLine> {
    let cols = usize::from(cols.max(20));
    let rows = usize::from(rows.max(6));

    let mut footer = vec![FrameLine {
        color: None,
        dim: true,
        text: "─".repeat(cols),
    }];
    for toast in &view.toasts {
        footer.push(FrameLine::colored(
            severity_color(toast.severity),
            clip(&format_toast_line(toast), cols),
        ));
    }
    if !view.transcript_preview.is_empty() {
        footer.push(FrameLine {
            color: None,
            dim: true,
            text: clip(&format!("heard: {}", view.transcript_preview), cols),
        });
    }
    if !view.draft.is_empty() {
        footer.push(FrameLine::plain(clip(&format!("draft: {}", view.draft), cols)));
    }
    footer.push(FrameLine {
        color: None,
        dim: true,
        text: clip(&view.status, cols),
    });

    let body_rows = rows.saturating_sub(footer.len() + 1);
    if let Some(overlay) = view.overlay {
        let mut frame: Vec<FrameLine> = overlay
            .lines()
            .take(body_rows)
            .map(|line| FrameLine::plain(clip(line, cols)))
            .collect();
        while frame.len() < body_rows {
            frame.push(FrameLine::plain(String::new()));
        }
        frame.extend(footer);
        return frame;
    }
    let rendered = render_messages(view.messages, cols, view.thinking);
    let skip = rendered.len().saturating_sub(body_rows);
    let mut frame: Vec<FrameLine> = rendered
        .into_iter()
        .skip(skip)
        .map(|line| match line.role {
            LineRole::Bubble(Sender::User) => FrameLine::colored(Color::Cyan, line.text),
            LineRole::Bubble(Sender::Bot) => FrameLine::colored(Color::Green, line.text),
            LineRole::Thinking => FrameLine {
                color: None,
                dim: true,
                text: line.text,
            },
            LineRole::Spacer => FrameLine::plain(line.text),
        })
        .collect();
    while frame.len() < body_rows {
        frame.push(FrameLine::plain(String::new()));
    }
    frame.extend(footer);
    frame
}

/// Repaint the screen and leave the cursor after the prompt.
pub(crate) fn draw_frame(out: &mut impl Write, lines: &[FrameLine]) -> io::Result<()> {
    queue!(out, MoveTo(0, 0), Clear(ClearType::All))?;
    for line in lines {
        if line.dim {
            queue!(out, SetAttribute(Attribute::Dim))?;
        }
        if let Some(color) = line.color {
            queue!(out, SetForegroundColor(color))?;
        }
        queue!(
            out,
            Print(&line.text),
            ResetColor,
            SetAttribute(Attribute::Reset),
            Print("\r\n")
        )?;
    }
    queue!(out, Print(PROMPT))?;
    out.flush()
}
