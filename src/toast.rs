//! Transient notifications for failures and state changes at the chat boundary.
//!
//! Toasts expire per severity, at most a few are visible, and everything that
//! leaves the visible set lands in a bounded history ring.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const TOAST_HISTORY_MAX: usize = 50;
pub const MAX_VISIBLE_TOASTS: usize = 3;

const INFO_DISMISS_MS: u64 = 4_000;
const WARNING_DISMISS_MS: u64 = 6_000;
const ERROR_DISMISS_MS: u64 = 8_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastSeverity {
    Info,
    Success,
    Warning,
    Error,
}

impl ToastSeverity {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Success => "OK",
            Self::Warning => "WARN",
            Self::Error => "ERR",
        }
    }

    #[must_use]
    pub fn dismiss_after(self) -> Duration {
        match self {
            Self::Info | Self::Success => Duration::from_millis(INFO_DISMISS_MS),
            Self::Warning => Duration::from_millis(WARNING_DISMISS_MS),
            Self::Error => Duration::from_millis(ERROR_DISMISS_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub id: u64,
    pub severity: ToastSeverity,
    pub message: String,
    pub dismiss_at: Instant,
    /// How many identical toasts were folded into this one.
    pub repeats: u32,
}

#[derive(Debug, Default)]
pub struct ToastCenter {
    active: VecDeque<Toast>,
    history: VecDeque<Toast>,
    next_id: u64,
}

impl ToastCenter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Show a toast. A repeat of the newest visible toast refreshes it instead
    /// of stacking a duplicate.
    pub fn push(&mut self, severity: ToastSeverity, message: impl Into<String>, now: Instant) {
        let message = message.into();
        let dismiss_at = now + severity.dismiss_after();
        if let Some(latest) = self.active.back_mut() {
            if latest.severity == severity && latest.message == message {
                latest.dismiss_at = dismiss_at;
                latest.repeats = latest.repeats.saturating_add(1);
                return;
            }
        }

        if self.active.len() >= MAX_VISIBLE_TOASTS {
            if let Some(evicted) = self.active.pop_front() {
                self.push_history(evicted);
            }
        }
        self.active.push_back(Toast {
            id: self.next_id,
            severity,
            message,
            dismiss_at,
            repeats: 1,
        });
        self.next_id += 1;
    }

    /// Drop expired toasts. Returns `true` when the visible set changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut changed = false;
        while let Some(position) = self.active.iter().position(|t| now >= t.dismiss_at) {
            if let Some(expired) = self.active.remove(position) {
                self.push_history(expired);
                changed = true;
            }
        }
        changed
    }

    pub fn dismiss_all(&mut self) {
        while let Some(toast) = self.active.pop_front() {
            self.push_history(toast);
        }
    }

    #[must_use]
    pub fn active(&self) -> &VecDeque<Toast> {
        &self.active
    }

    #[must_use]
    pub fn history(&self) -> &VecDeque<Toast> {
        &self.history
    }

    fn push_history(&mut self, toast: Toast) {
        if self.history.len() >= TOAST_HISTORY_MAX {
            self.history.pop_front();
        }
        self.history.push_back(toast);
    }
}

/// One-line plain rendering: `[WARN] message (x3)`.
#[must_use]
pub fn format_toast_line(toast: &Toast) -> String {
    if toast.repeats > 1 {
        format!(
            "[{}] {} (x{})",
            toast.severity.label(),
            toast.message,
            toast.repeats
        )
    } else {
        format!("[{}] {}", toast.severity.label(), toast.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toasts_expire_by_severity() {
        let now = Instant::now();
        let mut center = ToastCenter::new();
        center.push(ToastSeverity::Info, "connected", now);
        center.push(ToastSeverity::Error, "capture failed", now);

        assert!(!center.tick(now + Duration::from_millis(3_999)));
        assert!(center.tick(now + Duration::from_millis(4_000)));
        assert_eq!(center.active().len(), 1);
        assert_eq!(center.active()[0].severity, ToastSeverity::Error);

        assert!(center.tick(now + Duration::from_millis(8_000)));
        assert!(center.active().is_empty());
        assert_eq!(center.history().len(), 2);
    }

    #[test]
    fn visible_count_is_capped_and_oldest_moves_to_history() {
        let now = Instant::now();
        let mut center = ToastCenter::new();
        for n in 0..5 {
            center.push(ToastSeverity::Warning, format!("warning {n}"), now);
        }
        assert_eq!(center.active().len(), MAX_VISIBLE_TOASTS);
        assert_eq!(center.active()[0].message, "warning 2");
        assert_eq!(center.history().len(), 2);
    }

    #[test]
    fn repeated_toast_is_folded() {
        let now = Instant::now();
        let mut center = ToastCenter::new();
        center.push(ToastSeverity::Error, "Backend sent an unreadable message", now);
        center.push(
            ToastSeverity::Error,
            "Backend sent an unreadable message",
            now + Duration::from_secs(5),
        );
        assert_eq!(center.active().len(), 1);
        let toast = &center.active()[0];
        assert_eq!(toast.repeats, 2);
        assert_eq!(toast.dismiss_at, now + Duration::from_secs(13));
        assert_eq!(
            format_toast_line(toast),
            "[ERR] Backend sent an unreadable message (x2)"
        );
    }

    #[test]
    fn history_ring_is_bounded() {
        let now = Instant::now();
        let mut center = ToastCenter::new();
        for n in 0..(TOAST_HISTORY_MAX + 10) {
            center.push(ToastSeverity::Info, format!("note {n}"), now);
            center.dismiss_all();
        }
        assert_eq!(center.history().len(), TOAST_HISTORY_MAX);
        assert_eq!(center.history()[0].message, "note 10");
    }
}
