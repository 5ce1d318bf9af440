//! Terminal bubble layout for the message log.
//!
//! Output is plain text lines tagged with their sender; coloring is left to
//! the terminal front end.

use crate::capture::data_uri_info;
use crate::messages::{Message, Sender};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

pub const THINKING_TEXT: &str = "Essence is thinking...";
const STREAMING_MARKER: &str = " …";
const MIN_BUBBLE_INNER: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRole {
    Bubble(Sender),
    Thinking,
    Spacer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedLine {
    pub role: LineRole,
    pub text: String,
}

impl RenderedLine {
    fn spacer() -> Self {
        Self {
            role: LineRole::Spacer,
            text: String::new(),
        }
    }
}

#[must_use]
pub fn display_width(text: &str) -> usize {
    UnicodeWidthStr::width(text)
}

/// Word-wrap by display width. Words wider than the limit are split by character.
#[must_use]
pub fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    let max_width = max_width.max(1);
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut current = String::new();
        let mut used = 0usize;
        for word in paragraph.split_whitespace() {
            let word_width = display_width(word);
            let gap = usize::from(used > 0);
            if used + gap + word_width <= max_width {
                if gap == 1 {
                    current.push(' ');
                }
                current.push_str(word);
                used += gap + word_width;
                continue;
            }
            if used > 0 {
                lines.push(std::mem::take(&mut current));
                used = 0;
            }
            if word_width <= max_width {
                current.push_str(word);
                used = word_width;
                continue;
            }
            for ch in word.chars() {
                let w = UnicodeWidthChar::width(ch).unwrap_or(0);
                if used + w > max_width && used > 0 {
                    lines.push(std::mem::take(&mut current));
                    used = 0;
                }
                current.push(ch);
                used += w;
            }
        }
        lines.push(current);
    }
    lines
}

/// `[image: image/png, 12 KB]`, or a generic marker for URIs that do not parse.
#[must_use]
pub fn image_summary(uri: &str) -> String {
    match data_uri_info(uri) {
        Some((mime, bytes)) => format!("[image: {mime}, {} KB]", bytes.div_ceil(1024)),
        None => "[image]".to_string(),
    }
}

fn bubble_body(message: &Message) -> Vec<String> {
    let mut body = Vec::new();
    if !message.text.is_empty() || message.images.is_empty() {
        body.push(message.text.clone());
    }
    body.extend(message.images.iter().map(|uri| image_summary(uri)));
    if !message.is_final {
        if let Some(last) = body.last_mut() {
            last.push_str(STREAMING_MARKER);
        }
    }
    body
}

fn render_bubble(message: &Message, width: usize) -> Vec<RenderedLine> {
    let label = match message.sender {
        Sender::User => "You",
        Sender::Bot => "Essence",
    };
    let max_inner = (width.saturating_mul(3) / 4)
        .saturating_sub(4)
        .max(MIN_BUBBLE_INNER);
    let mut wrapped = Vec::new();
    for block in bubble_body(message) {
        wrapped.extend(wrap_text(&block, max_inner));
    }
    let inner = wrapped
        .iter()
        .map(|line| display_width(line))
        .chain(std::iter::once(display_width(label) + 1))
        .max()
        .unwrap_or(MIN_BUBBLE_INNER);
    let bubble_width = inner + 4;
    let indent = match message.sender {
        Sender::User => " ".repeat(width.saturating_sub(bubble_width)),
        Sender::Bot => String::new(),
    };

    let role = LineRole::Bubble(message.sender);
    let top_fill = "─".repeat(bubble_width.saturating_sub(3 + display_width(label)));
    let mut lines = vec![RenderedLine {
        role,
        text: format!("{indent}╭ {label}{top_fill}╮"),
    }];
    for line in wrapped {
        let pad = " ".repeat(inner.saturating_sub(display_width(&line)));
        lines.push(RenderedLine {
            role,
            text: format!("{indent}│ {line}{pad} │"),
        });
    }
    lines.push(RenderedLine {
        role,
        text: format!("{indent}╰{}╯", "─".repeat(bubble_width.saturating_sub(2))),
    });
    lines
}

/// Lay out every message as a bubble. User bubbles hug the right edge.
#[must_use]
pub fn render_messages(messages: &[Message], width: usize, thinking: bool) -> Vec<RenderedLine> {
    let mut lines = Vec::new();
    for message in messages {
        if !lines.is_empty() {
            lines.push(RenderedLine::spacer());
        }
        lines.extend(render_bubble(message, width));
    }
    if thinking {
        lines.push(RenderedLine::spacer());
        lines.push(RenderedLine {
            role: LineRole::Thinking,
            text: THINKING_TEXT.to_string(),
        });
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageLog;

    fn message(sender: Sender, text: &str, is_final: bool) -> Message {
        Message {
            id: 0,
            sender,
            text: text.to_string(),
            images: Vec::new(),
            is_final,
        }
    }

    #[test]
    fn wrap_respects_display_width() {
        assert_eq!(
            wrap_text("the quick brown fox", 9),
            vec!["the quick", "brown fox"]
        );
        assert_eq!(wrap_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(wrap_text("一二三四", 4), vec!["一二", "三四"]);
        assert_eq!(wrap_text("a\n\nb", 10), vec!["a", "", "b"]);
    }

    #[test]
    fn user_bubbles_align_right_and_bot_left() {
        let width = 60;
        let user = render_bubble(&message(Sender::User, "hello", true), width);
        let bot = render_bubble(&message(Sender::Bot, "hi there", true), width);
        for line in &user {
            assert_eq!(display_width(&line.text), width);
            assert!(line.text.starts_with(' '));
        }
        for line in &bot {
            assert!(!line.text.starts_with(' '));
        }
        assert!(user[1].text.contains("│ hello"));
        assert!(user[0].text.contains("You"));
    }

    #[test]
    fn bubble_rows_share_one_width() {
        let lines = render_bubble(
            &message(Sender::Bot, "a reply long enough to wrap across rows", true),
            30,
        );
        let widths: Vec<usize> = lines.iter().map(|l| display_width(&l.text)).collect();
        assert!(lines.len() > 3);
        assert!(widths.iter().all(|w| *w == widths[0]));
    }

    #[test]
    fn open_reply_shows_streaming_marker() {
        let lines = render_bubble(&message(Sender::Bot, "Hel", false), 40);
        assert!(lines[1].text.contains("Hel …"));
    }

    #[test]
    fn images_are_summarized() {
        let mut msg = message(Sender::User, "", true);
        msg.images.push(format!(
            "data:image/jpeg;base64,{}",
            "A".repeat(4 * 1024)
        ));
        let lines = render_bubble(&msg, 80);
        assert_eq!(lines.len(), 3);
        assert!(lines[1].text.contains("[image: image/jpeg, 3 KB]"));
        assert_eq!(image_summary("not a uri"), "[image]");
    }

    #[test]
    fn thinking_indicator_trails_the_log() {
        let log = MessageLog::new();
        let lines = render_messages(log.messages(), 80, true);
        let last = lines.last().expect("thinking line");
        assert_eq!(last.role, LineRole::Thinking);
        assert_eq!(last.text, THINKING_TEXT);
        assert!(render_messages(log.messages(), 80, false)
            .iter()
            .all(|l| l.role != LineRole::Thinking));
    }
}
