//! Spoken playback of bot replies. One utterance at a time, no queue.

use crate::log_debug;
use anyhow::{anyhow, Context, Result};
use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::thread;

/// Something that can voice a string and be interrupted.
pub trait SpeechEngine {
    fn start(&mut self, text: &str) -> Result<()>;
    fn cancel(&mut self);
    /// `true` while the last started utterance is still playing.
    fn is_active(&mut self) -> bool;
    /// Why the last utterance ended badly, once it is no longer active.
    fn take_failure(&mut self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started,
    Ended,
    Error(String),
}

pub struct Speaker<E: SpeechEngine> {
    engine: E,
    speaking: bool,
}

impl<E: SpeechEngine> Speaker<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            speaking: false,
        }
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Cancel whatever is playing, then voice `text`.
    pub fn speak(&mut self, text: &str) -> PlaybackEvent {
        self.stop();
        let spoken = strip_markdown(text);
        if spoken.trim().is_empty() {
            return PlaybackEvent::Ended;
        }
        match self.engine.start(&spoken) {
            Ok(()) => {
                self.speaking = true;
                PlaybackEvent::Started
            }
            Err(err) => {
                log_debug(&format!("speech start failed: {err:#}"));
                PlaybackEvent::Error(format!("{err:#}"))
            }
        }
    }

    pub fn stop(&mut self) {
        self.engine.cancel();
        self.speaking = false;
    }

    /// Report the end of the current utterance once.
    pub fn poll(&mut self) -> Option<PlaybackEvent> {
        if !self.speaking || self.engine.is_active() {
            return None;
        }
        self.speaking = false;
        Some(match self.engine.take_failure() {
            Some(err) => {
                log_debug(&format!("speech ended with error: {err}"));
                PlaybackEvent::Error(err)
            }
            None => PlaybackEvent::Ended,
        })
    }

    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }
}

/// One way of launching the speech tool.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SpeechCommand {
    argv: Vec<String>,
    /// Text goes to stdin instead of the final argument.
    text_on_stdin: bool,
}

impl SpeechCommand {
    fn piped(argv: &[&str]) -> Self {
        Self {
            argv: argv.iter().map(|arg| (*arg).to_string()).collect(),
            text_on_stdin: true,
        }
    }

    fn spawn(&self, text: &str) -> Result<Child> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("speech command is empty"))?;
        let mut command = Command::new(program);
        command.args(args).stdout(Stdio::null()).stderr(Stdio::null());
        if self.text_on_stdin {
            command.stdin(Stdio::piped());
        } else {
            command.arg(text).stdin(Stdio::null());
        }
        let mut child = command
            .spawn()
            .with_context(|| format!("launch {program}"))?;
        if let Some(mut stdin) = child.stdin.take() {
            let text = text.to_string();
            // Long replies can outgrow the pipe buffer while the tool is still speaking.
            let writer = thread::Builder::new()
                .name("essence-speech-input".to_string())
                .spawn(move || {
                    if let Err(err) = stdin.write_all(text.as_bytes()) {
                        log_debug(&format!("speech stdin write failed: {err}"));
                    }
                });
            if let Err(err) = writer {
                let _ = child.kill();
                let _ = child.wait();
                return Err(anyhow!(err).context("spawn speech input writer"));
            }
        }
        Ok(child)
    }
}

/// Speech through an external command. The platform tools read the text on
/// stdin; a custom command gets it as its final argument.
pub struct CommandSpeech {
    candidates: Vec<SpeechCommand>,
    child: Option<Child>,
    failure: Option<String>,
}

impl CommandSpeech {
    /// A custom command line, or the platform speech tool when `None`.
    pub fn new(command: Option<&str>) -> Result<Self> {
        let candidates = match command {
            Some(command) => {
                let argv = shell_words::split(command)
                    .with_context(|| format!("parse speech command: {command}"))?;
                if argv.is_empty() {
                    return Err(anyhow!("speech command is empty"));
                }
                vec![SpeechCommand {
                    argv,
                    text_on_stdin: false,
                }]
            }
            None => default_speech_commands(),
        };
        Ok(Self::from_candidates(candidates))
    }

    fn from_candidates(candidates: Vec<SpeechCommand>) -> Self {
        Self {
            candidates,
            child: None,
            failure: None,
        }
    }
}

impl SpeechEngine for CommandSpeech {
    fn start(&mut self, text: &str) -> Result<()> {
        self.failure = None;
        let mut last_err = anyhow!("no speech command available");
        for candidate in &self.candidates {
            match candidate.spawn(text) {
                Ok(child) => {
                    self.child = Some(child);
                    return Ok(());
                }
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }

    fn cancel(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.failure = None;
    }

    fn is_active(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                if !status.success() {
                    self.failure = Some(format!("speech command exited with {status}"));
                }
                self.child = None;
                false
            }
            Err(err) => {
                self.failure = Some(format!("speech command lost: {err}"));
                self.child = None;
                false
            }
        }
    }

    fn take_failure(&mut self) -> Option<String> {
        self.failure.take()
    }
}

impl Drop for CommandSpeech {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(target_os = "macos")]
fn default_speech_commands() -> Vec<SpeechCommand> {
    vec![SpeechCommand::piped(&["say", "-f", "-"])]
}

#[cfg(not(target_os = "macos"))]
fn default_speech_commands() -> Vec<SpeechCommand> {
    vec![
        SpeechCommand::piped(&["espeak-ng", "--stdin"]),
        SpeechCommand::piped(&["espeak", "--stdin"]),
    ]
}

/// Drop markdown emphasis, code ticks, heading and list markers, and link
/// targets.
#[must_use]
pub fn strip_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (index, line) in text.lines().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        let line = line.trim_start().trim_start_matches('#').trim_start();
        strip_inline(strip_list_marker(line), &mut out);
    }
    out
}

/// `- item`, `* item`, `+ item`, `1. item` and `1) item` → `item`.
fn strip_list_marker(line: &str) -> &str {
    if let Some(rest) = line
        .strip_prefix(['-', '*', '+'])
        .filter(|rest| rest.starts_with(char::is_whitespace))
    {
        return rest.trim_start();
    }
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 {
        if let Some(rest) = line[digits..]
            .strip_prefix(['.', ')'])
            .filter(|rest| rest.starts_with(char::is_whitespace))
        {
            return rest.trim_start();
        }
    }
    line
}

fn strip_inline(line: &str, out: &mut String) {
    let mut rest = line;
    while let Some(ch) = rest.chars().next() {
        if ch == '[' {
            if let Some((label, after)) = split_link(rest) {
                strip_inline(label, out);
                rest = after;
                continue;
            }
        }
        if !matches!(ch, '*' | '_' | '`') {
            out.push(ch);
        }
        rest = &rest[ch.len_utf8()..];
    }
}

/// `[label](target)rest` → `(label, rest)`.
fn split_link(text: &str) -> Option<(&str, &str)> {
    let close = text.find("](")?;
    let label = &text[1..close];
    if label.contains('[') {
        return None;
    }
    let after_paren = &text[close + 2..];
    let end = after_paren.find(')')?;
    Some((label, &after_paren[end + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingEngine {
        calls: Vec<String>,
        active: bool,
        fail: bool,
    }

    impl SpeechEngine for RecordingEngine {
        fn start(&mut self, text: &str) -> Result<()> {
            if self.fail {
                return Err(anyhow!("no audio"));
            }
            self.calls.push(format!("start:{text}"));
            self.active = true;
            Ok(())
        }

        fn cancel(&mut self) {
            self.calls.push("cancel".to_string());
            self.active = false;
        }

        fn is_active(&mut self) -> bool {
            self.active
        }
    }

    #[test]
    fn speak_cancels_before_every_start() {
        let mut speaker = Speaker::new(RecordingEngine::default());
        assert_eq!(speaker.speak("first"), PlaybackEvent::Started);
        assert_eq!(speaker.speak("second"), PlaybackEvent::Started);
        assert_eq!(
            speaker.engine().calls,
            vec!["cancel", "start:first", "cancel", "start:second"]
        );
        assert!(speaker.is_speaking());
    }

    #[test]
    fn poll_reports_end_once() {
        let mut speaker = Speaker::new(RecordingEngine::default());
        speaker.speak("hello");
        assert_eq!(speaker.poll(), None);
        speaker.engine.active = false;
        assert_eq!(speaker.poll(), Some(PlaybackEvent::Ended));
        assert_eq!(speaker.poll(), None);
        assert!(!speaker.is_speaking());
    }

    #[test]
    fn start_failure_leaves_speaker_idle() {
        let mut speaker = Speaker::new(RecordingEngine {
            fail: true,
            ..RecordingEngine::default()
        });
        assert!(matches!(speaker.speak("hi"), PlaybackEvent::Error(_)));
        assert!(!speaker.is_speaking());
    }

    #[test]
    fn blank_text_only_cancels() {
        let mut speaker = Speaker::new(RecordingEngine::default());
        assert_eq!(speaker.speak("**  **"), PlaybackEvent::Ended);
        assert_eq!(speaker.engine().calls, vec!["cancel"]);
    }

    #[test]
    fn markdown_is_stripped_for_speech() {
        assert_eq!(
            strip_markdown("## Verdict\n**Strong** _idea_, see [the docs](https://x.y/z) and `cargo`."),
            "Verdict\nStrong idea, see the docs and cargo."
        );
        assert_eq!(strip_markdown("[not a link"), "[not a link");
    }

    #[test]
    fn list_markers_are_stripped_for_speech() {
        assert_eq!(
            strip_markdown("- First point\n  * nested\n+ third\n12. numbered\n3) closing"),
            "First point\nnested\nthird\nnumbered\nclosing"
        );
        assert_eq!(strip_markdown("-5 degrees, 3.5 stars"), "-5 degrees, 3.5 stars");
    }

    fn wait_for_end<E: SpeechEngine>(speaker: &mut Speaker<E>) -> PlaybackEvent {
        for _ in 0..200 {
            if let Some(event) = speaker.poll() {
                return event;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        panic!("utterance never ended");
    }

    #[cfg(unix)]
    #[test]
    fn list_reply_reaches_piped_command_as_text() {
        let engine = CommandSpeech::from_candidates(vec![SpeechCommand::piped(&[
            "sh",
            "-c",
            "IFS= read -r line; test \"$line\" = 'First point'",
        ])]);
        let mut speaker = Speaker::new(engine);
        assert_eq!(
            speaker.speak("- First point\n- Second point"),
            PlaybackEvent::Started
        );
        assert_eq!(wait_for_end(&mut speaker), PlaybackEvent::Ended);
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_reports_error_after_start() {
        let mut speaker = Speaker::new(CommandSpeech::new(Some("sh -c 'exit 3'")).expect("engine"));
        assert_eq!(speaker.speak("hello"), PlaybackEvent::Started);
        match wait_for_end(&mut speaker) {
            PlaybackEvent::Error(err) => assert!(err.contains("exited")),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(!speaker.is_speaking());
    }

    #[cfg(unix)]
    #[test]
    fn command_speech_runs_and_cancels_child() {
        let mut engine = CommandSpeech::new(Some("sleep")).expect("engine");
        engine.start("5").expect("spawn sleep");
        assert!(engine.is_active());
        engine.cancel();
        assert!(!engine.is_active());
    }

    #[test]
    fn empty_speech_command_is_rejected() {
        assert!(CommandSpeech::new(Some("  ")).is_err());
    }
}
