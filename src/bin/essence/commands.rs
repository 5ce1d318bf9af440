//! Slash-command parsing for the line-oriented input.

use essence::session::UserAction;

pub(crate) const HELP_TEXT: &str = "\
Commands:
  <text>          send a message
  /draft <text>   set the draft without sending
  /send           commit the current draft and queued images
  /mic            start recording
  /stop           stop recording and send
  /cancel         stop recording and discard the turn
  /share          start a screen share
  /unshare        stop the screen share
  /shot           take a screenshot of the shared screen
  /paste          attach an image from the clipboard
  /reset          clear the conversation
  /speak          toggle spoken replies
  /quiet          stop the current utterance
  /help           show this help
  /quit           exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InputCommand {
    Actions(Vec<UserAction>),
    Help,
    Quit,
    Unknown(String),
    Empty,
}

pub(crate) fn parse_input_line(line: &str) -> InputCommand {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return InputCommand::Empty;
    }
    let Some(rest) = line.trim_start().strip_prefix('/') else {
        return InputCommand::Actions(vec![
            UserAction::Type(line.to_string()),
            UserAction::Send,
        ]);
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let action = match name.to_ascii_lowercase().as_str() {
        "draft" => UserAction::Type(arg.to_string()),
        "send" => UserAction::Send,
        "mic" | "record" => UserAction::StartMic,
        "stop" => UserAction::StopMic,
        "cancel" => UserAction::CancelMic,
        "share" => UserAction::StartShare,
        "unshare" => UserAction::StopShare,
        "shot" | "screenshot" => UserAction::Screenshot,
        "paste" => UserAction::Paste,
        "reset" => UserAction::Reset,
        "speak" => UserAction::ToggleSpeech,
        "quiet" => UserAction::StopSpeech,
        "help" | "?" => return InputCommand::Help,
        "quit" | "exit" => return InputCommand::Quit,
        other => return InputCommand::Unknown(format!("/{other}")),
    };
    InputCommand::Actions(vec![action])
}
