//! Persistent user preferences so settings survive across launches.
//!
//! Stored as TOML in `~/.config/essence/config.toml`. CLI flags always take
//! precedence over persisted values.

use anyhow::{Context, Result};
use essence::config::{AppConfig, Transport};
use essence::log_debug;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

const CONFIG_DIR_ENV: &str = "ESSENCE_CONFIG_DIR";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Persisted preferences. Every field is optional so a sparse file works.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct UserConfig {
    pub(crate) server_url: Option<String>,
    pub(crate) http_url: Option<String>,
    pub(crate) transport: Option<Transport>,
    pub(crate) reconnect_delay_ms: Option<u64>,
    pub(crate) commit_wait_ms: Option<u64>,
    pub(crate) input_device: Option<String>,
    pub(crate) speak_replies: Option<bool>,
    pub(crate) speech_command: Option<String>,
    pub(crate) screenshot_command: Option<String>,
    pub(crate) paste_command: Option<String>,
}

fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = env::var(CONFIG_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Some(PathBuf::from(dir));
        }
    }
    dirs::config_dir().map(|dir| dir.join("essence"))
}

pub(crate) fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

pub(crate) fn parse_user_config(content: &str) -> Result<UserConfig> {
    toml::from_str(content).context("parse user config")
}

/// Load persisted preferences. A missing or unreadable file yields defaults.
pub(crate) fn load_user_config() -> UserConfig {
    let Some(path) = config_path() else {
        return UserConfig::default();
    };
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return UserConfig::default();
        }
        Err(err) => {
            log_debug(&format!("failed to read {}: {err}", path.display()));
            return UserConfig::default();
        }
    };
    match parse_user_config(&content) {
        Ok(config) => config,
        Err(err) => {
            log_debug(&format!("ignoring {}: {err:#}", path.display()));
            eprintln!("Warning: ignoring invalid config file {}: {err:#}", path.display());
            UserConfig::default()
        }
    }
}

/// Write preferences, creating the config directory if needed.
pub(crate) fn save_user_config(config: &UserConfig) -> Result<PathBuf> {
    let path = config_path().context("no config directory available")?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create config dir {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(config).context("serialize user config")?;
    fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

/// Snapshot of the persistable part of a runtime config.
pub(crate) fn user_config_from_runtime(config: &AppConfig) -> UserConfig {
    UserConfig {
        server_url: Some(config.server_url.clone()),
        http_url: config.http_url.clone(),
        transport: Some(config.transport),
        reconnect_delay_ms: Some(config.reconnect_delay_ms),
        commit_wait_ms: Some(config.commit_wait_ms),
        input_device: config.input_device.clone(),
        speak_replies: Some(config.speak_replies),
        speech_command: config.speech_command.clone(),
        screenshot_command: config.screenshot_command.clone(),
        paste_command: config.paste_command.clone(),
    }
}

/// Which persistable settings were given on the command line or via env.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CliExplicitFlags {
    pub(crate) server_url: bool,
    pub(crate) http_url: bool,
    pub(crate) transport: bool,
    pub(crate) reconnect_delay_ms: bool,
    pub(crate) commit_wait_ms: bool,
    pub(crate) input_device: bool,
    pub(crate) speak_replies: bool,
    pub(crate) speech_command: bool,
    pub(crate) screenshot_command: bool,
    pub(crate) paste_command: bool,
}

fn cli_flag_present(args: &[String], long_name: &str) -> bool {
    let exact = format!("--{long_name}");
    let with_value = format!("{exact}=");
    args.iter()
        .any(|arg| arg == &exact || arg.starts_with(&with_value))
}

fn env_present(name: &str) -> bool {
    env::var_os(name).is_some_and(|value| !value.is_empty())
}

fn detect_explicit_flags_with_args(args: &[String]) -> CliExplicitFlags {
    CliExplicitFlags {
        server_url: cli_flag_present(args, "server-url") || env_present("ESSENCE_SERVER_URL"),
        http_url: cli_flag_present(args, "http-url") || env_present("ESSENCE_HTTP_URL"),
        transport: cli_flag_present(args, "transport"),
        reconnect_delay_ms: cli_flag_present(args, "reconnect-delay-ms"),
        commit_wait_ms: cli_flag_present(args, "commit-wait-ms"),
        input_device: cli_flag_present(args, "input-device"),
        speak_replies: cli_flag_present(args, "speak-replies"),
        speech_command: cli_flag_present(args, "speech-command"),
        screenshot_command: cli_flag_present(args, "screenshot-command"),
        paste_command: cli_flag_present(args, "paste-command"),
    }
}

/// Detect which CLI flags were explicitly provided.
pub(crate) fn detect_explicit_flags() -> CliExplicitFlags {
    let args: Vec<String> = env::args().skip(1).collect();
    detect_explicit_flags_with_args(&args)
}

fn apply_option<T: Clone>(explicit: bool, saved: &Option<T>, target: &mut T) {
    if explicit {
        return;
    }
    if let Some(value) = saved {
        *target = value.clone();
    }
}

fn apply_optional<T: Clone>(explicit: bool, saved: &Option<T>, target: &mut Option<T>) {
    if !explicit && saved.is_some() {
        target.clone_from(saved);
    }
}

/// Fill every setting the user did not pass explicitly from the saved file.
pub(crate) fn apply_user_config(
    user: &UserConfig,
    config: &mut AppConfig,
    explicit: &CliExplicitFlags,
) {
    apply_option(explicit.server_url, &user.server_url, &mut config.server_url);
    apply_optional(explicit.http_url, &user.http_url, &mut config.http_url);
    apply_option(explicit.transport, &user.transport, &mut config.transport);
    apply_option(
        explicit.reconnect_delay_ms,
        &user.reconnect_delay_ms,
        &mut config.reconnect_delay_ms,
    );
    apply_option(
        explicit.commit_wait_ms,
        &user.commit_wait_ms,
        &mut config.commit_wait_ms,
    );
    apply_optional(explicit.input_device, &user.input_device, &mut config.input_device);
    apply_option(explicit.speak_replies, &user.speak_replies, &mut config.speak_replies);
    apply_optional(
        explicit.speech_command,
        &user.speech_command,
        &mut config.speech_command,
    );
    apply_optional(
        explicit.screenshot_command,
        &user.screenshot_command,
        &mut config.screenshot_command,
    );
    apply_optional(
        explicit.paste_command,
        &user.paste_command,
        &mut config.paste_command,
    );
}
