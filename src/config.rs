use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::storage;

const DEFAULT_ENV_PREFIX: &str = "BOARDVIEW";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub board: BoardConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub ui: UIConfig,
    #[serde(default)]
    pub player: PlayerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_user_agent() -> String {
    format!("boardview/{}", crate::VERSION)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sync_interval", with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_sync_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sync_interval() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    #[serde(default)]
    pub audio_loop: bool,
    #[serde(default)]
    pub video_loop: bool,
    #[serde(default = "default_true")]
    pub audio_autoclose: bool,
    #[serde(default = "default_true")]
    pub video_autoclose: bool,
    #[serde(default = "default_volume")]
    pub audio_volume: f64,
    #[serde(default = "default_volume")]
    pub video_volume: f64,
    #[serde(default = "default_volume")]
    pub swf_volume: f64,
    #[serde(default = "default_mod_stereo")]
    pub mod_stereo: f64,
    #[serde(default = "default_tracker_poll", with = "humantime_serde")]
    pub tracker_poll: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio_loop: false,
            video_loop: false,
            audio_autoclose: true,
            video_autoclose: true,
            audio_volume: default_volume(),
            video_volume: default_volume(),
            swf_volume: default_volume(),
            mod_stereo: default_mod_stereo(),
            tracker_poll: default_tracker_poll(),
        }
    }
}

fn default_volume() -> f64 {
    0.2
}

fn default_mod_stereo() -> f64 {
    1.0
}

fn default_tracker_poll() -> Duration {
    Duration::from_secs(1)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_true")]
    pub menubar_detach: bool,
    #[serde(default = "default_true")]
    pub thread_quickreply: bool,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            menubar_detach: true,
            thread_quickreply: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerConfig {
    #[serde(default = "default_tracker_command")]
    pub tracker_command: Vec<String>,
    #[serde(default = "default_plugin_command")]
    pub plugin_command: Vec<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            tracker_command: default_tracker_command(),
            plugin_command: default_plugin_command(),
        }
    }
}

fn default_tracker_command() -> Vec<String> {
    vec!["openmpt123".into(), "%URL%".into()]
}

fn default_plugin_command() -> Vec<String> {
    vec!["ruffle".into(), "%URL%".into()]
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.board.base_url.is_empty() {
        base.board.base_url = other.board.base_url;
    }
    if !other.board.user_agent.is_empty() {
        base.board.user_agent = other.board.user_agent;
    }
    if !other.board.request_timeout.is_zero() {
        base.board.request_timeout = other.board.request_timeout;
    }

    base.sync.enabled = other.sync.enabled;
    if !other.sync.interval.is_zero() {
        base.sync.interval = other.sync.interval;
    }

    base.media = MediaConfig {
        tracker_poll: if other.media.tracker_poll.is_zero() {
            base.media.tracker_poll
        } else {
            other.media.tracker_poll
        },
        ..other.media
    };

    base.ui = other.ui;

    if !other.player.tracker_command.is_empty() {
        base.player.tracker_command = other.player.tracker_command;
    }
    if !other.player.plugin_command.is_empty() {
        base.player.plugin_command = other.player.plugin_command;
    }

    base
}

// Only variables that are actually set override the layered value.
fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes" | "on")
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "board.base_url" => cfg.board.base_url = value,
        "board.user_agent" => cfg.board.user_agent = value,
        "board.request_timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.board.request_timeout = duration;
            }
        }
        "sync.enabled" => cfg.sync.enabled = parse_bool(&value),
        "sync.interval" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.sync.interval = duration;
            }
        }
        "media.audio_loop" => cfg.media.audio_loop = parse_bool(&value),
        "media.video_loop" => cfg.media.video_loop = parse_bool(&value),
        "media.audio_autoclose" => cfg.media.audio_autoclose = parse_bool(&value),
        "media.video_autoclose" => cfg.media.video_autoclose = parse_bool(&value),
        "media.audio_volume" => {
            if let Ok(parsed) = value.parse::<f64>() {
                cfg.media.audio_volume = parsed;
            }
        }
        "media.video_volume" => {
            if let Ok(parsed) = value.parse::<f64>() {
                cfg.media.video_volume = parsed;
            }
        }
        "media.swf_volume" => {
            if let Ok(parsed) = value.parse::<f64>() {
                cfg.media.swf_volume = parsed;
            }
        }
        "media.mod_stereo" => {
            if let Ok(parsed) = value.parse::<f64>() {
                cfg.media.mod_stereo = parsed;
            }
        }
        "media.tracker_poll" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.media.tracker_poll = duration;
            }
        }
        "ui.menubar_detach" => cfg.ui.menubar_detach = parse_bool(&value),
        "ui.thread_quickreply" => cfg.ui.thread_quickreply = parse_bool(&value),
        "player.tracker_command" => cfg.player.tracker_command = split_list(&value),
        "player.plugin_command" => cfg.player.plugin_command = split_list(&value),
        _ => {}
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("boardview").join("config.yaml"))
}

/// Runtime view of the user-tunable behaviour, shared by every controller.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub menubar_detach: bool,
    pub thread_quickreply: bool,
    pub thread_auto_update: bool,
    pub sync_interval: Duration,
    pub audio_loop: bool,
    pub video_loop: bool,
    pub audio_autoclose: bool,
    pub video_autoclose: bool,
    pub audio_volume: f64,
    pub video_volume: f64,
    pub swf_volume: f64,
    pub mod_stereo: f64,
    pub tracker_poll: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl Settings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            menubar_detach: cfg.ui.menubar_detach,
            thread_quickreply: cfg.ui.thread_quickreply,
            thread_auto_update: cfg.sync.enabled,
            sync_interval: cfg.sync.interval,
            audio_loop: cfg.media.audio_loop,
            video_loop: cfg.media.video_loop,
            audio_autoclose: cfg.media.audio_autoclose,
            video_autoclose: cfg.media.video_autoclose,
            audio_volume: clamp_unit(cfg.media.audio_volume),
            video_volume: clamp_unit(cfg.media.video_volume),
            swf_volume: clamp_unit(cfg.media.swf_volume),
            mod_stereo: clamp_unit(cfg.media.mod_stereo),
            tracker_poll: cfg.media.tracker_poll,
        }
    }

    /// Overlays values the user saved in the settings store.
    pub fn apply_overrides(&mut self, store: &storage::Store) -> Result<()> {
        self.menubar_detach = store.get_bool("menubar_detach", self.menubar_detach)?;
        self.thread_quickreply = store.get_bool("thread_quickreply", self.thread_quickreply)?;
        self.thread_auto_update = store.get_bool("thread_auto_update", self.thread_auto_update)?;
        self.audio_loop = store.get_bool("audio_loop", self.audio_loop)?;
        self.video_loop = store.get_bool("video_loop", self.video_loop)?;
        self.audio_autoclose = store.get_bool("audio_autoclose", self.audio_autoclose)?;
        self.video_autoclose = store.get_bool("video_autoclose", self.video_autoclose)?;
        self.audio_volume = clamp_unit(store.get_f64("audio_volume", self.audio_volume)?);
        self.video_volume = clamp_unit(store.get_f64("video_volume", self.video_volume)?);
        self.swf_volume = clamp_unit(store.get_f64("swf_volume", self.swf_volume)?);
        self.mod_stereo = clamp_unit(store.get_f64("mod_stereo", self.mod_stereo)?);
        Ok(())
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}
