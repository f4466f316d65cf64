//! Third-party players the expansion controller drives: the tracker-module player
//! and the plugin (flash) runtime. The page only needs the calls below; the
//! process-backed implementations hand playback to external programs.

use std::collections::HashMap;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::fileinfo;
use crate::overlay::Size;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackerMetadata {
    pub title: String,
    pub tracker: String,
    pub type_long: String,
}

impl TrackerMetadata {
    pub fn marquee(&self) -> String {
        format!(
            "TITLE: {}, TRACKER: {}, TYPE: {}",
            self.title, self.tracker, self.type_long
        )
    }
}

pub trait TrackerPlayer {
    fn load(&mut self, url: &str) -> Result<()>;
    fn play(&mut self) -> Result<()>;
    fn stop(&mut self);
    fn metadata(&self) -> TrackerMetadata;
    /// Track length in seconds.
    fn duration(&self) -> f64;
    /// Playback position in seconds, `None` while nothing plays.
    fn current_time(&self) -> Option<f64>;
}

/// Builds the shared tracker player on first use.
pub trait TrackerFactory {
    /// `stereo_separation` is a percentage, 0 to 100.
    fn create(&mut self, stereo_separation: f64) -> Result<Box<dyn TrackerPlayer>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginHandle(pub u64);

pub trait PluginRuntime {
    fn create_player(&mut self, url: &str, max_size: Size) -> Result<PluginHandle>;
    fn set_volume(&mut self, handle: PluginHandle, volume: f64) -> Result<()>;
    fn destroy(&mut self, handle: PluginHandle);
}

fn expand_args(template: &[String], vars: &[(&str, String)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter()
                .fold(arg.clone(), |acc, (key, value)| acc.replace(key, value))
        })
        .collect()
}

fn spawn(template: &[String], vars: &[(&str, String)]) -> Result<Child> {
    let args = expand_args(template, vars);
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("player command is empty"))?;
    let mut command = Command::new(program);
    command.args(rest);
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());
    command.stderr(Stdio::null());
    command
        .spawn()
        .with_context(|| format!("launch {program} for {}", args.join(" ")))
}

fn resolve_url(base: &Url, target: &str) -> Result<String> {
    Ok(base
        .join(target)
        .with_context(|| format!("resolve media url {target:?}"))?
        .to_string())
}

fn tracker_type_long(ext: &str) -> &'static str {
    match ext {
        "mod" => "ProTracker",
        "xm" => "FastTracker 2",
        "it" => "Impulse Tracker",
        "s3m" => "Scream Tracker 3",
        "med" => "OctaMED",
        _ => "unknown",
    }
}

pub struct ProcessTrackerFactory {
    pub command: Vec<String>,
    pub base_url: Url,
}

impl TrackerFactory for ProcessTrackerFactory {
    fn create(&mut self, stereo_separation: f64) -> Result<Box<dyn TrackerPlayer>> {
        if self.command.is_empty() {
            return Err(anyhow!("tracker player command not configured"));
        }
        Ok(Box::new(ProcessTracker {
            command: self.command.clone(),
            base_url: self.base_url.clone(),
            stereo_separation,
            url: None,
            child: None,
            started: None,
        }))
    }
}

/// Plays tracker modules through an external command line player.
pub struct ProcessTracker {
    command: Vec<String>,
    base_url: Url,
    stereo_separation: f64,
    url: Option<String>,
    child: Option<Child>,
    started: Option<Instant>,
}

impl TrackerPlayer for ProcessTracker {
    fn load(&mut self, url: &str) -> Result<()> {
        self.stop();
        self.url = Some(resolve_url(&self.base_url, url)?);
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        let url = self
            .url
            .clone()
            .ok_or_else(|| anyhow!("tracker: nothing loaded"))?;
        let child = spawn(
            &self.command,
            &[
                ("%URL%", url),
                ("%STEREO%", format!("{}", self.stereo_separation.round())),
            ],
        )?;
        self.child = Some(child);
        self.started = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.started = None;
    }

    fn metadata(&self) -> TrackerMetadata {
        let url = self.url.as_deref().unwrap_or_default();
        let ext = fileinfo::extension(url).unwrap_or_default();
        let title = url
            .split(['?', '#'])
            .next()
            .and_then(|path| Path::new(path).file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        TrackerMetadata {
            title,
            tracker: "external".to_string(),
            type_long: tracker_type_long(&ext).to_string(),
        }
    }

    fn duration(&self) -> f64 {
        0.0
    }

    fn current_time(&self) -> Option<f64> {
        self.started.map(|started| started.elapsed().as_secs_f64())
    }
}

impl Drop for ProcessTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs flash content in an external runtime, one process per player.
pub struct ProcessPlugins {
    command: Vec<String>,
    base_url: Url,
    next_id: u64,
    players: HashMap<PluginHandle, Child>,
}

impl ProcessPlugins {
    pub fn new(command: Vec<String>, base_url: Url) -> Self {
        Self {
            command,
            base_url,
            next_id: 1,
            players: HashMap::new(),
        }
    }
}

impl PluginRuntime for ProcessPlugins {
    fn create_player(&mut self, url: &str, max_size: Size) -> Result<PluginHandle> {
        let url = resolve_url(&self.base_url, url)?;
        let child = spawn(
            &self.command,
            &[
                ("%URL%", url),
                ("%WIDTH%", format!("{}", max_size.width.round())),
                ("%HEIGHT%", format!("{}", max_size.height.round())),
            ],
        )?;
        let handle = PluginHandle(self.next_id);
        self.next_id += 1;
        self.players.insert(handle, child);
        Ok(handle)
    }

    fn set_volume(&mut self, handle: PluginHandle, volume: f64) -> Result<()> {
        if !self.players.contains_key(&handle) {
            return Err(anyhow!("plugin player {} not running", handle.0));
        }
        tracing::debug!(
            player = handle.0,
            volume,
            "external plugin runtime keeps its own volume"
        );
        Ok(())
    }

    fn destroy(&mut self, handle: PluginHandle) {
        if let Some(mut child) = self.players.remove(&handle) {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for ProcessPlugins {
    fn drop(&mut self) {
        let handles: Vec<PluginHandle> = self.players.keys().copied().collect();
        for handle in handles {
            self.destroy(handle);
        }
    }
}
