use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agent_engine::state::TOOL_NAMES;
use crate::errors::{HeatloopError, HeatloopResult};
use crate::perception::types::RenderSize;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub render: RenderSize,
    #[serde(default)]
    pub heat: HeatConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Heat/marker compositing constants. The defaults are empirical; only the
/// qualitative behaviour (wide additive blobs, capsules along drags, crisp
/// markers on top) matters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatConfig {
    /// Blob radius as a fraction of `min(width, height)`.
    pub radius_ratio: f32,
    /// Opacity at the blob centre, fading linearly to 0 at the radius.
    pub opacity: f32,
    /// Spacing of intermediate drag blobs, as a fraction of the radius.
    pub drag_step_ratio: f32,
    /// Radius of intermediate drag blobs, as a fraction of the radius.
    pub drag_radius_ratio: f32,
    pub color: [u8; 3],
    pub marker_color: [u8; 3],
}

impl Default for HeatConfig {
    fn default() -> Self {
        Self {
            radius_ratio: 0.22,
            opacity: 0.88,
            drag_step_ratio: 0.4,
            drag_radius_ratio: 0.75,
            color: [255, 120, 0],
            marker_color: [255, 255, 255],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositorMode {
    /// Worker task inside this process.
    Local,
    /// External worker connecting over the compositor socket.
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub render_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub listen: SocketAddr,
    pub compositor: CompositorMode,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            render_timeout_ms: 10_000,
            poll_interval_ms: 25,
            listen: SocketAddr::from(([127, 0, 0, 1], 1236)),
            compositor: CompositorMode::Local,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub api_base: String,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    /// Falls back to env var HEATLOOP_API_KEY.
    pub api_key: Option<String>,
    pub max_attempts: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:1235/v1/chat/completions".into(),
            model: "local-vlm".into(),
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 1000,
            api_key: None,
            max_attempts: 5,
        }
    }
}

impl ModelConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("HEATLOOP_API_KEY").ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Parent directory for per-session run directories.
    pub run_dir: PathBuf,
    pub loop_delay_ms: u64,
    /// When false, actions are recorded but no input events are sent.
    pub physical_execution: bool,
    pub allowed_tools: Vec<String>,
    pub start_paused: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            run_dir: default_run_dir(),
            loop_delay_ms: 1500,
            physical_execution: false,
            allowed_tools: TOOL_NAMES.iter().map(|s| s.to_string()).collect(),
            start_paused: true,
        }
    }
}

impl SessionConfig {
    pub fn loop_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.loop_delay_ms)
    }
}

/// `~/.local/share/heatloop/runs` (or the platform data dir), falling back to `./runs`.
fn default_run_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("heatloop").join("runs"))
        .unwrap_or_else(|| PathBuf::from("runs"))
}

impl AppConfig {
    pub fn validate(&self) -> HeatloopResult<()> {
        if self.render.width == 0 || self.render.height == 0 {
            return Err(HeatloopError::Config(format!(
                "render size {}x{} has no area",
                self.render.width, self.render.height
            )));
        }
        if self.broker.render_timeout_ms == 0 {
            return Err(HeatloopError::Config("broker.render_timeout_ms must be > 0".into()));
        }
        if !(self.heat.radius_ratio > 0.0) || !(self.heat.drag_step_ratio > 0.0) {
            return Err(HeatloopError::Config(
                "heat.radius_ratio and heat.drag_step_ratio must be > 0".into(),
            ));
        }
        if let Some(unknown) = self
            .session
            .allowed_tools
            .iter()
            .find(|t| !TOOL_NAMES.contains(&t.as_str()))
        {
            return Err(HeatloopError::Config(format!("unknown tool in allowed_tools: {unknown}")));
        }
        Ok(())
    }
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Some(candidate);
            }
        }
    }

    let candidate = std::env::current_dir().ok()?.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Some(candidate);
    }
    None
}

/// Load `config.toml` from `explicit`, next to the executable, or the working
/// directory. Without any file the defaults are used.
pub fn load_config(explicit: Option<&Path>) -> HeatloopResult<AppConfig> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => resolve_config_path(),
    };
    let Some(path) = path else {
        tracing::info!("no config.toml found; using defaults");
        return Ok(AppConfig::default());
    };
    let config = load_config_from(&path)?;
    tracing::info!(path = %path.display(), model = %config.model.model, "config loaded");
    Ok(config)
}

pub fn load_config_from(path: &Path) -> HeatloopResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(config: &AppConfig, path: &Path) -> HeatloopResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}
