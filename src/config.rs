//! Configuration management for mapcal

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::export::OutputFormat;
use crate::header::HeaderFont;
use crate::playback::PlaybackOptions;
use crate::render::RenderOptions;

/// Route rendering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Renders larger than this (either side) downscale the source image
    pub max_dimension: u32,
    pub stroke_width: f64,
    pub outline_width: f64,
    /// Visual tuning factor for stroke and dot widths (see `RenderOptions`)
    pub resolution_scale: f64,
    /// Half width of the speed smoothing window, in samples
    pub speed_window: usize,
    pub tick_interval_ms: i64,
    pub major_tick_every: usize,
    pub route_opacity: f32,
    pub outline_opacity: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        let d = RenderOptions::default();
        Self {
            max_dimension: d.max_dimension,
            stroke_width: d.stroke_width,
            outline_width: d.outline_width,
            resolution_scale: d.resolution_scale,
            speed_window: d.speed_window,
            tick_interval_ms: d.tick_interval_ms,
            major_tick_every: d.major_tick_every,
            route_opacity: d.route_opacity,
            outline_opacity: d.outline_opacity,
        }
    }
}

/// Banner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderConfig {
    pub height: u32,
    /// TrueType font for banner text; without one only the legend bar is drawn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_path: Option<PathBuf>,
    pub branding: String,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            height: 70,
            font_path: None,
            branding: "mapdump.com".to_string(),
        }
    }
}

impl HeaderConfig {
    /// Load the configured font, if any
    pub fn load_font(&self) -> Result<Option<HeaderFont>> {
        match &self.font_path {
            Some(path) => {
                let font = HeaderFont::from_file(path)
                    .with_context(|| format!("Failed to load header font {:?}", path))?;
                tracing::info!("Loaded header font from {:?}", path);
                Ok(Some(font))
            }
            None => Ok(None),
        }
    }
}

/// Replay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub tail_length_secs: u32,
    pub marker_gap_secs: u32,
    pub fps: u32,
    /// Track seconds played per real second
    pub speed: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tail_length_secs: 60,
            marker_gap_secs: 30,
            fps: 15,
            speed: 8.0,
        }
    }
}

impl PlaybackConfig {
    pub fn options(&self) -> PlaybackOptions {
        PlaybackOptions {
            tail_length_ms: self.tail_length_secs as i64 * 1000,
            marker_gap_ms: self.marker_gap_secs as i64 * 1000,
            fps: self.fps,
            speed: self.speed,
        }
    }
}

/// Encoded output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub jpeg_quality: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Jpeg,
            jpeg_quality: 80,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body, in megabytes; map images arrive base64 encoded
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

fn default_max_upload_mb() -> usize {
    64
}

impl ServerConfig {
    pub fn max_body_bytes(&self) -> usize {
        self.max_upload_mb.max(1).saturating_mul(1024 * 1024)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8091,
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub header: HeaderConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Render options for one request
    pub fn render_options(&self, include_header: bool, include_route: bool) -> RenderOptions {
        RenderOptions {
            include_header,
            include_route,
            max_dimension: self.render.max_dimension,
            stroke_width: self.render.stroke_width,
            outline_width: self.render.outline_width,
            resolution_scale: self.render.resolution_scale,
            speed_window: self.render.speed_window,
            tick_interval_ms: self.render.tick_interval_ms,
            major_tick_every: self.render.major_tick_every,
            route_opacity: self.render.route_opacity,
            outline_opacity: self.render.outline_opacity,
            header_height: self.header.height,
            branding: self.header.branding.clone(),
        }
    }
}
