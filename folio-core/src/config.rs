use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Layout and navigation tunables for a [`crate::Viewer`].
///
/// Every field has a default, so a config file only needs to name the values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Estimated unscaled page height used until a page has been measured.
    pub page_height: f64,
    pub page_gap: f64,
    /// Leading and trailing padding of the scroll area.
    pub scroll_padding: f64,
    /// Pages materialized beyond the visible window on each side.
    pub overscan: usize,
    /// Page distance above which a smooth navigation snaps close to the target first.
    pub pre_scroll_threshold: usize,
    /// How many pages short of the target the snap phase lands.
    pub pre_scroll_lead: usize,
    pub pre_scroll_pause_ms: u64,
    pub min_scale: f64,
    pub max_scale: f64,
    pub scale_step: f64,
    pub nudge_factor: f64,
    pub render_cache_capacity: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            page_height: 1100.0,
            page_gap: 16.0,
            scroll_padding: 32.0,
            overscan: 2,
            pre_scroll_threshold: 5,
            pre_scroll_lead: 1,
            pre_scroll_pause_ms: 50,
            min_scale: 0.5,
            max_scale: 2.5,
            scale_step: 0.15,
            nudge_factor: 1.5,
            render_cache_capacity: 10,
        }
    }
}

impl ViewerConfig {
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Option<Self>, ConfigError> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            return Ok(None);
        }

        let content =
            std::fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
                config_path: config_path.to_path_buf(),
                source,
            })?;

        let config: ViewerConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                config_path: config_path.to_path_buf(),
                source,
            })?;

        Ok(Some(config.sanitized()))
    }

    /// Loads the config from the platform config directory, falling back to defaults when absent.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) => Ok(Self::load_from_path(path)?.unwrap_or_default()),
            None => Ok(Self::default()),
        }
    }

    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("net", "folio", "folio").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Replaces values that would break layout math with their defaults.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !(self.page_height.is_finite() && self.page_height > 0.0) {
            self.page_height = defaults.page_height;
        }
        if !(self.page_gap.is_finite() && self.page_gap >= 0.0) {
            self.page_gap = defaults.page_gap;
        }
        if !(self.scroll_padding.is_finite() && self.scroll_padding >= 0.0) {
            self.scroll_padding = defaults.scroll_padding;
        }
        if !(self.min_scale.is_finite() && self.min_scale > 0.0) {
            self.min_scale = defaults.min_scale;
        }
        if !(self.max_scale.is_finite() && self.max_scale >= self.min_scale) {
            self.max_scale = self.min_scale.max(defaults.max_scale);
        }
        if !(self.scale_step.is_finite() && self.scale_step > 0.0) {
            self.scale_step = defaults.scale_step;
        }
        if !(self.nudge_factor.is_finite() && self.nudge_factor > 0.0) {
            self.nudge_factor = defaults.nudge_factor;
        }
        self.render_cache_capacity = self.render_cache_capacity.max(1);
        self
    }

    pub fn pre_scroll_pause(&self) -> Duration {
        Duration::from_millis(self.pre_scroll_pause_ms)
    }

    /// Distance covered by one estimated page plus its gap at `scale`.
    pub fn page_stride(&self, scale: f64) -> f64 {
        self.page_height * scale + self.page_gap
    }

    pub fn clamp_scale(&self, scale: f64) -> f64 {
        if !scale.is_finite() {
            return 1.0_f64.clamp(self.min_scale, self.max_scale);
        }
        scale.clamp(self.min_scale, self.max_scale)
    }
}
