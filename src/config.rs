//! Configuration system for the strata display pipeline
//!
//! Loads configuration from TOML file at `~/.config/strata/config.toml`
//! Auto-generates default config file on first run if missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub panel: PanelConfig,
    pub pipeline: PipelineConfig,
    pub features: FeatureConfig,
    pub timeouts: TimeoutConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            panel: PanelConfig::default(),
            pipeline: PipelineConfig::default(),
            features: FeatureConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            // Auto-generate default config file
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&content)
            .context("Failed to parse config file")?;

        info!("Configuration loaded from {:?}", config_path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get the path to the config file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("strata");

        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file
    fn save_default(path: &PathBuf) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let default_config = Self::default();
        let toml_string = toml::to_string_pretty(&default_config)
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string)
            .context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }
}

/// Panel timing and resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Horizontal resolution in pixels
    pub xres: u32,
    /// Vertical resolution in pixels
    pub yres: u32,
    /// Refresh rate in frames per second
    pub fps: u32,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            xres: 720,
            yres: 1280,
            fps: 60,
        }
    }
}

/// Refresh scheme of the attached panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PsrMode {
    /// Panel self-refresh: frames pushed on demand, panel holds the image
    Command,
    /// Continuous scan-out at the panel refresh rate
    Video,
}

/// Who latches staged registers into the active set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrigMode {
    /// Hardware trigger from the panel's tearing-effect line
    Hw,
    /// Software trigger written by the driver
    Sw,
}

/// Pipeline shape and operating mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of overlay windows the scan-out engine exposes
    pub max_windows: usize,
    pub psr_mode: PsrMode,
    pub trig_mode: TrigMode,
    /// Diagnostic ring-log capacity (entries)
    pub event_log_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_windows: 5,
            psr_mode: PsrMode::Command,
            trig_mode: TrigMode::Hw,
            event_log_capacity: 512,
        }
    }
}

/// Optional pipeline behaviors, switchable per product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Partial-screen update (clipped scan-out region)
    pub window_update: bool,
    /// Skip fetching fully-covered regions of lower windows
    pub blocking_mode: bool,
    /// Extra vsync wait before commits with few windows
    pub vsync_skip: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window_update: true,
            blocking_mode: true,
            vsync_skip: true,
        }
    }
}

/// Bounded waits used by the commit worker, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Input-fence wait before programming a buffer
    pub fence_ms: u64,
    /// Vsync arrival after a commit is kicked
    pub vsync_ms: u64,
    /// Shadow-register latch confirmation
    pub shadow_update_ms: u64,
    /// Scan-out line counter reaching zero
    pub linecnt_ms: u64,
    /// Scan-out size settling to the programmed update region
    pub size_mismatch_ms: u64,
    /// Panel settle delay during fault recovery
    pub recovery_settle_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fence_ms: 900,
            vsync_ms: 200,
            shadow_update_ms: 300,
            linecnt_ms: 20,
            size_mismatch_ms: 50,
            recovery_settle_ms: 200,
        }
    }
}
