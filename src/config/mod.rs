use crate::detect::DetectionThresholds;
use crate::schedule::{IntervalOverrides, IntervalTable, Priority, PriorityFactors, ScheduleConfig};
use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Complete fleetpulse configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub priority: PriorityFactors,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub detection: DetectionThresholds,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub api: ApiSettings,
    /// Entities registered at startup
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

/// Default base intervals and state classification
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,
    #[serde(default = "default_active_secs")]
    pub active_secs: u64,
    #[serde(default = "default_moving_secs")]
    pub moving_secs: u64,
    #[serde(default = "default_critical_secs")]
    pub critical_secs: u64,
    /// Levels below this classify an entity as critical
    #[serde(default = "default_critical_level")]
    pub critical_level: f64,
    /// Upper bound on a single fetch; unset means the entity's shortest interval
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
}

fn default_idle_secs() -> u64 {
    300
}

fn default_active_secs() -> u64 {
    60
}

fn default_moving_secs() -> u64 {
    15
}

fn default_critical_secs() -> u64 {
    10
}

fn default_critical_level() -> f64 {
    20.0
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            idle_secs: default_idle_secs(),
            active_secs: default_active_secs(),
            moving_secs: default_moving_secs(),
            critical_secs: default_critical_secs(),
            critical_level: default_critical_level(),
            fetch_timeout_secs: None,
        }
    }
}

impl ScheduleSettings {
    pub fn intervals(&self) -> IntervalTable {
        IntervalTable {
            idle: Duration::from_secs(self.idle_secs),
            active: Duration::from_secs(self.active_secs),
            moving: Duration::from_secs(self.moving_secs),
            critical: Duration::from_secs(self.critical_secs),
        }
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// Consecutive failures before connectivity_lost is raised
    #[serde(default = "default_connectivity_lost_threshold")]
    pub connectivity_lost_threshold: u32,
}

fn default_connectivity_lost_threshold() -> u32 {
    3
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            connectivity_lost_threshold: default_connectivity_lost_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamSettings {
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_heartbeat_secs() -> u64 {
    30
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl StreamSettings {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

/// HTTP status provider settings
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_provider_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ProviderSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    3000
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Entity registered from the config file. Intervals are in seconds and
/// fall back to the `[schedule]` defaults state by state.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityConfig {
    pub id: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub idle_secs: Option<u64>,
    #[serde(default)]
    pub active_secs: Option<u64>,
    #[serde(default)]
    pub moving_secs: Option<u64>,
    #[serde(default)]
    pub critical_secs: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl EntityConfig {
    pub fn to_schedule(&self, defaults: &IntervalTable) -> ScheduleConfig {
        let mut intervals = defaults.clone();
        intervals.merge(&IntervalOverrides {
            idle: self.idle_secs.map(Duration::from_secs),
            active: self.active_secs.map(Duration::from_secs),
            moving: self.moving_secs.map(Duration::from_secs),
            critical: self.critical_secs.map(Duration::from_secs),
        });

        let mut config = ScheduleConfig::new(self.id.clone(), intervals).with_priority(self.priority);
        config.enabled = self.enabled;
        config.category = self.category.clone();
        config
    }
}

impl FleetConfig {
    /// Apply `FLEETPULSE_*` environment overrides. Unparseable values are ignored.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("FLEETPULSE_PORT") {
            if let Ok(port) = v.parse::<u16>() {
                self.api.port = port;
            }
        }
        if let Ok(v) = std::env::var("FLEETPULSE_PROVIDER_URL") {
            if !v.is_empty() {
                self.provider.base_url = v;
            }
        }
    }

    /// Load from `FLEETPULSE_CONFIG` if set, otherwise defaults; then apply
    /// env overrides.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = match std::env::var("FLEETPULSE_CONFIG") {
            Ok(path) => load_config(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Reject intervals below the scheduling floor and priority factors that
    /// cannot scale a delay.
    pub fn validate(&self) -> anyhow::Result<()> {
        let defaults = self.schedule.intervals();
        defaults
            .validate()
            .map_err(|reason| anyhow!("[schedule] {}", reason))?;
        if self.schedule.fetch_timeout_secs == Some(0) {
            bail!("[schedule] fetch_timeout_secs must be at least 1");
        }
        self.priority
            .validate()
            .map_err(|reason| anyhow!("[priority] {}", reason))?;

        for entity in &self.entities {
            entity.to_schedule(&defaults).validate()?;
        }
        Ok(())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<FleetConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: FleetConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(config)
}
