//! TOML config file loading and validation for the simulation, the
//! controller, the initial plant state, and the optional MQTT relay.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use time::UtcOffset;

use crate::controller::ControllerConfig;
use crate::model::{IndoorAir, ModelKind};
use crate::mqtt::RelayPolicy;
use crate::scenario::{Scenario, ScenarioUpdate};
use crate::store::DEFAULT_CAPACITY;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub scenario: ScenarioUpdate,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub plant: PlantConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub tick_ms: u64,
    pub capacity: usize,
    pub model: ModelKind,
    pub seed: Option<u64>,
    pub noise: bool,
    pub utc_offset_hours: i8,
    pub stop_timeout_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            capacity: DEFAULT_CAPACITY,
            model: ModelKind::SchoolDay,
            seed: None,
            noise: true,
            utc_offset_hours: 5,
            stop_timeout_ms: 250,
        }
    }
}

impl SimulationConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Local zone of the school. Out-of-range values fall back to UTC; they
    /// are rejected by [`Config::validate`] before reaching here.
    pub fn utc_offset(&self) -> UtcOffset {
        UtcOffset::from_hms(self.utc_offset_hours, 0, 0).unwrap_or(UtcOffset::UTC)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlantConfig {
    pub co2: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub pm25: f64,
    /// Background outdoor PM2.5, µg/m³.
    pub outdoor_pm25: f64,
}

impl Default for PlantConfig {
    fn default() -> Self {
        let air = IndoorAir::default();
        Self {
            co2: air.co2,
            temperature: air.temperature,
            humidity: air.humidity,
            pm25: air.pm25,
            outdoor_pm25: 12.0,
        }
    }
}

impl PlantConfig {
    pub fn indoor(&self) -> IndoorAir {
        IndoorAir {
            co2: self.co2,
            temperature: self.temperature,
            humidity: self.humidity,
            pm25: self.pm25,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub enabled: bool,
    pub client_id: String,
    pub telemetry_topic: String,
    pub command_topic: String,
    pub policy: RelayPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            client_id: "smart-vent-hub".to_string(),
            telemetry_topic: "school/classA/window1/telemetry".to_string(),
            command_topic: "school/classA/window1/cmd".to_string(),
            policy: RelayPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all sections. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_simulation(&mut errors);
        self.validate_scenario(&mut errors);
        self.controller.validate(&mut errors);
        self.validate_plant(&mut errors);
        self.validate_relay(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_simulation(&self, errors: &mut Vec<String>) {
        let s = &self.simulation;
        if s.tick_ms == 0 {
            errors.push("simulation.tick_ms must be positive".to_string());
        }
        if s.capacity == 0 {
            errors.push("simulation.capacity must be at least 1".to_string());
        }
        if !(-12..=14).contains(&s.utc_offset_hours) {
            errors.push(format!(
                "simulation.utc_offset_hours {} out of range [-12, 14]",
                s.utc_offset_hours
            ));
        }
    }

    fn validate_scenario(&self, errors: &mut Vec<String>) {
        for e in self.scenario.validate().rejected() {
            errors.push(format!("scenario.{}: {e}", e.field()));
        }
    }

    fn validate_plant(&self, errors: &mut Vec<String>) {
        let p = &self.plant;
        if !p.co2.is_finite() || p.co2 < 0.0 {
            errors.push(format!("plant.co2 must be non-negative, got {}", p.co2));
        }
        if !p.temperature.is_finite() {
            errors.push("plant.temperature must be finite".to_string());
        }
        if !(0.0..=100.0).contains(&p.humidity) {
            errors.push(format!(
                "plant.humidity {} out of range [0, 100]",
                p.humidity
            ));
        }
        if !p.pm25.is_finite() || p.pm25 < 0.0 {
            errors.push(format!("plant.pm25 must be non-negative, got {}", p.pm25));
        }
        if !p.outdoor_pm25.is_finite() || p.outdoor_pm25 < 0.0 {
            errors.push(format!(
                "plant.outdoor_pm25 must be non-negative, got {}",
                p.outdoor_pm25
            ));
        }
    }

    fn validate_relay(&self, errors: &mut Vec<String>) {
        let r = &self.relay;
        if !r.enabled {
            return;
        }
        if r.client_id.trim().is_empty() {
            errors.push("relay.client_id is empty".to_string());
        }
        for (name, topic) in [
            ("telemetry_topic", &r.telemetry_topic),
            ("command_topic", &r.command_topic),
        ] {
            if topic.trim().is_empty() {
                errors.push(format!("relay.{name} is empty"));
            } else if topic.contains(['+', '#']) {
                errors.push(format!("relay.{name} '{topic}' must not contain wildcards"));
            }
        }
        if r.telemetry_topic == r.command_topic {
            errors.push("relay.telemetry_topic and relay.command_topic are the same".to_string());
        }
        r.policy.validate(errors);
    }

    /// The scenario the engine starts with.
    pub fn initial_scenario(&self) -> Scenario {
        let mut scenario = Scenario::default();
        self.scenario.validate().apply_to(&mut scenario);
        scenario
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    parse(&contents).with_context(|| format!("invalid config: {path}"))
}

/// Like [`load`], but a missing file yields the built-in defaults.
pub fn load_or_default(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        load(path)
    } else {
        tracing::warn!(path, "config file not found, using defaults");
        Ok(Config::default())
    }
}

fn parse(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("failed to parse config")?;
    config.validate()?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
