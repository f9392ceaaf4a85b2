//! Stateful window ventilation unit simulator for local development.
//!
//! Models a classroom sensor head mounted on a motorised window unit:
//! - CO₂ climbing every sample from breathing occupants
//! - Clearance proportional to the last commanded fan / valve positions
//! - Indoor temperature and humidity as mean-reverting random walks
//! - Outdoor PM2.5 hovering around a background level, with smog episodes
//!
//! Readings are rounded to 0.1 the way the physical unit reports them.

use serde::Serialize;
use std::fmt;

const CO2_OUTDOOR: f64 = 420.0;
const CO2_MAX: f64 = 5000.0;
const PM_BACKGROUND: f64 = 15.0;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal(rng: &mut fastrand::Rng) -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += rng.f64();
    }
    sum - 6.0
}

fn uniform(rng: &mut fastrand::Rng, lo: f64, hi: f64) -> f64 {
    lo + (hi - lo) * rng.f64()
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `NODE_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Regular lesson: steady CO₂ climb, clean outdoor air.
    Normal,
    /// Overfull room: CO₂ climbs almost twice as fast.
    Crowded,
    /// Frequent outdoor PM2.5 spikes well above the controller's limit.
    Smog,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "crowded" => Self::Crowded,
            "smog" => Self::Smog,
            _ => Self::Normal, // default
        }
    }

    fn crowd_factor(self) -> f64 {
        match self {
            Self::Crowded => 1.8,
            Self::Normal | Self::Smog => 1.0,
        }
    }

    /// Per-sample probability of a smog spike and its size range.
    fn smog(self) -> (f64, (f64, f64)) {
        match self {
            Self::Smog => (0.15, (35.0, 70.0)),
            Self::Normal | Self::Crowded => (0.01, (5.0, 15.0)),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Crowded => write!(f, "crowded"),
            Self::Smog => write!(f, "smog"),
        }
    }
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

/// One telemetry message, in the wire shape the hub relay expects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Telemetry {
    pub co2: f64,
    pub t: f64,
    pub rh: f64,
    pub pm25_out: f64,
}

// ---------------------------------------------------------------------------
// Main simulator
// ---------------------------------------------------------------------------

pub struct WindowSim {
    scenario: Scenario,
    rng: fastrand::Rng,

    co2: f64,
    temperature: f64,
    humidity: f64,
    pm25_out: f64,

    // Last commanded actuator positions, percent.
    fan: f64,
    valve: f64,
}

impl WindowSim {
    pub fn new(scenario: Scenario) -> Self {
        Self::with_rng(scenario, fastrand::Rng::new())
    }

    pub fn with_rng(scenario: Scenario, rng: fastrand::Rng) -> Self {
        Self {
            scenario,
            rng,
            co2: 650.0,
            temperature: 21.5,
            humidity: 44.0,
            pm25_out: PM_BACKGROUND,
            fan: 0.0,
            valve: 0.0,
        }
    }

    /// Apply a command from the controller. Values are clamped to 0..=100.
    pub fn set_actuators(&mut self, fan: f64, valve: f64) {
        self.fan = fan.clamp(0.0, 100.0);
        self.valve = valve.clamp(0.0, 100.0);
    }

    /// Close the window unit completely.
    pub fn close(&mut self) {
        self.fan = 0.0;
        self.valve = 0.0;
    }

    pub fn actuators(&self) -> (f64, f64) {
        (self.fan, self.valve)
    }

    /// Advance one sampling period and produce the reading.
    pub fn sample(&mut self) -> Telemetry {
        // -- CO2 ------------------------------------------------------------
        let rise = uniform(&mut self.rng, 5.0, 12.0) * self.scenario.crowd_factor();
        let clear_frac = 0.08 * self.fan / 100.0 + 0.04 * self.valve / 100.0;
        let clearance = (self.co2 - CO2_OUTDOOR) * clear_frac;
        self.co2 = (self.co2 + rise - clearance).clamp(CO2_OUTDOOR, CO2_MAX);

        // -- Temperature / humidity -----------------------------------------
        let cooling = 0.01 * self.fan / 100.0;
        self.temperature += 0.02 * (21.5 - self.temperature) - cooling
            + 0.05 * approx_std_normal(&mut self.rng);
        self.humidity = (self.humidity
            + 0.02 * (44.0 - self.humidity)
            + 0.1 * approx_std_normal(&mut self.rng))
        .clamp(20.0, 90.0);

        // -- Outdoor PM2.5 --------------------------------------------------
        let (spike_prob, (spike_lo, spike_hi)) = self.scenario.smog();
        let spike = if self.rng.f64() < spike_prob {
            uniform(&mut self.rng, spike_lo, spike_hi)
        } else {
            0.0
        };
        self.pm25_out = (self.pm25_out
            + 0.2 * (PM_BACKGROUND - self.pm25_out)
            + 0.5 * approx_std_normal(&mut self.rng)
            + spike)
            .clamp(0.0, 500.0);

        Telemetry {
            co2: round1(self.co2),
            t: round1(self.temperature),
            rh: round1(self.humidity),
            pm25_out: round1(self.pm25_out),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
