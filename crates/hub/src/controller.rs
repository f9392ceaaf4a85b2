//! Hysteresis ventilation controller.
//!
//! Holds the fan/valve positions across ticks and nudges them toward more or
//! less fresh air depending on where the indoor CO₂ sits relative to a
//! target band:
//!
//! ```text
//!            ramp up (fan +fan_step, valve +valve_step, cap 100)
//!  ───────── co2_target + upper_band ─────────
//!            hold
//!  ───────── co2_target - lower_band ─────────
//!            ramp down (floored at fan_idle / valve_idle)
//! ```
//!
//! An outdoor-air override caps both actuators whenever outdoor PM2.5 is
//! above `outdoor_pm25_limit`, in every mode, after the band decision.

use serde::{Deserialize, Serialize};

/// Operating mode written into every sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Auto,
    ManualStopped,
}

impl Mode {
    pub fn from_auto_flag(auto: bool) -> Self {
        if auto {
            Self::Auto
        } else {
            Self::ManualStopped
        }
    }
}

/// Actuator positions, both in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Actuation {
    pub fan: f64,
    pub valve: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub co2_target: f64,
    pub upper_band: f64,
    pub lower_band: f64,
    /// Fan change per tick while ramping, in percent.
    pub fan_step: f64,
    /// Valve change per tick while ramping, in percent.
    pub valve_step: f64,
    pub fan_idle: f64,
    pub valve_idle: f64,
    pub initial_fan: f64,
    pub initial_valve: f64,
    pub outdoor_pm25_limit: f64,
    pub outdoor_cap: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            co2_target: 800.0,
            upper_band: 80.0,
            lower_band: 120.0,
            fan_step: 0.2,
            valve_step: 0.25,
            fan_idle: 5.0,
            valve_idle: 5.0,
            initial_fan: 10.0,
            initial_valve: 5.0,
            outdoor_pm25_limit: 40.0,
            outdoor_cap: 40.0,
        }
    }
}

impl ControllerConfig {
    /// Push a message for every out-of-domain field onto `errors`.
    pub fn validate(&self, errors: &mut Vec<String>) {
        for (name, value) in [
            ("co2_target", self.co2_target),
            ("upper_band", self.upper_band),
            ("lower_band", self.lower_band),
            ("fan_step", self.fan_step),
            ("valve_step", self.valve_step),
        ] {
            if !(value.is_finite() && value > 0.0) {
                errors.push(format!("controller.{name} must be positive, got {value}"));
            }
        }
        for (name, value) in [
            ("fan_idle", self.fan_idle),
            ("valve_idle", self.valve_idle),
            ("initial_fan", self.initial_fan),
            ("initial_valve", self.initial_valve),
            ("outdoor_cap", self.outdoor_cap),
        ] {
            if !(0.0..=100.0).contains(&value) {
                errors.push(format!(
                    "controller.{name} {value} out of range [0, 100]"
                ));
            }
        }
        if self.outdoor_pm25_limit.is_nan() || self.outdoor_pm25_limit < 0.0 {
            errors.push(format!(
                "controller.outdoor_pm25_limit must be non-negative, got {}",
                self.outdoor_pm25_limit
            ));
        }
    }
}

#[derive(Debug, Clone)]
pub struct Controller {
    cfg: ControllerConfig,
    fan: f64,
    valve: f64,
}

impl Controller {
    pub fn new(cfg: ControllerConfig) -> Self {
        let fan = cfg.initial_fan.clamp(0.0, 100.0);
        let valve = cfg.initial_valve.clamp(0.0, 100.0);
        Self { cfg, fan, valve }
    }

    /// Return the actuators to their configured starting positions.
    pub fn reset(&mut self) {
        self.fan = self.cfg.initial_fan.clamp(0.0, 100.0);
        self.valve = self.cfg.initial_valve.clamp(0.0, 100.0);
    }

    pub fn actuation(&self) -> Actuation {
        Actuation {
            fan: self.fan,
            valve: self.valve,
        }
    }

    /// Decide the actuator positions for this tick.
    ///
    /// `co2` is the indoor level from the previous tick; the result is what
    /// the physics step should run with.
    pub fn decide(&mut self, co2: f64, mode: Mode, outdoor_pm25: f64) -> Actuation {
        let cfg = &self.cfg;
        match mode {
            Mode::Auto => {
                // Baseline ventilation, also right after a manual stop.
                self.fan = self.fan.max(cfg.fan_idle);
                self.valve = self.valve.max(cfg.valve_idle);
                if co2 > cfg.co2_target + cfg.upper_band {
                    self.fan = (self.fan + cfg.fan_step).min(100.0);
                    self.valve = (self.valve + cfg.valve_step).min(100.0);
                } else if co2 < cfg.co2_target - cfg.lower_band {
                    self.fan = (self.fan - cfg.fan_step).max(cfg.fan_idle);
                    self.valve = (self.valve - cfg.valve_step).max(cfg.valve_idle);
                }
            }
            Mode::ManualStopped => {
                self.fan = 0.0;
                self.valve = 0.0;
            }
        }

        if outdoor_pm25 > cfg.outdoor_pm25_limit {
            self.fan = self.fan.min(cfg.outdoor_cap);
            self.valve = self.valve.min(cfg.outdoor_cap);
        }

        self.fan = self.fan.clamp(0.0, 100.0);
        self.valve = self.valve.clamp(0.0, 100.0);
        self.actuation()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN_AIR: f64 = 12.0;

    fn controller() -> Controller {
        Controller::new(ControllerConfig::default())
    }

    // -- Auto mode ----------------------------------------------------------

    #[test]
    fn high_co2_ramps_up() {
        let mut c = controller();
        let a = c.decide(1300.0, Mode::Auto, CLEAN_AIR);
        assert!((a.fan - 10.2).abs() < 1e-9, "fan: {}", a.fan);
        assert!((a.valve - 5.25).abs() < 1e-9, "valve: {}", a.valve);
    }

    #[test]
    fn ramp_up_caps_at_100() {
        let mut c = controller();
        for _ in 0..2000 {
            c.decide(2000.0, Mode::Auto, CLEAN_AIR);
        }
        assert_eq!(c.actuation(), Actuation { fan: 100.0, valve: 100.0 });
    }

    #[test]
    fn low_co2_ramps_down_to_idle_not_zero() {
        let mut c = controller();
        for _ in 0..2000 {
            c.decide(450.0, Mode::Auto, CLEAN_AIR);
        }
        assert_eq!(c.actuation(), Actuation { fan: 5.0, valve: 5.0 });
    }

    #[test]
    fn inside_band_holds() {
        let mut c = controller();
        let before = c.actuation();
        // 800 - 120 < co2 < 800 + 80
        for co2 in [690.0, 800.0, 880.0] {
            assert_eq!(c.decide(co2, Mode::Auto, CLEAN_AIR), before);
        }
    }

    #[test]
    fn band_edges_are_exclusive() {
        let mut c = controller();
        let before = c.actuation();
        assert_eq!(c.decide(880.0, Mode::Auto, CLEAN_AIR), before);
        assert_eq!(c.decide(680.0, Mode::Auto, CLEAN_AIR), before);
        assert!(c.decide(880.1, Mode::Auto, CLEAN_AIR).fan > before.fan);
    }

    // -- Manual mode --------------------------------------------------------

    #[test]
    fn manual_stop_forces_zero_in_one_step() {
        for co2 in [420.0, 800.0, 3000.0] {
            let mut c = controller();
            for _ in 0..100 {
                c.decide(1500.0, Mode::Auto, CLEAN_AIR);
            }
            let a = c.decide(co2, Mode::ManualStopped, CLEAN_AIR);
            assert_eq!(a, Actuation { fan: 0.0, valve: 0.0 }, "co2={co2}");
        }
    }

    #[test]
    fn returning_to_auto_ramps_from_idle() {
        let mut c = controller();
        c.decide(1500.0, Mode::ManualStopped, CLEAN_AIR);
        let a = c.decide(1500.0, Mode::Auto, CLEAN_AIR);
        assert!((a.fan - 5.2).abs() < 1e-9, "fan: {}", a.fan);
        assert!((a.valve - 5.25).abs() < 1e-9, "valve: {}", a.valve);
    }

    #[test]
    fn returning_to_auto_inside_band_holds_idle() {
        let mut c = controller();
        c.decide(800.0, Mode::ManualStopped, CLEAN_AIR);
        for _ in 0..10 {
            let a = c.decide(800.0, Mode::Auto, CLEAN_AIR);
            assert_eq!(a, Actuation { fan: 5.0, valve: 5.0 });
        }
    }

    #[test]
    fn initial_position_below_idle_lifted_in_auto() {
        let mut c = Controller::new(ControllerConfig {
            initial_fan: 0.0,
            initial_valve: 0.0,
            ..ControllerConfig::default()
        });
        assert_eq!(
            c.decide(800.0, Mode::Auto, CLEAN_AIR),
            Actuation { fan: 5.0, valve: 5.0 }
        );
    }

    // -- Outdoor override ---------------------------------------------------

    #[test]
    fn dirty_outdoor_air_caps_actuators() {
        let mut c = controller();
        for _ in 0..2000 {
            c.decide(2000.0, Mode::Auto, CLEAN_AIR);
        }
        let a = c.decide(2000.0, Mode::Auto, 55.0);
        assert_eq!(a, Actuation { fan: 40.0, valve: 40.0 });
    }

    #[test]
    fn override_applies_in_manual_mode_too() {
        let mut c = controller();
        let a = c.decide(2000.0, Mode::ManualStopped, 80.0);
        assert_eq!(a, Actuation { fan: 0.0, valve: 0.0 });
    }

    #[test]
    fn override_threshold_is_exclusive() {
        let mut c = Controller::new(ControllerConfig {
            initial_fan: 90.0,
            initial_valve: 90.0,
            ..ControllerConfig::default()
        });
        let a = c.decide(800.0, Mode::Auto, 40.0);
        assert_eq!(a, Actuation { fan: 90.0, valve: 90.0 });
    }

    // -- Bounds -------------------------------------------------------------

    #[test]
    fn outputs_always_within_percent_range() {
        let mut c = controller();
        let mut rng = fastrand::Rng::with_seed(3);
        for _ in 0..5000 {
            let co2 = 400.0 + rng.f64() * 1600.0;
            let mode = if rng.bool() { Mode::Auto } else { Mode::ManualStopped };
            let pm = rng.f64() * 80.0;
            let a = c.decide(co2, mode, pm);
            assert!((0.0..=100.0).contains(&a.fan));
            assert!((0.0..=100.0).contains(&a.valve));
        }
    }

    #[test]
    fn reset_restores_initial_positions() {
        let mut c = controller();
        c.decide(2000.0, Mode::ManualStopped, CLEAN_AIR);
        c.reset();
        assert_eq!(c.actuation(), Actuation { fan: 10.0, valve: 5.0 });
    }

    // -- Config validation --------------------------------------------------

    #[test]
    fn default_config_is_valid() {
        let mut errors = Vec::new();
        ControllerConfig::default().validate(&mut errors);
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn invalid_config_reports_every_field() {
        let cfg = ControllerConfig {
            fan_step: 0.0,
            lower_band: -5.0,
            fan_idle: 120.0,
            ..ControllerConfig::default()
        };
        let mut errors = Vec::new();
        cfg.validate(&mut errors);
        assert_eq!(errors.len(), 3, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("fan_step")));
        assert!(errors.iter().any(|e| e.contains("lower_band")));
        assert!(errors.iter().any(|e| e.contains("fan_idle")));
    }
}
