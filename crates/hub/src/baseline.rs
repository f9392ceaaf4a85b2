//! Calendar-independent synthetic generator.
//!
//! Occupancy follows a slow sine over an internal step counter instead of a
//! timetable, and CO₂ is cleared in proportion to its excess over ambient
//! rather than at a flat per-actuator rate.

use time::{Date, PrimitiveDateTime};

use crate::climate::{self, Outdoor};
use crate::model::{Drive, EnvironmentModel, IndoorAir, CO2_OUTDOOR};
use crate::noise::Noise;
use crate::physics::{CO2_RANGE, PM_RANGE, TEMP_RANGE};
use crate::scenario::Scenario;

const MAX_OCCUPANTS: f64 = 30.0;
/// ppm/s per occupant.
const GENERATION: f64 = 0.7;
/// Air changes per minute at full fan.
const DECAY_AT_FULL_FAN: f64 = 4.0;
const RH_RANGE: (f64, f64) = (25.0, 70.0);
const PM_FLOOR: f64 = 3.0;

pub struct BaselineModel {
    outdoor_pm25: f64,
    k: u64,
}

impl BaselineModel {
    pub fn new(outdoor_pm25: f64) -> Self {
        Self { outdoor_pm25, k: 0 }
    }

    fn phase(&self, period: f64) -> f64 {
        self.k as f64 / period
    }
}

impl EnvironmentModel for BaselineModel {
    fn name(&self) -> &'static str {
        "baseline"
    }

    fn occupants(&mut self, _at: PrimitiveDateTime, _: &Scenario, noise: &mut dyn Noise) -> u32 {
        let wave = 15.0 * self.phase(180.0).sin().abs();
        let n = 2.0 + (3.0 + wave + noise.uniform(-1.0, 1.0)).trunc();
        n.clamp(0.0, MAX_OCCUPANTS) as u32
    }

    fn outdoor(&self, date: Date, noise: &mut dyn Noise) -> Outdoor {
        climate::outdoor_at(date, self.outdoor_pm25, noise)
    }

    fn advance(&mut self, air: IndoorAir, drive: &Drive, _: &mut dyn Noise) -> IndoorAir {
        self.k += 1;
        let people = f64::from(drive.occupants);
        let fan = drive.actuation.fan / 100.0;
        let dt = drive.dt;

        let clearance = (air.co2 - CO2_OUTDOOR) * fan * DECAY_AT_FULL_FAN / 60.0;
        let co2 = air.co2 + (GENERATION * people - clearance) * dt;

        let dtemp = 0.03 * self.phase(50.0).sin() + 0.01 * (people - 10.0) / 10.0 - 0.02 * fan;
        let drh = 0.05 * self.phase(70.0).cos() + 0.03 * (people - 10.0) / 10.0;
        let dpm = 0.1 * self.phase(33.0).sin() - 0.08 * fan;

        IndoorAir {
            co2: co2.clamp(CO2_RANGE.0, CO2_RANGE.1),
            temperature: (air.temperature + dtemp * dt).clamp(TEMP_RANGE.0, TEMP_RANGE.1),
            humidity: (air.humidity + drh * dt).clamp(RH_RANGE.0, RH_RANGE.1),
            pm25: (air.pm25 + dpm * dt).clamp(PM_FLOOR, PM_RANGE.1),
        }
    }
}
