//! Per-tick indoor air update for the school-day model.
//!
//! These are engineering approximations, one independent relation per
//! quantity:
//!
//! - CO₂: occupant generation minus a clearance proportional to actuator
//!   position (a flat rate per 10 % of fan/valve opening, not an exponential
//!   decay toward ambient), floored at the outdoor baseline.
//! - Temperature: first-order relaxation toward outdoor temperature plus an
//!   occupant heat gain.
//! - Humidity: fast relaxation toward outdoor humidity plus an occupant
//!   moisture gain.
//! - PM2.5: slow oscillating drift minus fan filtration.
//!
//! All rate constants are per minute in the literature sense and are
//! converted to per-second increments scaled by `dt`.

use time::{Date, PrimitiveDateTime};

use crate::climate::{self, Outdoor};
use crate::controller::Actuation;
use crate::model::{Drive, EnvironmentModel, IndoorAir, CO2_OUTDOOR};
use crate::noise::Noise;
use crate::occupancy;
use crate::scenario::Scenario;

/// CO₂ generated per occupant, ppm/min.
const K_PERSON: f64 = 16.0;
/// CO₂ cleared per 10 % fan, ppm/min.
const VENT_PER_10: f64 = 60.0;
/// CO₂ cleared per 10 % valve, ppm/min.
const VALVE_PER_10: f64 = 25.0;
/// Heat gain per occupant, °C/min.
const ROOM_HEAT_PER_PERSON: f64 = 0.015;
/// Thermal time constant, minutes.
const TAU_TEMP: f64 = 25.0;
/// Humidity relaxation time constant, seconds.
const TAU_HUMIDITY_S: f64 = 60.0;
/// Moisture gain per occupant, %RH/min.
const RH_PER_PERSON: f64 = 0.01;
/// Filtration per percent of fan, µg/m³ per second.
const PM_FILTRATION: f64 = 0.002;

const CO2_NOISE: f64 = 1.5;
const RH_NOISE: f64 = 0.02;
const PM_NOISE: f64 = 0.05;
const PM_WAVE: f64 = 0.03;

pub const CO2_RANGE: (f64, f64) = (CO2_OUTDOOR, 5000.0);
pub const TEMP_RANGE: (f64, f64) = (-40.0, 60.0);
pub const RH_RANGE: (f64, f64) = (20.0, 90.0);
pub const PM_RANGE: (f64, f64) = (2.0, 25.0);

pub struct SchoolDayModel {
    outdoor_pm25: f64,
    step: u64,
}

impl SchoolDayModel {
    pub fn new(outdoor_pm25: f64) -> Self {
        Self {
            outdoor_pm25,
            step: 0,
        }
    }
}

impl EnvironmentModel for SchoolDayModel {
    fn name(&self) -> &'static str {
        "school-day"
    }

    fn occupants(
        &mut self,
        at: PrimitiveDateTime,
        scenario: &Scenario,
        noise: &mut dyn Noise,
    ) -> u32 {
        occupancy::occupants_at(at, scenario, noise)
    }

    fn outdoor(&self, date: Date, noise: &mut dyn Noise) -> Outdoor {
        climate::outdoor_at(date, self.outdoor_pm25, noise)
    }

    fn advance(&mut self, air: IndoorAir, drive: &Drive, noise: &mut dyn Noise) -> IndoorAir {
        self.step += 1;
        let people = f64::from(drive.occupants);
        let dt = drive.dt;

        let co2 = co2_step(
            air.co2,
            people,
            drive.actuation,
            dt,
            noise.uniform(-CO2_NOISE, CO2_NOISE),
        );
        let temperature = temperature_step(air.temperature, people, drive.outdoor.temperature, dt);
        let humidity = humidity_step(
            air.humidity,
            people,
            drive.outdoor.humidity,
            dt,
            noise.uniform(-RH_NOISE, RH_NOISE),
        );
        let wave = PM_WAVE * (self.step as f64 / 33.0).sin();
        let pm25 = pm25_step(
            air.pm25,
            drive.actuation.fan,
            dt,
            wave + noise.uniform(-PM_NOISE, PM_NOISE),
        );

        IndoorAir {
            co2,
            temperature,
            humidity,
            pm25,
        }
    }
}

/// CO₂ clearance rate for the given actuator positions, ppm/s.
pub fn clearance(actuation: Actuation) -> f64 {
    (actuation.fan / 10.0) * VENT_PER_10 / 60.0 + (actuation.valve / 10.0) * VALVE_PER_10 / 60.0
}

pub fn co2_step(co2: f64, people: f64, actuation: Actuation, dt: f64, jitter: f64) -> f64 {
    let generation = people * K_PERSON / 60.0;
    let next = co2 + (generation - clearance(actuation)) * dt + jitter;
    next.clamp(CO2_RANGE.0, CO2_RANGE.1)
}

pub fn temperature_step(temp: f64, people: f64, outdoor: f64, dt: f64) -> f64 {
    let relax = (outdoor - temp) / TAU_TEMP / 60.0;
    let heat = people * ROOM_HEAT_PER_PERSON / 60.0;
    (temp + (relax + heat) * dt).clamp(TEMP_RANGE.0, TEMP_RANGE.1)
}

pub fn humidity_step(rh: f64, people: f64, outdoor: f64, dt: f64, jitter: f64) -> f64 {
    let relax = (outdoor - rh) / TAU_HUMIDITY_S;
    let moisture = people * RH_PER_PERSON / 60.0;
    (rh + (relax + moisture) * dt + jitter).clamp(RH_RANGE.0, RH_RANGE.1)
}

pub fn pm25_step(pm: f64, fan: f64, dt: f64, drift: f64) -> f64 {
    (pm + drift - PM_FILTRATION * fan * dt).clamp(PM_RANGE.0, PM_RANGE.1)
}

// ===========================================================================
// Tests
// ===========================================================================
