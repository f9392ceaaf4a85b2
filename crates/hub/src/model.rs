//! Environment model strategy.
//!
//! A model answers three questions per tick: how many people are in the
//! room, what the air outside is like, and how the indoor air evolves given
//! both and the current actuator positions. Two implementations exist and
//! are chosen explicitly by configuration:
//!
//! - [`SchoolDayModel`](crate::physics::SchoolDayModel): timetable-driven
//!   occupancy, monthly climate, flat-rate ventilation clearance.
//! - [`BaselineModel`](crate::baseline::BaselineModel): a synthetic
//!   sinusoidal generator with decay-toward-ambient clearance, useful for
//!   quick demos independent of the calendar.

use serde::Deserialize;
use time::{Date, PrimitiveDateTime};

use crate::baseline::BaselineModel;
use crate::climate::Outdoor;
use crate::controller::Actuation;
use crate::noise::Noise;
use crate::physics::SchoolDayModel;
use crate::scenario::Scenario;

/// Outdoor CO₂ baseline, ppm. Indoor CO₂ never drops below it.
pub const CO2_OUTDOOR: f64 = 420.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndoorAir {
    /// ppm
    pub co2: f64,
    /// °C
    pub temperature: f64,
    /// %RH
    pub humidity: f64,
    /// µg/m³
    pub pm25: f64,
}

impl Default for IndoorAir {
    fn default() -> Self {
        Self {
            co2: 600.0,
            temperature: 21.0,
            humidity: 46.0,
            pm25: 12.0,
        }
    }
}

/// Everything besides the current air that drives one physics step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drive {
    pub occupants: u32,
    pub outdoor: Outdoor,
    pub actuation: Actuation,
    /// Elapsed seconds since the previous step.
    pub dt: f64,
}

pub trait EnvironmentModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn occupants(&mut self, at: PrimitiveDateTime, scenario: &Scenario, noise: &mut dyn Noise)
        -> u32;

    fn outdoor(&self, date: Date, noise: &mut dyn Noise) -> Outdoor;

    /// Produce the next indoor state. Every field of the result is clamped to
    /// the model's validity range.
    fn advance(&mut self, air: IndoorAir, drive: &Drive, noise: &mut dyn Noise) -> IndoorAir;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    #[default]
    SchoolDay,
    Baseline,
}

pub fn build(kind: ModelKind, outdoor_pm25: f64) -> Box<dyn EnvironmentModel> {
    match kind {
        ModelKind::SchoolDay => Box::new(SchoolDayModel::new(outdoor_pm25)),
        ModelKind::Baseline => Box::new(BaselineModel::new(outdoor_pm25)),
    }
}
