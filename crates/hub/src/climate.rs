//! Outdoor climate: monthly normals for the reference school's city, with a
//! little weather noise on top.

use time::{Date, Month};

use crate::noise::Noise;

/// Monthly normals `(°C, %RH)`, January first.
const NORMALS: [(f64, f64); 12] = [
    (-16.0, 80.0),
    (-14.0, 78.0),
    (-6.0, 72.0),
    (3.0, 65.0),
    (12.0, 58.0),
    (18.0, 55.0),
    (20.0, 55.0),
    (18.0, 60.0),
    (10.0, 65.0),
    (3.0, 75.0),
    (-6.0, 80.0),
    (-12.0, 82.0),
];

const FALLBACK: (f64, f64) = (0.0, 60.0);

const TEMP_NOISE: f64 = 1.5;
const HUMIDITY_NOISE: f64 = 4.0;
const HUMIDITY_RANGE: (f64, f64) = (35.0, 95.0);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outdoor {
    pub temperature: f64,
    pub humidity: f64,
    pub pm25: f64,
}

pub fn normal_for(month: Month) -> (f64, f64) {
    NORMALS
        .get(usize::from(u8::from(month)).wrapping_sub(1))
        .copied()
        .unwrap_or(FALLBACK)
}

/// Outdoor conditions on `date`. PM2.5 is the configured background level.
pub fn outdoor_at(date: Date, pm25: f64, noise: &mut dyn Noise) -> Outdoor {
    let (t, rh) = normal_for(date.month());
    Outdoor {
        temperature: t + noise.uniform(-TEMP_NOISE, TEMP_NOISE),
        humidity: (rh + noise.uniform(-HUMIDITY_NOISE, HUMIDITY_NOISE))
            .clamp(HUMIDITY_RANGE.0, HUMIDITY_RANGE.1),
        pm25,
    }
}
