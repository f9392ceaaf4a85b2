//! Classroom occupancy from the weekly lesson timetable.
//!
//! Sunday is empty. Saturday runs a short fixed timetable, weekdays run the
//! shift selected in the scenario. During a lesson the room holds the class
//! (half of it for group lessons); during the break after a lesson only some
//! hallway traffic drifts through.

use time::macros::time;
use time::{Duration, PrimitiveDateTime, Time, Weekday};

use crate::noise::Noise;
use crate::scenario::{Scenario, Shift};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lesson {
    pub start: Time,
    pub end: Time,
    /// Length of the break that follows, in minutes.
    pub break_min: i64,
}

const fn lesson(start: Time, end: Time, break_min: i64) -> Lesson {
    Lesson {
        start,
        end,
        break_min,
    }
}

pub const SHIFT_ONE: &[Lesson] = &[
    lesson(time!(8:00), time!(8:40), 10),
    lesson(time!(8:50), time!(9:30), 15),
    lesson(time!(9:45), time!(10:25), 15),
    lesson(time!(10:40), time!(11:20), 15),
    lesson(time!(11:35), time!(12:15), 10),
    lesson(time!(12:25), time!(13:05), 10),
    lesson(time!(13:15), time!(13:55), 0),
];

pub const SHIFT_TWO: &[Lesson] = &[
    lesson(time!(14:00), time!(14:40), 15),
    lesson(time!(14:55), time!(15:35), 10),
    lesson(time!(15:45), time!(16:25), 10),
    lesson(time!(16:35), time!(17:15), 10),
    lesson(time!(17:25), time!(18:05), 10),
    lesson(time!(18:15), time!(18:55), 0),
];

pub const SATURDAY: &[Lesson] = &[
    lesson(time!(8:00), time!(8:40), 5),
    lesson(time!(8:45), time!(9:25), 10),
    lesson(time!(9:35), time!(10:15), 10),
    lesson(time!(10:25), time!(11:05), 10),
    lesson(time!(11:15), time!(11:55), 10),
    lesson(time!(12:05), time!(12:45), 10),
    lesson(time!(12:55), time!(13:35), 5),
    lesson(time!(13:40), time!(14:20), 0),
];

/// Half-width of the head-count jitter during lessons.
const LESSON_JITTER: f64 = 1.5;
/// Fraction of the class passing through the room during a break.
const BREAK_TRAFFIC: (f64, f64) = (0.05, 0.25);

pub fn schedule_for(weekday: Weekday, shift: Shift) -> &'static [Lesson] {
    match weekday {
        Weekday::Sunday => &[],
        Weekday::Saturday => SATURDAY,
        _ => match shift {
            Shift::First => SHIFT_ONE,
            Shift::Second => SHIFT_TWO,
        },
    }
}

/// Where in the timetable a time of day falls. Indices are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Lesson(u32),
    /// The break following lesson `n`.
    Break(u32),
    Free,
}

pub fn period_at(schedule: &[Lesson], t: Time) -> Period {
    for (i, l) in schedule.iter().enumerate() {
        let index = i as u32 + 1;
        if l.start <= t && t < l.end {
            return Period::Lesson(index);
        }
        let break_end = l.end + Duration::minutes(l.break_min);
        if l.end <= t && t < break_end {
            return Period::Break(index);
        }
    }
    Period::Free
}

/// Number of people in the room at local time `at`.
pub fn occupants_at(at: PrimitiveDateTime, scenario: &Scenario, noise: &mut dyn Noise) -> u32 {
    let schedule = schedule_for(at.weekday(), scenario.shift());
    let class = f64::from(scenario.class_size());

    match period_at(schedule, at.time()) {
        Period::Lesson(index) => {
            let base = if scenario.is_group_lesson(index) {
                (class / 2.0).ceil()
            } else {
                class
            };
            let jittered = base + noise.uniform(-LESSON_JITTER, LESSON_JITTER);
            jittered.trunc().max(0.0) as u32
        }
        Period::Break(_) => {
            let fraction = noise.uniform(BREAK_TRAFFIC.0, BREAK_TRAFFIC.1);
            (class * fraction).floor().max(0.0) as u32
        }
        Period::Free => 0,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
