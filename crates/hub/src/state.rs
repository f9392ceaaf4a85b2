use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::Config;
use crate::controller::Controller;
use crate::model::{Drive, EnvironmentModel, IndoorAir};
use crate::noise::Noise;
use crate::scenario::{ApplyOutcome, Scenario, ScenarioView, ValidatedUpdate};
use crate::store::{Sample, SampleStore, StoreError};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

/// Every mutation (tick, scenario change, reset) takes the write half of
/// this lock, so they are serialized against each other.
pub type SharedState = Arc<RwLock<SimState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SimState {
    pub started_at: Instant,
    pub relay_connected: bool,
    scenario: Scenario,
    store: SampleStore,
    air: IndoorAir,
    initial_air: IndoorAir,
    controller: Controller,
    model: Box<dyn EnvironmentModel>,
    noise: Box<dyn Noise>,
    utc_offset: UtcOffset,
    /// Set while the wall clock reads earlier than the newest sample.
    clock_behind: bool,
    events: VecDeque<SystemEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Lifecycle,
    Scenario,
    Relay,
    Clock,
    Fault,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub uptime_secs: u64,
    pub model: &'static str,
    pub relay_connected: bool,
    pub samples: usize,
    pub capacity: usize,
    pub scenario: ScenarioView,
    pub latest: Option<Sample>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SimState {
    pub fn new(cfg: &Config, model: Box<dyn EnvironmentModel>, noise: Box<dyn Noise>) -> Self {
        let air = cfg.plant.indoor();
        Self {
            started_at: Instant::now(),
            relay_connected: false,
            scenario: cfg.initial_scenario(),
            store: SampleStore::new(cfg.simulation.capacity),
            air,
            initial_air: air,
            controller: Controller::new(cfg.controller.clone()),
            model,
            noise,
            utc_offset: cfg.simulation.utc_offset(),
            clock_behind: false,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Advance the simulation by one step of `dt` seconds at wall-clock `now`
    /// and store the resulting sample.
    ///
    /// Order: occupancy and outdoor climate, then the controller (looking at
    /// the previous CO₂), then physics with the fresh actuator positions.
    /// Nothing is committed if the store refuses the sample.
    pub fn tick(&mut self, now: OffsetDateTime, dt: f64) -> Result<Sample, StoreError> {
        let local = now.to_offset(self.utc_offset);
        let date = self.scenario.date_override().unwrap_or(local.date());
        let at = PrimitiveDateTime::new(date, local.time());
        let mode = self.scenario.mode();

        let occupants = self
            .model
            .occupants(at, &self.scenario, self.noise.as_mut());
        let outdoor = self.model.outdoor(date, self.noise.as_mut());

        let mut controller = self.controller.clone();
        let actuation = controller.decide(self.air.co2, mode, outdoor.pm25);

        let drive = Drive {
            occupants,
            outdoor,
            actuation,
            dt,
        };
        let air = self.model.advance(self.air, &drive, self.noise.as_mut());

        let sample = Sample {
            timestamp: self.next_timestamp(now, dt),
            co2: air.co2,
            temperature: air.temperature,
            relative_humidity: air.humidity,
            pm25: air.pm25,
            occupants,
            fan: actuation.fan,
            valve: actuation.valve,
            mode,
        };
        self.store.append(sample)?;

        self.controller = controller;
        self.air = air;
        Ok(sample)
    }

    /// Sample time for a tick at `now`. When the wall clock has stepped back
    /// behind the newest sample, time keeps advancing by `dt` per tick until
    /// the clock catches up.
    fn next_timestamp(&mut self, now: OffsetDateTime, dt: f64) -> f64 {
        let wall = now.unix_timestamp_nanos() as f64 / 1e9;
        let Some(newest) = self.store.latest().map(|s| s.timestamp) else {
            return wall;
        };
        if wall > newest {
            if self.clock_behind {
                self.clock_behind = false;
                info!(wall, "wall clock caught up with sample time");
                self.push_event(EventKind::Clock, "wall clock caught up".to_string());
            }
            return wall;
        }
        if !self.clock_behind {
            self.clock_behind = true;
            let behind = newest - wall;
            warn!(behind_secs = behind, "wall clock stepped back, bridging sample time");
            self.push_event(
                EventKind::Clock,
                format!("wall clock stepped back {behind:.3}s"),
            );
        }
        newest + dt
    }

    /// Apply a pre-validated scenario change in one step.
    pub fn apply_scenario(&mut self, update: ValidatedUpdate) -> ApplyOutcome {
        let outcome = update.apply_to(&mut self.scenario);
        let mut detail = format!("scenario applied: [{}]", outcome.applied.join(", "));
        if let Some(error) = &outcome.error {
            detail.push_str(&format!(" rejected: {error}"));
        }
        self.push_event(EventKind::Scenario, detail);
        outcome
    }

    /// Drop every sample and return the room and actuators to their starting
    /// state. The scenario is kept.
    pub fn reset(&mut self) {
        self.store.clear();
        self.clock_behind = false;
        self.air = self.initial_air;
        self.controller.reset();
        self.push_event(EventKind::Lifecycle, "samples cleared".to_string());
    }

    pub fn tail(&self, n: usize) -> Vec<Sample> {
        self.store.tail(n)
    }

    pub fn window(&self, secs: f64) -> Vec<Sample> {
        self.store.window(secs)
    }

    #[cfg(test)]
    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    #[cfg(test)]
    pub fn air(&self) -> IndoorAir {
        self.air
    }

    pub fn record_lifecycle(&mut self, detail: String) {
        self.push_event(EventKind::Lifecycle, detail);
    }

    pub fn record_relay(&mut self, detail: String) {
        self.push_event(EventKind::Relay, detail);
    }

    pub fn record_fault(&mut self, detail: String) {
        self.push_event(EventKind::Fault, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self, running: bool) -> StatusResponse {
        StatusResponse {
            running,
            uptime_secs: self.started_at.elapsed().as_secs(),
            model: self.model.name(),
            relay_connected: self.relay_connected,
            samples: self.store.len(),
            capacity: self.store.capacity(),
            scenario: self.scenario.view(),
            latest: self.store.latest().copied(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Mode;
    use crate::model::{self, ModelKind};
    use crate::noise::Silent;
    use crate::scenario::{FieldValue, ScenarioUpdate};
    use time::macros::datetime;
    use time::Duration;

    const SUNDAY: OffsetDateTime = datetime!(2025-10-05 10:00 UTC);
    const MONDAY_LESSON: OffsetDateTime = datetime!(2025-10-06 4:00 UTC);

    fn state_with(cfg: Config) -> SimState {
        let model = model::build(cfg.simulation.model, cfg.plant.outdoor_pm25);
        SimState::new(&cfg, model, Box::new(Silent))
    }

    fn state() -> SimState {
        state_with(Config::default())
    }

    fn update(u: ScenarioUpdate) -> ValidatedUpdate {
        u.validate()
    }

    // -- Tick ---------------------------------------------------------------

    #[test]
    fn tick_appends_one_sample() {
        let mut st = state();
        let s = st.tick(SUNDAY, 1.0).unwrap();
        assert_eq!(st.tail(10), vec![s]);
        assert_eq!(s.timestamp, SUNDAY.unix_timestamp() as f64);
        assert_eq!(s.occupants, 0);
        assert_eq!(s.mode, Mode::Auto);
    }

    #[test]
    fn occupancy_uses_local_time() {
        // 04:00 UTC is 09:00 at UTC+5, inside lesson 2.
        let mut st = state();
        let s = st.tick(MONDAY_LESSON, 1.0).unwrap();
        assert_eq!(s.occupants, 30);
    }

    #[test]
    fn date_override_replaces_calendar_date() {
        let mut st = state();
        st.apply_scenario(update(ScenarioUpdate {
            date: Some("2025-10-05".into()),
            ..Default::default()
        }));
        let s = st.tick(MONDAY_LESSON, 1.0).unwrap();
        assert_eq!(s.occupants, 0);
    }

    #[test]
    fn auto_mode_ventilates_down_from_high_co2() {
        let mut cfg = Config::default();
        cfg.plant.co2 = 1300.0;
        let mut st = state_with(cfg);

        let mut now = SUNDAY;
        let mut prev = 1300.0;
        let mut reached_band_at = None;
        for i in 0..600 {
            let s = st.tick(now, 1.0).unwrap();
            assert_eq!(s.occupants, 0);
            assert!(s.co2 <= prev, "tick {i}: {} > {prev}", s.co2);
            if s.co2 <= 880.0 && reached_band_at.is_none() {
                reached_band_at = Some(i);
            }
            prev = s.co2;
            now += Duration::seconds(1);
        }
        assert!(reached_band_at.is_some(), "never reached band, co2 = {prev}");
        assert!(prev >= 420.0);
    }

    #[test]
    fn manual_mode_stops_actuators_in_one_tick() {
        let mut cfg = Config::default();
        cfg.plant.co2 = 2500.0;
        let mut st = state_with(cfg);
        st.apply_scenario(update(ScenarioUpdate {
            auto: Some(FieldValue::Bool(false)),
            ..Default::default()
        }));
        let s = st.tick(MONDAY_LESSON, 1.0).unwrap();
        assert_eq!((s.fan, s.valve), (0.0, 0.0));
        assert_eq!(s.mode, Mode::ManualStopped);
    }

    #[test]
    fn invariants_hold_over_a_school_day() {
        let mut cfg = Config::default();
        cfg.simulation.capacity = 500;
        let model = model::build(ModelKind::SchoolDay, 12.0);
        let mut st = SimState::new(&cfg, model, Box::new(fastrand::Rng::with_seed(99)));

        let mut now = datetime!(2025-10-06 2:00 UTC);
        for _ in 0..(14 * 60) {
            let s = st.tick(now, 60.0).unwrap();
            assert!(s.co2 >= 420.0);
            assert!(s.pm25 >= 2.0);
            assert!((0.0..=100.0).contains(&s.fan));
            assert!((0.0..=100.0).contains(&s.valve));
            assert!(st.tail(usize::MAX).len() <= 500);
            now += Duration::minutes(1);
        }
    }

    #[test]
    fn clock_stepping_back_bridges_sample_time() {
        let mut st = state();
        let t0 = MONDAY_LESSON.unix_timestamp() as f64;
        st.tick(MONDAY_LESSON, 1.0).unwrap();

        let back = st.tick(MONDAY_LESSON - Duration::seconds(5), 1.0).unwrap();
        assert_eq!(back.timestamp, t0 + 1.0);
        let still_back = st.tick(MONDAY_LESSON - Duration::seconds(4), 1.0).unwrap();
        assert_eq!(still_back.timestamp, t0 + 2.0);

        let caught_up = st.tick(MONDAY_LESSON + Duration::seconds(10), 1.0).unwrap();
        assert_eq!(caught_up.timestamp, t0 + 10.0);
        assert_eq!(st.tail(10).len(), 4);

        let clock_events: Vec<_> = st
            .to_status(true)
            .events
            .into_iter()
            .filter(|e| e.kind == EventKind::Clock)
            .map(|e| e.detail)
            .collect();
        assert_eq!(clock_events.len(), 2, "{clock_events:?}");
        assert!(clock_events[1].contains("stepped back 5.000s"));
    }

    // -- Scenario -----------------------------------------------------------

    #[test]
    fn shift_three_rejected_shift_two_accepted() {
        let mut st = state();
        let out = st.apply_scenario(update(ScenarioUpdate {
            shift: Some(FieldValue::Int(3)),
            ..Default::default()
        }));
        assert!(!out.ok);
        assert_eq!(st.scenario().shift().number(), 1);

        let out = st.apply_scenario(update(ScenarioUpdate {
            shift: Some(FieldValue::Int(2)),
            ..Default::default()
        }));
        assert!(out.ok);
        assert_eq!(st.scenario().shift().number(), 2);
    }

    // -- Reset / events -----------------------------------------------------

    #[test]
    fn reset_clears_samples_and_restores_air() {
        let mut st = state();
        for i in 0..10 {
            st.tick(MONDAY_LESSON + Duration::seconds(i), 1.0).unwrap();
        }
        st.reset();
        assert!(st.tail(5).is_empty());
        assert_eq!(st.air(), IndoorAir::default());
        st.reset();
        assert!(st.tail(1).is_empty());
    }

    #[test]
    fn events_are_bounded_and_newest_first() {
        let mut st = state();
        for i in 0..(MAX_EVENTS + 20) {
            st.record_lifecycle(format!("event {i}"));
        }
        let status = st.to_status(false);
        assert_eq!(status.events.len(), MAX_EVENTS);
        assert_eq!(status.events[0].detail, format!("event {}", MAX_EVENTS + 19));
    }

    #[test]
    fn status_reports_store_and_model() {
        let mut st = state();
        st.tick(SUNDAY, 1.0).unwrap();
        let status = st.to_status(true);
        assert!(status.running);
        assert_eq!(status.model, "school-day");
        assert_eq!(status.samples, 1);
        assert_eq!(status.capacity, crate::store::DEFAULT_CAPACITY);
        assert!(status.latest.is_some());
    }
}
