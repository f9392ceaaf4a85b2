//! Simulation engine: owns the shared state and the periodic tick driver.
//!
//! The driver is a tokio task woken by an interval. Each tick takes the
//! state write lock, reads the clock and advances the simulation once, so a
//! tick is never interleaved with a scenario change or a reset. `stop()`
//! raises a watch flag that the driver checks before every tick and waits a
//! bounded time for the task to finish; past that the task is abandoned and
//! exits on its own after the tick it is in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::model::{self, EnvironmentModel};
use crate::noise::{self, Noise};
use crate::scenario::{ApplyOutcome, ScenarioUpdate};
use crate::state::{SharedState, SimState, StatusResponse};
use crate::store::Sample;

struct Driver {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
    generation: u64,
}

pub struct SimulationEngine {
    state: SharedState,
    clock: Arc<dyn Clock>,
    tick_period: Duration,
    stop_timeout: Duration,
    driver: Mutex<Option<Driver>>,
    /// Generation of the live driver, 0 when none is running.
    running: Arc<AtomicU64>,
    generations: AtomicU64,
}

impl SimulationEngine {
    pub fn new(
        cfg: &Config,
        model: Box<dyn EnvironmentModel>,
        clock: Arc<dyn Clock>,
        noise: Box<dyn Noise>,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(SimState::new(cfg, model, noise))),
            clock,
            tick_period: cfg.simulation.tick_period(),
            stop_timeout: cfg.simulation.stop_timeout(),
            driver: Mutex::new(None),
            running: Arc::new(AtomicU64::new(0)),
            generations: AtomicU64::new(0),
        }
    }

    /// Engine with the configured model and noise on the system clock.
    pub fn from_config(cfg: &Config) -> Self {
        let sim = &cfg.simulation;
        Self::new(
            cfg,
            model::build(sim.model, cfg.plant.outdoor_pm25),
            Arc::new(SystemClock),
            noise::from_settings(sim.noise, sim.seed),
        )
    }

    pub fn shared(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Spawn the tick driver. Returns `false` if one is already running.
    pub async fn start(&self) -> bool {
        let mut driver = self.driver.lock().await;
        if let Some(d) = driver.as_ref() {
            if !d.handle.is_finished() {
                return false;
            }
        }

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let (stop_tx, stop_rx) = watch::channel(false);
        self.running.store(generation, Ordering::SeqCst);

        let handle = tokio::spawn(run_driver(
            Arc::clone(&self.state),
            Arc::clone(&self.clock),
            self.tick_period,
            stop_rx,
            Arc::clone(&self.running),
            generation,
        ));
        *driver = Some(Driver {
            stop: stop_tx,
            handle,
            generation,
        });
        drop(driver);

        info!(
            generation,
            tick_ms = self.tick_period.as_millis() as u64,
            "simulation started"
        );
        self.state
            .write()
            .await
            .record_lifecycle("simulation started".to_string());
        true
    }

    /// Signal the driver to stop and wait up to the stop timeout for it.
    /// A no-op when nothing is running.
    pub async fn stop(&self) {
        let mut driver = self.driver.lock().await;
        let Some(Driver {
            stop,
            handle,
            generation,
        }) = driver.take()
        else {
            return;
        };

        // The receiver may already be gone if the driver faulted.
        let _ = stop.send(true);
        match tokio::time::timeout(self.stop_timeout, handle).await {
            Ok(Ok(())) => debug!(generation, "driver joined"),
            Ok(Err(e)) => error!(generation, error = %e, "driver task failed"),
            Err(_) => warn!(
                generation,
                timeout_ms = self.stop_timeout.as_millis() as u64,
                "driver did not stop in time, abandoning it"
            ),
        }
        let _ = self
            .running
            .compare_exchange(generation, 0, Ordering::SeqCst, Ordering::SeqCst);
        drop(driver);

        info!(generation, "simulation stopped");
        self.state
            .write()
            .await
            .record_lifecycle("simulation stopped".to_string());
    }

    /// Clear every sample. Safe to call whether or not the driver runs.
    pub async fn reset(&self) {
        self.state.write().await.reset();
        info!("simulation reset");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) != 0
    }

    // -----------------------------------------------------------------------
    // Scenario and queries
    // -----------------------------------------------------------------------

    /// Validate `update` and apply every accepted field under one lock.
    pub async fn apply_scenario(&self, update: &ScenarioUpdate) -> ApplyOutcome {
        let validated = update.validate();
        let outcome = self.state.write().await.apply_scenario(validated);
        if outcome.ok {
            info!(applied = ?outcome.applied, "scenario applied");
        } else {
            warn!(
                applied = ?outcome.applied,
                error = outcome.error.as_deref().unwrap_or_default(),
                "scenario partially rejected"
            );
        }
        outcome
    }

    /// Samples within `window_secs` of the newest one, oldest first.
    pub async fn recent_samples(&self, window_secs: f64) -> Vec<Sample> {
        self.state.read().await.window(window_secs)
    }

    pub async fn tail(&self, n: usize) -> Vec<Sample> {
        self.state.read().await.tail(n)
    }

    pub async fn status(&self) -> StatusResponse {
        let running = self.is_running();
        self.state.read().await.to_status(running)
    }
}

async fn run_driver(
    state: SharedState,
    clock: Arc<dyn Clock>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
    running: Arc<AtomicU64>,
    generation: u64,
) {
    let dt = period.as_secs_f64();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {}
        }

        let mut st = state.write().await;
        if *stop.borrow() {
            break;
        }
        let now = clock.now();
        match st.tick(now, dt) {
            Ok(sample) => debug!(
                ts = sample.timestamp,
                co2 = sample.co2,
                occupants = sample.occupants,
                fan = sample.fan,
                "tick"
            ),
            Err(e) => {
                error!(generation, error = %e, "sample store fault, driver exiting");
                st.record_fault(format!("driver stopped: {e}"));
                break;
            }
        }
    }

    let _ = running.compare_exchange(generation, 0, Ordering::SeqCst, Ordering::SeqCst);
    debug!(generation, "driver exited");
}

// ===========================================================================
// Tests
// ===========================================================================
