//! MQTT command relay: turns window-unit telemetry into fan/valve commands.
//!
//! The relay answers every telemetry message, every couple of seconds, so it
//! moves in coarse tiers instead of the per-tick ramp the simulation uses.

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{PlantConfig, RelayConfig};
use crate::state::SharedState;

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

/// Telemetry from a window unit. Every key is optional; missing keys keep
/// the last known value.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub(crate) struct Telemetry {
    pub(crate) co2: Option<f64>,
    pub(crate) t: Option<f64>,
    pub(crate) rh: Option<f64>,
    pub(crate) pm25_out: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct Command {
    pub(crate) mode: &'static str,
    pub(crate) fan: f64,
    pub(crate) valve: f64,
}

// ---------------------------------------------------------------------------
// Relay policy
// ---------------------------------------------------------------------------

/// Tiered step policy, `[relay.policy]` in the config file.
///
/// Above `critical_co2` both actuators open by `critical_step`; above
/// `high_co2` they open by the `high_*_step`s; below `low_co2` both close by
/// `low_step` down to their floors. Dirty outdoor air caps both afterwards.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RelayPolicy {
    pub initial_fan: f64,
    pub initial_valve: f64,
    pub critical_co2: f64,
    pub critical_step: f64,
    pub high_co2: f64,
    pub high_fan_step: f64,
    pub high_valve_step: f64,
    pub low_co2: f64,
    pub low_step: f64,
    pub fan_floor: f64,
    pub valve_floor: f64,
    pub outdoor_pm25_limit: f64,
    pub outdoor_cap: f64,
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            initial_fan: 25.0,
            initial_valve: 15.0,
            critical_co2: 1200.0,
            critical_step: 30.0,
            high_co2: 1000.0,
            high_fan_step: 20.0,
            high_valve_step: 15.0,
            low_co2: 700.0,
            low_step: 10.0,
            fan_floor: 15.0,
            valve_floor: 5.0,
            outdoor_pm25_limit: 40.0,
            outdoor_cap: 40.0,
        }
    }
}

impl RelayPolicy {
    pub fn validate(&self, errors: &mut Vec<String>) {
        if !(self.low_co2 < self.high_co2 && self.high_co2 < self.critical_co2) {
            errors.push(format!(
                "relay.policy thresholds must satisfy low_co2 < high_co2 < critical_co2, got {} / {} / {}",
                self.low_co2, self.high_co2, self.critical_co2
            ));
        }
        for (name, v) in [
            ("critical_step", self.critical_step),
            ("high_fan_step", self.high_fan_step),
            ("high_valve_step", self.high_valve_step),
            ("low_step", self.low_step),
        ] {
            if !(v > 0.0 && v <= 100.0) {
                errors.push(format!("relay.policy.{name} {v} out of range (0, 100]"));
            }
        }
        for (name, v) in [
            ("initial_fan", self.initial_fan),
            ("initial_valve", self.initial_valve),
            ("fan_floor", self.fan_floor),
            ("valve_floor", self.valve_floor),
            ("outdoor_cap", self.outdoor_cap),
        ] {
            if !(0.0..=100.0).contains(&v) {
                errors.push(format!("relay.policy.{name} {v} out of range [0, 100]"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Relay state
// ---------------------------------------------------------------------------

pub(crate) struct RelayState {
    co2: f64,
    temperature: f64,
    humidity: f64,
    pm25_out: f64,
    fan: f64,
    valve: f64,
    policy: RelayPolicy,
}

impl RelayState {
    pub(crate) fn new(policy: RelayPolicy, plant: &PlantConfig) -> Self {
        Self {
            co2: plant.co2,
            temperature: plant.temperature,
            humidity: plant.humidity,
            pm25_out: plant.outdoor_pm25,
            fan: policy.initial_fan,
            valve: policy.initial_valve,
            policy,
        }
    }

    /// Merge `msg` into the last known state and decide the next command.
    pub(crate) fn on_telemetry(&mut self, msg: &Telemetry) -> Command {
        self.co2 = msg.co2.unwrap_or(self.co2);
        self.temperature = msg.t.unwrap_or(self.temperature);
        self.humidity = msg.rh.unwrap_or(self.humidity);
        self.pm25_out = msg.pm25_out.unwrap_or(self.pm25_out);
        self.decide()
    }

    fn decide(&mut self) -> Command {
        let p = &self.policy;
        if self.co2 > p.critical_co2 {
            self.fan = (self.fan + p.critical_step).min(100.0);
            self.valve = (self.valve + p.critical_step).min(100.0);
        } else if self.co2 > p.high_co2 {
            self.fan = (self.fan + p.high_fan_step).min(100.0);
            self.valve = (self.valve + p.high_valve_step).min(100.0);
        } else if self.co2 < p.low_co2 {
            self.fan = (self.fan - p.low_step).max(p.fan_floor);
            self.valve = (self.valve - p.low_step).max(p.valve_floor);
        }
        if self.pm25_out > p.outdoor_pm25_limit {
            self.fan = self.fan.min(p.outdoor_cap);
            self.valve = self.valve.min(p.outdoor_cap);
        }
        Command {
            mode: "auto",
            fan: self.fan,
            valve: self.valve,
        }
    }
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

pub(crate) fn parse_telemetry(payload: &[u8]) -> Result<Telemetry, serde_json::Error> {
    serde_json::from_slice(payload)
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Run the relay until the process exits. Broker errors are logged and
/// retried every two seconds.
pub async fn run(
    relay: RelayConfig,
    plant: PlantConfig,
    shared: SharedState,
) -> Result<()> {
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);

    let mut mqttoptions = MqttOptions::new(relay.client_id.clone(), broker.clone(), port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);

    let mut state = RelayState::new(relay.policy.clone(), &plant);
    info!(
        %broker,
        port,
        telemetry = %relay.telemetry_topic,
        command = %relay.command_topic,
        "mqtt relay starting"
    );

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) if p.topic == relay.telemetry_topic => {
                let msg = match parse_telemetry(&p.payload) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(topic = %p.topic, error = %e, "bad telemetry json");
                        shared
                            .write()
                            .await
                            .record_relay(format!("bad telemetry json: {e}"));
                        continue;
                    }
                };

                let cmd = state.on_telemetry(&msg);
                debug!(
                    co2 = state.co2,
                    t = state.temperature,
                    rh = state.humidity,
                    pm25_out = state.pm25_out,
                    fan = cmd.fan,
                    valve = cmd.valve,
                    "telemetry"
                );

                let payload = serde_json::to_vec(&cmd)?;
                if let Err(e) = client
                    .publish(&relay.command_topic, QoS::AtLeastOnce, false, payload)
                    .await
                {
                    warn!(error = %e, "command publish failed");
                }
            }
            Ok(Event::Incoming(Packet::Publish(p))) => {
                debug!(topic = %p.topic, "unhandled topic");
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                client
                    .subscribe(&relay.telemetry_topic, QoS::AtLeastOnce)
                    .await?;
                let mut st = shared.write().await;
                st.relay_connected = true;
                st.record_relay("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                info!("mqtt disconnected");
                let mut st = shared.write().await;
                st.relay_connected = false;
                st.record_relay("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "mqtt error, reconnecting");
                let mut st = shared.write().await;
                if st.relay_connected {
                    st.record_relay(format!("mqtt error: {e}"));
                }
                st.relay_connected = false;
                drop(st);

                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
