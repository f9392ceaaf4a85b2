mod sim;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::{env, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use sim::{Scenario, WindowSim};

/// Command from the hub relay. `mode = "stop"` closes the unit; otherwise
/// any fan / valve present is applied.
#[derive(Debug, Default, Deserialize, PartialEq)]
struct Command {
    mode: Option<String>,
    fan: Option<f64>,
    valve: Option<f64>,
}

fn telemetry_topic(room: &str, unit: &str) -> String {
    format!("school/{room}/{unit}/telemetry")
}

fn command_topic(room: &str, unit: &str) -> String {
    format!("school/{room}/{unit}/cmd")
}

fn parse_command(payload: &[u8]) -> Result<Command, serde_json::Error> {
    serde_json::from_slice(payload)
}

fn apply_command(sim: &mut WindowSim, cmd: &Command) {
    if cmd
        .mode
        .as_deref()
        .is_some_and(|m| m.eq_ignore_ascii_case("stop"))
    {
        sim.close();
        return;
    }
    let (fan, valve) = sim.actuators();
    sim.set_actuators(cmd.fan.unwrap_or(fan), cmd.valve.unwrap_or(valve));
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Env config
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let room = env::var("ROOM_ID").unwrap_or_else(|_| "classA".to_string());
    let unit = env::var("UNIT_ID").unwrap_or_else(|_| "window1".to_string());
    let sample_every_s: u64 = env::var("SAMPLE_EVERY_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(2);
    let scenario = Scenario::from_str_lossy(
        &env::var("NODE_SCENARIO").unwrap_or_else(|_| "normal".to_string()),
    );

    let sim = Arc::new(Mutex::new(WindowSim::new(scenario)));
    info!(%scenario, %room, %unit, sample_every_s, "window unit simulator starting");

    let client_id = format!("smart-vent-node-{room}-{unit}");
    let mut mqttoptions = MqttOptions::new(client_id, broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    let tele_topic = telemetry_topic(&room, &unit);
    let cmd_topic = command_topic(&room, &unit);

    // Event loop: keeps the connection alive and applies incoming commands.
    let loop_client = client.clone();
    let loop_sim = Arc::clone(&sim);
    let loop_cmd_topic = cmd_topic.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("node connected to mqtt");
                    if let Err(e) = loop_client
                        .subscribe(&loop_cmd_topic, QoS::AtLeastOnce)
                        .await
                    {
                        warn!(error = %e, "subscribe failed");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) if p.topic == loop_cmd_topic => {
                    match parse_command(&p.payload) {
                        Ok(cmd) => {
                            let mut sim = loop_sim.lock().await;
                            apply_command(&mut sim, &cmd);
                            let (fan, valve) = sim.actuators();
                            info!(fan, valve, mode = ?cmd.mode, "command applied");
                        }
                        Err(e) => warn!(error = %e, "bad command json"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "mqtt error, retrying");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    info!(topic = %tele_topic, "publishing telemetry");

    loop {
        let reading = sim.lock().await.sample();
        let payload = serde_json::to_vec(&reading).context("encode telemetry")?;

        if let Err(e) = client
            .publish(&tele_topic, QoS::AtLeastOnce, false, payload)
            .await
        {
            warn!(error = %e, "publish error");
        } else {
            debug!(co2 = reading.co2, pm25_out = reading.pm25_out, "published telemetry");
        }

        sleep(Duration::from_secs(sample_every_s)).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sim() -> WindowSim {
        WindowSim::with_rng(Scenario::Normal, fastrand::Rng::with_seed(1))
    }

    // -- Topics -------------------------------------------------------------

    #[test]
    fn topics_follow_school_layout() {
        assert_eq!(
            telemetry_topic("classA", "window1"),
            "school/classA/window1/telemetry"
        );
        assert_eq!(command_topic("classA", "window1"), "school/classA/window1/cmd");
    }

    // -- Commands -----------------------------------------------------------

    #[test]
    fn parse_full_command() {
        let cmd = parse_command(br#"{"mode":"auto","fan":30,"valve":20.5}"#).unwrap();
        assert_eq!(
            cmd,
            Command {
                mode: Some("auto".into()),
                fan: Some(30.0),
                valve: Some(20.5),
            }
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_command(b"ON").is_err());
        assert!(parse_command(br#"{"fan":"max"}"#).is_err());
    }

    #[test]
    fn auto_command_sets_actuators() {
        let mut s = sim();
        apply_command(&mut s, &parse_command(br#"{"mode":"auto","fan":30,"valve":20}"#).unwrap());
        assert_eq!(s.actuators(), (30.0, 20.0));
    }

    #[test]
    fn partial_command_keeps_other_actuator() {
        let mut s = sim();
        s.set_actuators(40.0, 10.0);
        apply_command(&mut s, &parse_command(br#"{"fan":70}"#).unwrap());
        assert_eq!(s.actuators(), (70.0, 10.0));
    }

    #[test]
    fn stop_command_closes_unit() {
        let mut s = sim();
        s.set_actuators(80.0, 60.0);
        apply_command(&mut s, &parse_command(br#"{"mode":"STOP","fan":50}"#).unwrap());
        assert_eq!(s.actuators(), (0.0, 0.0));
    }

    #[test]
    fn telemetry_payload_is_valid_json() {
        let mut s = sim();
        let json = serde_json::to_value(s.sample()).unwrap();
        assert!(json["co2"].as_f64().unwrap() > 650.0);
        assert!(json["t"].is_number());
        assert!(json["rh"].is_number());
        assert!(json["pm25_out"].is_number());
    }
}
