//! Optional MQTT bridge.  Mirrors the WebSocket surface onto a broker:
//! commands arrive on `<prefix>/cmd`, every broadcast goes out on
//! `<prefix>/state`, direct replies on `<prefix>/reply`.

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::Hub;

const CLIENT_ID: &str = "irrigation-hub";
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Settings / topic helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub prefix: String,
}

impl MqttSettings {
    /// `None` when `MQTT_HOST` is unset, which disables the bridge.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let host = get("MQTT_HOST").filter(|h| !h.trim().is_empty())?;
        let port = get("MQTT_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1883);
        let prefix = get("MQTT_PREFIX")
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "irrigation".to_string());
        Some(Self { host, port, prefix })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Topics {
    pub(crate) cmd: String,
    pub(crate) state: String,
    pub(crate) reply: String,
}

impl Topics {
    pub(crate) fn new(prefix: &str) -> Self {
        Self {
            cmd: format!("{prefix}/cmd"),
            state: format!("{prefix}/state"),
            reply: format!("{prefix}/reply"),
        }
    }
}

// ---------------------------------------------------------------------------
// Bridge loop
// ---------------------------------------------------------------------------

/// Run until `cancel` fires.  Broker errors are logged and retried; they
/// never stop the controller.
pub async fn run(hub: Hub, settings: MqttSettings, cancel: CancellationToken) {
    let topics = Topics::new(&settings.prefix);

    let mut opts = MqttOptions::new(CLIENT_ID, settings.host.clone(), settings.port);
    opts.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(opts, 20);

    let mut broadcasts = hub.subscribe();
    info!(
        host = %settings.host,
        port = settings.port,
        prefix = %settings.prefix,
        "mqtt bridge started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = client.try_disconnect();
                info!("mqtt bridge stopped");
                break;
            }

            outgoing = broadcasts.recv() => match outgoing {
                Ok(msg) => {
                    if let Err(e) = client.try_publish(&topics.state, QoS::AtMostOnce, false, msg) {
                        debug!("mqtt state publish dropped: {e}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "mqtt bridge skipped broadcasts")
                }
                Err(RecvError::Closed) => break,
            },

            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("mqtt connected");
                    if let Err(e) = client.try_subscribe(&topics.cmd, QoS::AtLeastOnce) {
                        warn!("mqtt subscribe {} failed: {e}", topics.cmd);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    if p.topic != topics.cmd {
                        debug!(topic = %p.topic, "unhandled topic");
                        continue;
                    }
                    if let Some(reply) = hub.dispatch(&p.payload).await {
                        let reply_topic = &topics.reply;
                        if let Err(e) =
                            client.try_publish(reply_topic, QoS::AtLeastOnce, false, reply)
                        {
                            debug!("mqtt reply dropped: {e}");
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => warn!("mqtt disconnected"),
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt error: {e}. reconnecting...");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(RECONNECT_DELAY) => {}
                    }
                }
            },
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn bridge_disabled_without_host() {
        assert_eq!(MqttSettings::from_lookup(lookup(&[])), None);
        assert_eq!(MqttSettings::from_lookup(lookup(&[("MQTT_HOST", " ")])), None);
    }

    #[test]
    fn defaults_port_and_prefix() {
        let s = MqttSettings::from_lookup(lookup(&[("MQTT_HOST", "broker.local")])).unwrap();
        assert_eq!(s.port, 1883);
        assert_eq!(s.prefix, "irrigation");
    }

    #[test]
    fn custom_port_and_prefix_trimmed() {
        let s = MqttSettings::from_lookup(lookup(&[
            ("MQTT_HOST", "10.0.0.2"),
            ("MQTT_PORT", "8883"),
            ("MQTT_PREFIX", "greenhouse/bed-1/"),
        ]))
        .unwrap();
        assert_eq!(s.port, 8883);
        assert_eq!(s.prefix, "greenhouse/bed-1");
    }

    #[test]
    fn bad_port_falls_back() {
        let s = MqttSettings::from_lookup(lookup(&[("MQTT_HOST", "h"), ("MQTT_PORT", "abc")]))
            .unwrap();
        assert_eq!(s.port, 1883);
    }

    #[test]
    fn topics_from_prefix() {
        let t = Topics::new("irrigation");
        assert_eq!(t.cmd, "irrigation/cmd");
        assert_eq!(t.state, "irrigation/state");
        assert_eq!(t.reply, "irrigation/reply");
    }
}
