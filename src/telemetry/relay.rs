use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::json;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use super::decode::{decode, DecodeError};
use super::liveness::{AlertPolicy, LivenessTracker, SilentDevice};
use super::transport::{PubSub, TransportError};
use crate::engine::Engine;
use crate::gateway::{event, room, Envelope, Fanout};
use crate::limits::MAX_DEVICE_ID_LEN;
use crate::model::PositionSample;
use crate::observability::{LIVENESS_ALERTS_TOTAL, TELEMETRY_MESSAGES_TOTAL};

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub inbound_topic: String,
    pub liveness_timeout: TimeDelta,
    pub sweep_period: Duration,
    pub alert_policy: AlertPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            inbound_topic: "locationUpdate".into(),
            liveness_timeout: TimeDelta::minutes(3),
            sweep_period: Duration::from_secs(60),
            alert_policy: AlertPolicy::EverySweep,
        }
    }
}

/// Device side of the system: position ingest, silence detection and
/// commands back to devices.
pub struct Relay {
    transport: Arc<dyn PubSub>,
    /// Set when positions should be linked to ongoing reservations.
    engine: Option<Arc<Engine>>,
    liveness: LivenessTracker,
    fanout: Fanout,
    config: RelayConfig,
}

impl Relay {
    pub fn new(
        transport: Arc<dyn PubSub>,
        engine: Option<Arc<Engine>>,
        fanout: Fanout,
        config: RelayConfig,
    ) -> Self {
        Self {
            liveness: LivenessTracker::new(config.alert_policy),
            transport,
            engine,
            fanout,
            config,
        }
    }

    pub fn liveness(&self) -> &LivenessTracker {
        &self.liveness
    }

    pub fn inbound_topic(&self) -> &str {
        &self.config.inbound_topic
    }

    /// Publish raw device bytes onto the inbound topic, for devices that
    /// reach us over HTTP instead of the broker.
    pub async fn ingest_raw(&self, payload: Bytes) -> Result<(), TransportError> {
        self.transport.publish(&self.config.inbound_topic, payload).await
    }

    /// Process one inbound payload. Malformed input is counted, logged and
    /// returned as an error; it never stops the listener.
    pub async fn handle_message(
        &self,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<PositionSample, DecodeError> {
        let sample = match decode(payload, now) {
            Ok(s) => s,
            Err(e) => {
                metrics::counter!(TELEMETRY_MESSAGES_TOTAL, "outcome" => "malformed").increment(1);
                warn!("dropping telemetry message: {e}");
                return Err(e);
            }
        };
        metrics::counter!(TELEMETRY_MESSAGES_TOTAL, "outcome" => "accepted").increment(1);
        self.liveness.touch(&sample.device_id, now);

        let update = Envelope::new(
            event::LOCATION_UPDATE,
            json!({
                "type": event::LOCATION_UPDATE,
                "carID": sample.device_id,
                "latitude": sample.latitude,
                "longitude": sample.longitude,
                "status": sample.status,
                "timestamp": sample.recorded_at,
            }),
        );
        self.fanout.send(room::resource(&sample.device_id), update.clone());
        self.fanout.send(room::ADMIN, update);

        if let Some(engine) = &self.engine {
            // Devices that are not keyed by a vehicle id are relayed only.
            if let Ok(vehicle_id) = Ulid::from_string(&sample.device_id) {
                match engine.record_position(vehicle_id, sample.clone()).await {
                    Ok(Some(reservation_id)) => {
                        debug!("position for {vehicle_id} linked to {reservation_id}")
                    }
                    Ok(None) => {}
                    Err(e) => error!("failed to record position for {vehicle_id}: {e}"),
                }
            }
        }
        Ok(sample)
    }

    /// Alert on every device silent past the timeout. Returns the number of
    /// alerts sent.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let silent = self.liveness.sweep(now, self.config.liveness_timeout);
        let threshold = describe_timeout(self.config.liveness_timeout);
        for SilentDevice { device_id, last_seen } in &silent {
            warn!("device {device_id} silent since {last_seen}");
            let alert = Envelope::new(
                event::CAR_INACTIVE,
                json!({
                    "type": event::CAR_INACTIVE,
                    "carID": device_id,
                    "lastSeen": last_seen,
                    "message": format!(
                        "Car {device_id} has not sent location data for more than {threshold}"
                    ),
                }),
            );
            self.fanout.send(room::ADMIN, alert);
        }
        metrics::counter!(LIVENESS_ALERTS_TOTAL).increment(silent.len() as u64);
        silent.len()
    }

    /// Fire-and-forget ring command to one device.
    pub async fn ring_resource(&self, resource_id: &str) -> Result<(), TransportError> {
        let id = resource_id.trim();
        if id.is_empty() || id.len() > MAX_DEVICE_ID_LEN {
            return Err(TransportError::InvalidTopic(format!("Ring_{id}")));
        }
        let payload = Bytes::from(json!({ "action": "ring" }).to_string());
        self.transport.publish(&format!("Ring_{id}"), payload).await?;
        info!("ring sent to {id}");
        Ok(())
    }

    /// Listener task: drain the inbound topic until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut subscription = match self.transport.subscribe(&self.config.inbound_topic).await {
            Ok(s) => s,
            Err(e) => {
                error!("telemetry subscribe to {} failed: {e}", self.config.inbound_topic);
                return;
            }
        };
        info!("telemetry listening on {}", subscription.topic());
        loop {
            let payload = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = subscription.recv() => match msg {
                    Some(p) => p,
                    None => {
                        warn!("telemetry transport closed");
                        break;
                    }
                },
            };
            // Errors are already logged and counted.
            let _ = self.handle_message(&payload, Utc::now()).await;
        }
        info!("telemetry listener stopped");
    }

    /// Liveness sweep task.
    pub async fn run_liveness_sweep(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sweep_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let alerts = self.sweep(Utc::now());
            if alerts > 0 {
                debug!("liveness sweep raised {alerts} alerts");
            }
        }
        info!("liveness sweep stopped");
    }
}

fn describe_timeout(timeout: TimeDelta) -> String {
    let secs = timeout.num_seconds();
    match secs {
        60 => "1 minute".to_string(),
        s if s % 60 == 0 => format!("{} minutes", s / 60),
        s => format!("{s} seconds"),
    }
}
