use chrono::{DateTime, TimeDelta, Utc};
use dashmap::{DashMap, DashSet};
use tracing::{debug, warn};

use crate::limits::{LIVENESS_FORGET_AFTER_TIMEOUTS, MAX_TRACKED_DEVICES};

/// When a silent device is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AlertPolicy {
    /// Once per sweep for as long as the device stays silent.
    #[default]
    EverySweep,
    /// Once per silence; a new sample re-arms the alert.
    OnTransition,
}

impl std::str::FromStr for AlertPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "every-sweep" => Ok(Self::EverySweep),
            "on-transition" => Ok(Self::OnTransition),
            other => Err(format!("unknown alert mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SilentDevice {
    pub device_id: String,
    pub last_seen: DateTime<Utc>,
}

/// Last time each device was heard from. In memory only.
///
/// Bounded: at most `MAX_TRACKED_DEVICES` entries, and a device silent for
/// `LIVENESS_FORGET_AFTER_TIMEOUTS` timeouts is dropped by the next sweep.
#[derive(Default)]
pub struct LivenessTracker {
    last_seen: DashMap<String, DateTime<Utc>>,
    alerted: DashSet<String>,
    policy: AlertPolicy,
}

impl LivenessTracker {
    pub fn new(policy: AlertPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn touch(&self, device_id: &str, now: DateTime<Utc>) {
        if !self.last_seen.contains_key(device_id) && self.last_seen.len() >= MAX_TRACKED_DEVICES {
            self.evict_stalest();
        }
        self.last_seen.insert(device_id.to_string(), now);
        self.alerted.remove(device_id);
    }

    fn evict_stalest(&self) {
        let stalest = self
            .last_seen
            .iter()
            .min_by_key(|e| *e.value())
            .map(|e| e.key().clone());
        if let Some(id) = stalest {
            warn!("liveness tracker full, forgetting device {id}");
            self.forget(&id);
        }
    }

    fn forget(&self, device_id: &str) {
        self.last_seen.remove(device_id);
        self.alerted.remove(device_id);
    }

    pub fn last_seen(&self, device_id: &str) -> Option<DateTime<Utc>> {
        self.last_seen.get(device_id).map(|t| *t)
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }

    /// Devices silent for longer than `timeout`, ordered by id. Devices gone
    /// quiet for far longer are forgotten instead of reported.
    pub fn sweep(&self, now: DateTime<Utc>, timeout: TimeDelta) -> Vec<SilentDevice> {
        if let Some(forget_after) = timeout.checked_mul(LIVENESS_FORGET_AFTER_TIMEOUTS) {
            let gone: Vec<String> = self
                .last_seen
                .iter()
                .filter(|e| now - *e.value() > forget_after)
                .map(|e| e.key().clone())
                .collect();
            for id in gone {
                debug!("forgetting long-silent device {id}");
                self.forget(&id);
            }
        }
        let mut silent: Vec<SilentDevice> = self
            .last_seen
            .iter()
            .filter(|e| now - *e.value() > timeout)
            .map(|e| SilentDevice {
                device_id: e.key().clone(),
                last_seen: *e.value(),
            })
            .collect();
        if self.policy == AlertPolicy::OnTransition {
            silent.retain(|d| self.alerted.insert(d.device_id.clone()));
        }
        silent.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        silent
    }
}
