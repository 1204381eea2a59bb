//! Control events emitted by the decision engine.
//!
//! These are the operator-facing records (what was switched and why); they are
//! distinct from the diagnostic `tracing` output.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use strum::{Display, EnumString};
use tracing::{error, info, warn};

use crate::domain::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    ControlDecision {
        at: DateTime<Utc>,
        device: Device,
        action: String,
        reason: String,
        success: bool,
        extra: Value,
    },
    DeviceStateChange {
        at: DateTime<Utc>,
        device: Device,
        old_state: bool,
        new_state: bool,
    },
    SystemEvent {
        at: DateTime<Utc>,
        level: EventLevel,
        source: String,
        message: String,
    },
}

impl ControlEvent {
    /// Decision time supplied by the emitter's clock.
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            ControlEvent::ControlDecision { at, .. }
            | ControlEvent::DeviceStateChange { at, .. }
            | ControlEvent::SystemEvent { at, .. } => *at,
        }
    }
}

/// Destination for control events. Callers stamp each event with their own
/// clock reading.
pub trait EventSink: Send + Sync {
    fn record(&self, event: ControlEvent);

    fn control_decision(
        &self,
        at: DateTime<Utc>,
        device: Device,
        action: &str,
        reason: &str,
        success: bool,
        extra: Value,
    ) {
        self.record(ControlEvent::ControlDecision {
            at,
            device,
            action: action.to_string(),
            reason: reason.to_string(),
            success,
            extra,
        });
    }

    fn device_state_change(&self, at: DateTime<Utc>, device: Device, old_state: bool, new_state: bool) {
        self.record(ControlEvent::DeviceStateChange {
            at,
            device,
            old_state,
            new_state,
        });
    }

    fn system_event(&self, at: DateTime<Utc>, level: EventLevel, source: &str, message: &str) {
        self.record(ControlEvent::SystemEvent {
            at,
            level,
            source: source.to_string(),
            message: message.to_string(),
        });
    }
}

/// Writes every event as a structured record under the `events` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn record(&self, event: ControlEvent) {
        match event {
            ControlEvent::ControlDecision {
                device,
                action,
                reason,
                success,
                extra,
                ..
            } => {
                info!(target: "events", %device, %action, %reason, success, %extra, "control decision");
            }
            ControlEvent::DeviceStateChange {
                device,
                old_state,
                new_state,
                ..
            } => {
                info!(target: "events", %device, old_state, new_state, "device state change");
            }
            ControlEvent::SystemEvent {
                level,
                source,
                message,
                ..
            } => match level {
                EventLevel::Info => info!(target: "events", %source, "{message}"),
                EventLevel::Warning => warn!(target: "events", %source, "{message}"),
                EventLevel::Error => error!(target: "events", %source, "{message}"),
            },
        }
    }
}

/// Bounded in-memory history of recent events.
#[derive(Debug)]
pub struct MemoryEventSink {
    events: Mutex<VecDeque<ControlEvent>>,
    capacity: usize,
}

impl MemoryEventSink {
    pub const DEFAULT_CAPACITY: usize = 500;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn events(&self) -> Vec<ControlEvent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Control decisions for `device`, as (action, reason) pairs.
    pub fn decisions(&self, device: Device) -> Vec<(String, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ControlEvent::ControlDecision {
                    device: d,
                    action,
                    reason,
                    ..
                } if *d == device => Some((action.clone(), reason.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn state_changes(&self, device: Device) -> Vec<(bool, bool)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ControlEvent::DeviceStateChange {
                    device: d,
                    old_state,
                    new_state,
                    ..
                } if *d == device => Some((*old_state, *new_state)),
                _ => None,
            })
            .collect()
    }

    /// System events at `level`, as (source, message) pairs.
    pub fn system_events(&self, level: EventLevel) -> Vec<(String, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ControlEvent::SystemEvent {
                    level: l,
                    source,
                    message,
                    ..
                } if *l == level => Some((source.clone(), message.clone())),
                _ => None,
            })
            .collect()
    }
}

impl Default for MemoryEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MemoryEventSink {
    fn record(&self, event: ControlEvent) {
        let mut events = self.events.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Sends every event to several sinks.
pub struct FanoutEventSink {
    sinks: Vec<std::sync::Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new(sinks: Vec<std::sync::Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutEventSink {
    fn record(&self, event: ControlEvent) {
        for sink in &self.sinks {
            sink.record(event.clone());
        }
    }
}
