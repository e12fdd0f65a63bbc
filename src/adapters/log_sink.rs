//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing every application event as one
//! structured log line.  Per-reading and per-decision lines go to `debug`
//! so a default `info` run only shows pump activity and lifecycle.

use log::{debug, error, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started {
                at,
                sensors,
                actuator,
            } => {
                info!("START | t={at} | sensors={sensors} pump={actuator}");
            }
            AppEvent::Measurement(m) => {
                debug!("MEAS  | t={} | {m}", m.timestamp);
            }
            AppEvent::Decision { at, decision } => {
                debug!(
                    "DECIDE| t={at} | {:?} ({}) | moisture={} | degraded={}",
                    decision.command,
                    decision.reason,
                    decision
                        .moisture
                        .map_or_else(|| "-".to_string(), |m| format!("{m:.1}%")),
                    decision.degraded,
                );
            }
            AppEvent::ActuatorApplied {
                at,
                actuator,
                state,
            } => {
                info!("PUMP  | t={at} | {actuator} -> {state}");
            }
            AppEvent::ActuatorFailed {
                at,
                actuator,
                target,
                error,
                consecutive,
            } => {
                warn!("PUMP  | t={at} | {actuator} -> {target} FAILED ({error}) x{consecutive}");
            }
            AppEvent::DegradedChanged { at, degraded } => {
                info!("MODE  | t={at} | degraded={degraded}");
            }
            AppEvent::FaultsChanged { at, faults } => {
                info!("FAULT | t={at} | flags=0b{faults:08b}");
            }
            AppEvent::Halted { at, reason } => {
                error!("HALT  | t={at} | {reason}");
            }
            AppEvent::Stopped { at, actuator } => {
                info!(
                    "STOP  | t={at} | {} {} (unconfirmed={})",
                    actuator.actuator_id, actuator.commanded, actuator.consecutive_command_count
                );
            }
        }
    }
}
