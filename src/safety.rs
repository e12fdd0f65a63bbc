//! Safety supervisor.
//!
//! Runs **after every decision and every actuation** and accumulates a
//! fault bitmask that the state feed publishes.  The control loop asks it
//! whether actuator failures have escalated far enough to halt actuation.
//!
//! ## Fault lifecycle
//!
//! 1. A condition triggers a fault (e.g. the moisture sensor goes stale).
//! 2. The supervisor sets the corresponding bit and logs the edge.
//! 3. When the condition clears on a later cycle, the bit is cleared and
//!    that edge is logged too.
//! 4. `ActuatorUnresponsive` is the exception: once set, the loop halts and
//!    nothing clears it for the rest of the process lifetime.
//!
//! Multiple faults may be active at once.

use log::{error, info};

use crate::config::ActuatorSpec;
use crate::control::policy::{Decision, DecisionReason};
use crate::error::SafetyFault;

/// Safety supervisor.
pub struct SafetySupervisor {
    /// Unconfirmed commands tolerated before escalation.
    max_consecutive_failures: u32,
    /// Latched fault bitmask.
    faults: u8,
}

impl SafetySupervisor {
    pub fn new(actuator: &ActuatorSpec) -> Self {
        Self {
            max_consecutive_failures: actuator.max_consecutive_failures,
            faults: 0,
        }
    }

    /// Fold one policy decision into the fault mask.
    pub fn observe_decision(&mut self, decision: &Decision) -> u8 {
        // ── Sensor trust ──────────────────────────────────────────
        self.eval_fault(SafetyFault::MoistureUntrusted, decision.degraded);

        // ── Runaway cutoff ────────────────────────────────────────
        self.eval_fault(
            SafetyFault::RunawayCutoff,
            decision.reason == DecisionReason::SafetyCutoff,
        );

        self.faults
    }

    /// Fold the outcome of an actuation into the fault mask.
    ///
    /// `consecutive_failures` is the failure count *after* this attempt.
    /// Returns `true` when the failures have gone past the ceiling and
    /// actuation must halt.
    pub fn observe_actuation(&mut self, consecutive_failures: u32) -> bool {
        self.eval_fault(SafetyFault::ActuatorFailing, consecutive_failures > 0);

        let escalate = consecutive_failures > self.max_consecutive_failures;
        if escalate {
            self.eval_fault(SafetyFault::ActuatorUnresponsive, true);
        }
        escalate
    }

    /// Current fault bitmask.
    pub fn faults(&self) -> u8 {
        self.faults
    }

    /// True if **any** fault is active.
    pub fn has_faults(&self) -> bool {
        self.faults != 0
    }

    /// Check if a specific fault is active.
    pub fn has_fault(&self, fault: SafetyFault) -> bool {
        self.faults & fault.mask() != 0
    }

    // ── Internal ──────────────────────────────────────────────────

    /// Set or clear a fault bit based on a boolean condition.
    fn eval_fault(&mut self, fault: SafetyFault, condition: bool) {
        if condition {
            if self.faults & fault.mask() == 0 {
                error!("SAFETY FAULT SET: {fault}");
            }
            self.faults |= fault.mask();
        } else {
            if self.faults & fault.mask() != 0 {
                info!("SAFETY FAULT CLEARED: {fault}");
            }
            self.faults &= !fault.mask();
        }
    }
}
