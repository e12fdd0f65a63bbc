//! Read-only state feed for display and plotting consumers.
//!
//! The control loop publishes into it after every tick; a GUI thread holds a
//! clone and polls whenever it redraws.  Readers never block the loop for
//! longer than one clone of the actuator state.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::control::state::ActuatorState;
use crate::fsm::LoopPhase;
use crate::state_store::{EnvironmentSnapshot, StateStore};

struct Shared {
    store: Arc<StateStore>,
    actuator: Mutex<ActuatorState>,
    phase: AtomicU8,
    faults: AtomicU8,
}

/// Cloneable handle on the live system state.
#[derive(Clone)]
pub struct StateFeed {
    shared: Arc<Shared>,
}

impl StateFeed {
    pub(crate) fn new(store: Arc<StateStore>, actuator: ActuatorState) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                actuator: Mutex::new(actuator),
                phase: AtomicU8::new(LoopPhase::Idle as u8),
                faults: AtomicU8::new(0),
            }),
        }
    }

    /// Latest measurement of every sensor read so far.
    pub fn snapshot(&self) -> EnvironmentSnapshot {
        self.shared.store.snapshot()
    }

    pub fn actuator_state(&self) -> ActuatorState {
        self.shared
            .actuator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn phase(&self) -> LoopPhase {
        LoopPhase::from_index(usize::from(self.shared.phase.load(Ordering::Acquire)))
    }

    /// Safety fault bitmask (see [`SafetyFault`](crate::error::SafetyFault)).
    pub fn fault_flags(&self) -> u8 {
        self.shared.faults.load(Ordering::Acquire)
    }

    pub fn is_degraded(&self) -> bool {
        self.shared
            .actuator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .degraded
    }

    pub fn is_halted(&self) -> bool {
        self.phase() == LoopPhase::Halted
    }

    pub(crate) fn publish(&self, phase: LoopPhase, faults: u8, actuator: &ActuatorState) {
        {
            let mut slot = self
                .shared
                .actuator
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *slot != *actuator {
                slot.clone_from(actuator);
            }
        }
        self.shared.faults.store(faults, Ordering::Release);
        self.shared.phase.store(phase as u8, Ordering::Release);
    }
}
