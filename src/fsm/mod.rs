//! Control-loop phase machine.
//!
//! Every tick walks the same cycle; a fatal actuator error leaves it in the
//! terminal `Halted` phase, where observation continues and actuation stops.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  PhaseTable                                              │
//! │  ┌───────────┬─────────────────────────────────────┐     │
//! │  │ LoopPhase │ may move to                         │     │
//! │  ├───────────┼─────────────────────────────────────┤     │
//! │  │ Idle      │ Polling, Halted                     │     │
//! │  │ Polling   │ Deciding, Halted                    │     │
//! │  │ Deciding  │ Actuating, Idle, Halted             │     │
//! │  │ Actuating │ Idle, Halted                        │     │
//! │  │ Halted    │ (none)                              │     │
//! │  └───────────┴─────────────────────────────────────┘     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! `Deciding → Idle` is the cycle where the policy asked for no change.

use log::{debug, error};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Phase identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LoopPhase {
    Idle = 0,
    Polling = 1,
    Deciding = 2,
    Actuating = 3,
    Halted = 4,
}

impl LoopPhase {
    /// Total number of phases, used to size the table array.
    pub const COUNT: usize = 5;

    /// Convert a `u8` index back to `LoopPhase`.  Panics on out-of-range in
    /// debug builds; returns `Halted` in release.
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::Idle,
            1 => Self::Polling,
            2 => Self::Deciding,
            3 => Self::Actuating,
            4 => Self::Halted,
            _ => {
                debug_assert!(false, "invalid phase index: {idx}");
                Self::Halted
            }
        }
    }

    pub const fn name(self) -> &'static str {
        PHASE_TABLE[self as usize].name
    }
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

/// Static descriptor for one phase.
pub struct PhaseDescriptor {
    pub id: LoopPhase,
    pub name: &'static str,
    pub next: &'static [LoopPhase],
}

/// Indexed by `LoopPhase as usize`.
pub const PHASE_TABLE: [PhaseDescriptor; LoopPhase::COUNT] = [
    PhaseDescriptor {
        id: LoopPhase::Idle,
        name: "Idle",
        next: &[LoopPhase::Polling, LoopPhase::Halted],
    },
    PhaseDescriptor {
        id: LoopPhase::Polling,
        name: "Polling",
        next: &[LoopPhase::Deciding, LoopPhase::Halted],
    },
    PhaseDescriptor {
        id: LoopPhase::Deciding,
        name: "Deciding",
        next: &[LoopPhase::Actuating, LoopPhase::Idle, LoopPhase::Halted],
    },
    PhaseDescriptor {
        id: LoopPhase::Actuating,
        name: "Actuating",
        next: &[LoopPhase::Idle, LoopPhase::Halted],
    },
    PhaseDescriptor {
        id: LoopPhase::Halted,
        name: "Halted",
        next: &[],
    },
];

/// Whether the table allows `from → to`.
pub fn is_allowed(from: LoopPhase, to: LoopPhase) -> bool {
    PHASE_TABLE[from as usize].next.contains(&to)
}

// ---------------------------------------------------------------------------
// Phase machine
// ---------------------------------------------------------------------------

pub struct PhaseMachine {
    current: LoopPhase,
    /// Completed `Idle → … → Idle` cycles.
    cycles: u64,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            current: LoopPhase::Idle,
            cycles: 0,
        }
    }

    pub fn current(&self) -> LoopPhase {
        self.current
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn is_halted(&self) -> bool {
        self.current == LoopPhase::Halted
    }

    /// Move to `next`.  Returns `false` (and leaves the phase unchanged) for
    /// a transition the table does not allow; that is a defect and asserts
    /// in debug builds.
    pub fn transition(&mut self, next: LoopPhase) -> bool {
        if !is_allowed(self.current, next) {
            error!(
                "Phase transition {} -> {} not allowed",
                self.current.name(),
                next.name()
            );
            debug_assert!(false, "illegal phase transition {:?} -> {:?}", self.current, next);
            return false;
        }
        debug!("Phase: {} -> {}", self.current.name(), next.name());
        if next == LoopPhase::Idle {
            self.cycles += 1;
        }
        self.current = next;
        true
    }
}
