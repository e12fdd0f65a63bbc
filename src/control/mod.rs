//! Irrigation decision logic: the hysteresis policy and the actuator state
//! it reads.

pub mod policy;
pub mod state;

pub use policy::{Command, ControlPolicy, Decision, DecisionReason};
pub use state::{ActuatorState, Switch};
