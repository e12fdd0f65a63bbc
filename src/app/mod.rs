//! Application core.
//!
//! The control loop, the events it emits and the state feed it publishes.
//! All interaction with hardware happens through the **port traits** in
//! [`ports`], so this layer runs unchanged against mocks.

pub mod control_loop;
pub mod events;
pub mod feed;
pub mod ports;

pub use control_loop::ControlLoop;
pub use events::AppEvent;
pub use feed::StateFeed;
