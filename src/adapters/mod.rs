//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter     | Implements | Connects to                     |
//! |-------------|------------|---------------------------------|
//! | `log_sink`  | EventSink  | `log` facade                    |
//! | `telemetry` | EventSink  | JSON-lines file (writer thread) |
//! | `time`      | Clock      | `std::time::Instant`            |
//! |             | DelayNs    | `thread::sleep`                 |

pub mod log_sink;
pub mod telemetry;
pub mod time;
