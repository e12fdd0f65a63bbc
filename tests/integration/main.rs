//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that exercises one subsystem against
//! mock adapters.  Everything runs on the host with no real hardware;
//! `wiring_tests` lays out device and sysfs trees in a temp directory.

mod control_loop_tests;
mod mock_hw;
mod scheduler_tests;
mod wiring_tests;
