//! Greenhouse monitor and irrigation controller.
//!
//! Polls heterogeneous sensors on independent cadences, keeps the latest
//! reading of each in a shared store, and drives one irrigation pump from a
//! hysteresis policy with dwell times and a runaway cutoff.  The binary in
//! `main.rs` wires the real adapters; everything here runs against mocks.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod control;
pub mod drivers;
pub mod error;
pub mod fsm;
pub mod measurement;
pub mod safety;
pub mod scheduler;
pub mod sensors;
pub mod state_store;

pub use error::{Error, Result};
