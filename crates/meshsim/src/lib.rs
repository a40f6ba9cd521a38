//! meshsim - in-process gossip mesh simulation
//!
//! Wires a line of peers together over in-memory streams, gossips a
//! grow-only entry set between them and reports whether they converge.

pub mod config;
pub mod entries;
pub mod sim;

pub use config::Config;
pub use entries::{EntryGossiper, EntrySet};
pub use sim::{SimError, SimReport, Simulation};
