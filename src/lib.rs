//! Core library for the roughd daemon.
//!
//! This library contains the device transports, the pump and gauge drivers,
//! and the safety monitor that supervises them. It is used by the `roughd`
//! binary and by the integration tests.

pub mod adapters;
pub mod config;
pub mod error;
pub mod health;
pub mod instrument;
pub mod observation;
