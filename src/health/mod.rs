//! Safety monitoring
//!
//! This module runs the supervision loop that keeps an eye on the pump and the
//! gauge while nobody is watching, and stops itself the moment either one looks
//! wrong or stops answering.

pub mod monitor;
pub mod policy;

pub use monitor::{clamp_period, MonitorState, SafetyMonitor, StopReason, MIN_PERIOD};
pub use policy::HealthPolicy;
