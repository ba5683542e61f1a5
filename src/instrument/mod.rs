//! Device drivers
//!
//! - [`pump`]: roughing pump controller (`?`/`!` command protocol)
//! - [`gauge`]: pressure gauge (telegram protocol)
//! - [`status_word`]: bit tables shared by the pump decoders

pub mod gauge;
pub mod pump;
pub mod status_word;

pub use gauge::GaugeDriver;
pub use pump::{PumpCommand, PumpDriver, QuickStatus};
