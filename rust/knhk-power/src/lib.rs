//! Periodic power/thermal sampling with threshold triggers, plus a
//! range-measurement energy monitor extension.

pub mod energy;
pub mod error;
pub mod monitor;
pub mod trigger;

pub use energy::{EnergyMonitor, EnergySource};
pub use error::{PowerError, Result};
pub use monitor::{PowerMonitor, PowerSource, TriggerAction};
pub use trigger::{Trigger, TriggerKind};
