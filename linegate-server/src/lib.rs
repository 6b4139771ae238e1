//! linegate-server: the running controller
//!
//! [`ControlLoop`] owns the PLC gateway and drives everything from one
//! tokio task. [`ConfigWatcher`] feeds it reloaded configuration and
//! [`EventBus`] carries status out to whoever is listening.

pub mod config_manager;
pub mod controller;
pub mod events;

pub use config_manager::ConfigWatcher;
pub use controller::{modbus_transports, ControlLoop, LoopStats, TickReport, TransportFactory};
pub use events::{ControlEvent, EventBus};
