//! linegate-plc: everything that touches the PLC
//!
//! The [`PlcGateway`] is the only component allowed to write registers.
//! It sits on top of a [`RegisterTransport`] (Modbus TCP in production,
//! [`InMemoryTransport`] for tests and dry runs) and enforces the safety
//! gates in front of every pulse. The two debounce machines,
//! [`LineStateMachine`] and [`OperatorSafetyMachine`], are pure and only
//! return the actions the caller must apply to the gateway.

pub mod error;
pub mod gateway;
pub mod line_state;
pub mod monitor;
pub mod operator_safety;
pub mod sim;
pub mod transport;

pub use error::PlcError;
pub use gateway::{CooldownKey, GatewayStatus, PlcGateway, PulseOutcome, PulseRequest};
pub use line_state::{LineAction, LinePhase, LineStateMachine};
pub use linegate_core::ReleasePolicy;
pub use monitor::{RegisterMonitor, RegisterReading};
pub use operator_safety::{OperatorSafetyMachine, SafetyAction, SafetyPhase};
pub use sim::{InMemoryTransport, SimulatedPlc, WriteRecord};
pub use transport::{ModbusTcpTransport, RegisterTransport};
