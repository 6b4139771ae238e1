//! Diagnostic register poller
//!
//! Reads a fixed set of registers on its own transport. It never shares a
//! session or cooldown state with the gateway, so it is safe to run next to
//! a live controller.

use crate::error::PlcError;
use crate::transport::RegisterTransport;
use linegate_core::{LineConfig, SignalClass};
use serde::Serialize;
use tracing::warn;

/// One polled register
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterReading {
    pub name: String,
    pub address: u16,
    /// `None` when the read failed
    pub value: Option<u16>,
}

pub struct RegisterMonitor {
    transport: Box<dyn RegisterTransport>,
    registers: Vec<(String, u16)>,
}

impl RegisterMonitor {
    pub fn new(transport: Box<dyn RegisterTransport>, registers: Vec<(String, u16)>) -> Self {
        Self { transport, registers }
    }

    /// Line status, enable register and every wired signal address
    pub fn registers_for(config: &LineConfig) -> Vec<(String, u16)> {
        let mut registers = vec![("line_status".to_string(), config.line.status_register)];
        if let Some(address) = config.plc.enable_register {
            registers.push(("signal_enable".to_string(), address));
        }
        for class in SignalClass::ALL {
            if let Some(address) = config.signals.get(class).address {
                registers.push((class.display_name().to_string(), address));
            }
        }
        registers
    }

    pub fn registers(&self) -> &[(String, u16)] {
        &self.registers
    }

    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    pub async fn connect(&mut self) -> Result<(), PlcError> {
        self.transport.connect().await
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Read every register once; individual failures become `None`
    pub async fn poll_once(&mut self) -> Vec<RegisterReading> {
        let mut readings = Vec::with_capacity(self.registers.len());
        for (name, address) in &self.registers {
            let value = if self.transport.is_connected() {
                match self.transport.read_holding_register(*address).await {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!("Monitor read of {} ({}) failed: {}", name, address, e);
                        None
                    }
                }
            } else {
                None
            };
            readings.push(RegisterReading {
                name: name.clone(),
                address: *address,
                value,
            });
        }
        readings
    }

    pub async fn close(&mut self) {
        if let Err(e) = self.transport.disconnect().await {
            warn!("Monitor disconnect failed: {}", e);
        }
    }
}
