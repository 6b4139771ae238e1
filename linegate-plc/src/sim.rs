//! In-memory PLC for tests and dry runs

use crate::error::PlcError;
use crate::transport::RegisterTransport;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::Instant;

/// A register write the simulated device accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    pub address: u16,
    pub value: u16,
    pub at: Instant,
}

#[derive(Debug)]
struct DeviceState {
    registers: HashMap<u16, u16>,
    writes: Vec<WriteRecord>,
    reads: usize,
    reachable: bool,
    failing_reads: HashSet<u16>,
    failing_writes: HashSet<u16>,
    failing_resets: HashSet<u16>,
}

/// Handle on a simulated device. Clones share the same register bank, so a
/// test can keep one while the gateway owns a transport built from another.
#[derive(Debug, Clone)]
pub struct SimulatedPlc {
    state: Arc<Mutex<DeviceState>>,
}

impl Default for SimulatedPlc {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPlc {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                registers: HashMap::new(),
                writes: Vec::new(),
                reads: 0,
                reachable: true,
                failing_reads: HashSet::new(),
                failing_writes: HashSet::new(),
                failing_resets: HashSet::new(),
            })),
        }
    }

    /// New transport talking to this device
    pub fn transport(&self) -> InMemoryTransport {
        InMemoryTransport {
            device: self.clone(),
            connected: false,
        }
    }

    pub fn set_register(&self, address: u16, value: u16) {
        self.state.lock().registers.insert(address, value);
    }

    pub fn register(&self, address: u16) -> u16 {
        self.state.lock().registers.get(&address).copied().unwrap_or(0)
    }

    /// Simulate the device going off the network (open sessions break on next I/O)
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Make reads of `address` answer with a device exception
    pub fn fail_reads(&self, address: u16, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing_reads.insert(address);
        } else {
            state.failing_reads.remove(&address);
        }
    }

    /// Make writes to `address` answer with a device exception
    pub fn fail_writes(&self, address: u16, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing_writes.insert(address);
        } else {
            state.failing_writes.remove(&address);
        }
    }

    /// Make writes of 0 to `address` fail, leaving the register high
    pub fn fail_resets(&self, address: u16, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing_resets.insert(address);
        } else {
            state.failing_resets.remove(&address);
        }
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().writes.clone()
    }

    pub fn writes_to(&self, address: u16) -> Vec<WriteRecord> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|w| w.address == address)
            .copied()
            .collect()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    pub fn read_count(&self) -> usize {
        self.state.lock().reads
    }
}

/// [`RegisterTransport`] over a [`SimulatedPlc`]
#[derive(Debug)]
pub struct InMemoryTransport {
    device: SimulatedPlc,
    connected: bool,
}

impl InMemoryTransport {
    fn check_session(&mut self) -> Result<(), PlcError> {
        if !self.connected {
            return Err(PlcError::NotConnected);
        }
        if !self.device.state.lock().reachable {
            self.connected = false;
            return Err(PlcError::Transport("connection reset by peer".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RegisterTransport for InMemoryTransport {
    fn endpoint(&self) -> String {
        "simulated".to_string()
    }

    async fn connect(&mut self) -> Result<(), PlcError> {
        if !self.device.state.lock().reachable {
            self.connected = false;
            return Err(PlcError::Transport("connection refused".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), PlcError> {
        self.connected = false;
        Ok(())
    }

    async fn read_holding_register(&mut self, address: u16) -> Result<u16, PlcError> {
        self.check_session()?;
        let mut state = self.device.state.lock();
        state.reads += 1;
        if state.failing_reads.contains(&address) {
            return Err(PlcError::Protocol {
                address,
                reason: "IllegalDataAddress".to_string(),
            });
        }
        Ok(state.registers.get(&address).copied().unwrap_or(0))
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), PlcError> {
        self.check_session()?;
        let mut state = self.device.state.lock();
        if state.failing_writes.contains(&address)
            || (value == 0 && state.failing_resets.contains(&address))
        {
            return Err(PlcError::Protocol {
                address,
                reason: "SlaveDeviceFailure".to_string(),
            });
        }
        state.registers.insert(address, value);
        state.writes.push(WriteRecord {
            address,
            value,
            at: Instant::now(),
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;

    #[test]
    fn test_shared_register_bank() {
        let plc = SimulatedPlc::new();
        let mut transport = plc.transport();
        plc.set_register(10204, 1);

        block_on(async {
            transport.connect().await.unwrap();
            assert_eq!(transport.read_holding_register(10204).await, Ok(1));
            transport.write_register(22001, 1).await.unwrap();
        });

        assert_eq!(plc.register(22001), 1);
        assert_eq!(plc.writes_to(22001).len(), 1);
        assert_eq!(plc.read_count(), 1);
    }

    #[test]
    fn test_unreachable_device() {
        let plc = SimulatedPlc::new();
        let mut transport = plc.transport();

        block_on(async {
            transport.connect().await.unwrap();
            plc.set_reachable(false);
            assert!(matches!(
                transport.read_holding_register(0).await,
                Err(PlcError::Transport(_))
            ));
            assert!(!transport.is_connected());
            assert!(transport.connect().await.is_err());
        });
    }

    #[test]
    fn test_device_exception_keeps_session() {
        let plc = SimulatedPlc::new();
        plc.fail_writes(22005, true);
        let mut transport = plc.transport();

        block_on(async {
            transport.connect().await.unwrap();
            let err = transport.write_register(22005, 1).await.unwrap_err();
            assert!(matches!(err, PlcError::Protocol { address: 22005, .. }));
            assert!(transport.is_connected());
        });
        assert!(plc.writes().is_empty());
    }
}
