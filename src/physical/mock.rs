//! In-memory sensor and CAN adapter used by the tests.

use super::can::{CanDriver, CanEvents, DriverFrame};
use crate::connection::CanConnectionInfo;
use crate::error::{Result, SensorError};
use crate::transport::can::{
    CMD_READ_DATA, CMD_SEND_OP_CODE, CMD_SET_BASE_ADDRESS, CMD_WRITE_DATA,
};
use crate::transport::universal::{
    OpCode, StatusRegister, TransactionInfo, TRANSACTION_CONFIG_ADDRESS, TRANSACTION_INFO_ADDRESS,
};
use crate::types::{CanFrame, CanId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Register map of an emulated sensor, shared between a mock transport and the test
pub type SharedSim = Arc<Mutex<RegisterSim>>;

/// Emulates the register side of a sensor: memory, status register and transaction info
#[derive(Debug, Default)]
pub struct RegisterSim {
    memory: BTreeMap<u32, u8>,
    write_enabled: bool,
    busy_polls: u32,
    resets: u32,
    bootloader_requests: u32,
    write_transactions: u32,
}

impl RegisterSim {
    /// Creates a sensor reporting `device_type` at `device_type_address`
    pub fn new(device_type_address: u32, device_type: u16) -> Self {
        let mut sim = Self::default();
        sim.poke(device_type_address, &device_type.to_le_bytes());
        sim
    }

    pub fn shared(device_type_address: u32, device_type: u16) -> SharedSim {
        Arc::new(Mutex::new(Self::new(device_type_address, device_type)))
    }

    pub fn peek(&self, address: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|offset| {
                self.memory
                    .get(&address.wrapping_add(offset))
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }

    pub fn poke(&mut self, address: u32, data: &[u8]) {
        for (offset, byte) in data.iter().enumerate() {
            self.memory.insert(address.wrapping_add(offset as u32), *byte);
        }
    }

    /// Status register as the sensor reports it; counts down pending busy polls
    pub fn status(&mut self) -> u8 {
        let mut status = StatusRegister::empty();
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            status |= StatusRegister::BUSY;
        }
        if self.write_enabled {
            status |= StatusRegister::WRITE_ENABLED;
        }
        status.bits()
    }

    /// The next `polls` status reads report busy
    pub fn set_busy_polls(&mut self, polls: u32) {
        self.busy_polls = polls;
    }

    pub fn is_write_enabled(&self) -> bool {
        self.write_enabled
    }

    /// Runs a data-less opcode and returns the sensor's return value
    pub fn execute(&mut self, opcode: u8, arg: u8) -> u8 {
        match OpCode::from_code(opcode) {
            Some(OpCode::WriteEnable) => self.write_enabled = true,
            Some(OpCode::WriteDisable) => self.write_enabled = false,
            Some(OpCode::ReadStatus) => return self.status(),
            Some(OpCode::SoftReset) => {
                self.resets += 1;
                self.write_enabled = false;
                if arg == 0x82 {
                    self.bootloader_requests += 1;
                }
            }
            Some(OpCode::ChipErase) => {
                self.memory
                    .retain(|&address, _| address >= TRANSACTION_CONFIG_ADDRESS);
            }
            _ => {
                self.set_transaction_info(TransactionInfo::CMD_NOT_FOUND);
                return 0;
            }
        }
        0
    }

    /// Stores a WRITE payload when the write latch is set
    pub fn write(&mut self, address: u32, data: &[u8]) {
        self.write_transactions += 1;
        if !self.write_enabled {
            self.set_transaction_info(TransactionInfo::WRITE_DISABLE);
            return;
        }
        self.poke(address, data);
        self.set_transaction_info(TransactionInfo::empty());
    }

    /// Counts a WRITE that failed its integrity check on the sensor side
    pub fn reject_write(&mut self) {
        self.write_transactions += 1;
        self.set_transaction_info(TransactionInfo::CRC_FAILED);
    }

    pub fn set_transaction_info(&mut self, info: TransactionInfo) {
        self.poke(TRANSACTION_INFO_ADDRESS, &info.bits().to_le_bytes());
    }

    pub fn transaction_info(&self) -> TransactionInfo {
        let raw = self.peek(TRANSACTION_INFO_ADDRESS, 2);
        TransactionInfo::from_bits_retain(u16::from_le_bytes([raw[0], raw[1]]))
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }

    pub fn bootloader_requests(&self) -> u32 {
        self.bootloader_requests
    }

    pub fn write_transactions(&self) -> u32 {
        self.write_transactions
    }
}

/// Mock responder: receives every written frame and returns the frames to queue for reading
pub type CanResponder = Box<dyn FnMut(&CanFrame) -> Vec<CanFrame> + Send>;

#[derive(Default)]
struct CanAdapterState {
    is_open: bool,
    opened: u32,
    closed: u32,
    written: Vec<CanFrame>,
    rx_queue: VecDeque<DriverFrame>,
    responder: Option<CanResponder>,
    pending_events: u32,
}

/// Mock CAN adapter. Clones share the same adapter state.
#[derive(Clone, Default)]
pub struct MockCanDriver {
    state: Arc<Mutex<CanAdapterState>>,
}

impl MockCanDriver {
    /// Creates an adapter that never answers
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an adapter answering through a custom responder
    pub fn with_responder(responder: CanResponder) -> Self {
        let driver = Self::default();
        driver.set_responder(Some(responder));
        driver
    }

    pub fn set_responder(&self, responder: Option<CanResponder>) {
        self.state.lock().responder = responder;
    }

    /// Chains a responder after the current one; both see every written frame
    pub fn add_responder(&self, mut responder: CanResponder) {
        let mut state = self.state.lock();
        let previous = state.responder.take();
        let chained: CanResponder = match previous {
            Some(mut previous) => Box::new(move |frame: &CanFrame| {
                let mut answers = previous(frame);
                answers.extend(responder(frame));
                answers
            }),
            None => responder,
        };
        state.responder = Some(chained);
    }

    /// Responder emulating a sensor speaking the Universal protocol over CAN
    pub fn universal_sensor(info: &CanConnectionInfo, sim: SharedSim) -> CanResponder {
        let rx_id = info.base_id_rx();
        let tx_id = info.base_id_tx();
        let mut base_address = 0u32;
        Box::new(move |frame: &CanFrame| {
            if frame.id != rx_id {
                return Vec::new();
            }
            let mut sim = sim.lock();
            let mut answer = CanFrame::new(tx_id, frame.data);
            let size = frame.sub_cmd() as usize;
            let args = frame.args();
            let address = base_address | u32::from(u16::from_le_bytes([args[0], args[1]]));
            match frame.cmd() {
                CMD_SET_BASE_ADDRESS => {
                    base_address = u32::from_le_bytes([args[2], args[3], args[4], args[5]]);
                }
                CMD_READ_DATA => {
                    let data = sim.peek(address, size.min(4));
                    answer.data[4..4 + data.len()].copy_from_slice(&data);
                }
                CMD_WRITE_DATA => {
                    let end = 2 + size.min(4);
                    sim.write(address, &args[2..end]);
                }
                CMD_SEND_OP_CODE => {
                    let retval = sim.execute(args[0], 0);
                    answer.data[4] = retval;
                }
                _ => answer.args_mut().fill(0xFF),
            }
            vec![answer]
        })
    }

    /// Queues a frame as if another node had sent it
    pub fn push_frame(&self, frame: CanFrame) {
        self.state.lock().rx_queue.push_back(DriverFrame::new(frame));
    }

    /// The next `count` reads report a bus event
    pub fn inject_events(&self, count: u32) {
        self.state.lock().pending_events = count;
    }

    pub fn written(&self) -> Vec<CanFrame> {
        self.state.lock().written.clone()
    }

    pub fn written_to(&self, id: CanId) -> Vec<CanFrame> {
        self.state
            .lock()
            .written
            .iter()
            .filter(|frame| frame.id == id)
            .copied()
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().rx_queue.len()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().is_open
    }

    pub fn open_count(&self) -> u32 {
        self.state.lock().opened
    }

    pub fn close_count(&self) -> u32 {
        self.state.lock().closed
    }
}

impl CanDriver for MockCanDriver {
    fn open(&mut self, _info: &CanConnectionInfo) -> Result<()> {
        let mut state = self.state.lock();
        if state.is_open {
            return Err(SensorError::Transport("adapter already open".into()));
        }
        state.is_open = true;
        state.opened += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.is_open = false;
        state.closed += 1;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<DriverFrame>> {
        let mut state = self.state.lock();
        if !state.is_open {
            return Err(SensorError::NotConnected("CAN adapter closed".into()));
        }
        if state.pending_events > 0 {
            state.pending_events -= 1;
            return Ok(Some(DriverFrame::with_events(
                CanFrame::default(),
                CanEvents::BUS_ERROR,
            )));
        }
        Ok(state.rx_queue.pop_front())
    }

    fn write(&mut self, frame: &CanFrame, _extended: bool) -> Result<()> {
        let mut state = self.state.lock();
        if !state.is_open {
            return Err(SensorError::NotConnected("CAN adapter closed".into()));
        }
        state.written.push(*frame);
        let answers = match state.responder.as_mut() {
            Some(responder) => responder(frame),
            None => Vec::new(),
        };
        state
            .rx_queue
            .extend(answers.into_iter().map(DriverFrame::new));
        Ok(())
    }
}
