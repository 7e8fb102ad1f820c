//! Modbus-RTU device emulating a sensor's user-defined function codes.

use super::mock::{RegisterSim, SharedSim};
use super::modbus::ModbusInterface;
use super::PhysicalLayer;
use crate::error::{Result, SensorError};
use crate::transport::crc::crc16;
use crate::transport::modbus::{
    ENGINE_REGISTER, ENGINE_START, ENGINE_STOPPED, FC_READ_DATA, FC_REPORT_SERVER_ID,
    FC_SEND_OPCODE, FC_WRITE_DATA, SERVER_ID_DEVICE_TYPE_OFFSET, SERVER_ID_LENGTH,
};
use crate::transport::universal::DEVICE_TYPE_ADDRESS_OLD;
use crate::transport::OpCode;
use crate::types::DEVICE_TYPE_M16;
use parking_lot::Mutex;
use std::sync::Arc;

struct ModbusDeviceState {
    connected: bool,
    server_address: u8,
    device_type: u16,
    answer: Vec<u8>,
    requests: Vec<Vec<u8>>,
    engine: u16,
    engine_stop_polls: u32,
    corrupt_answers: u32,
    truncate_answers: u32,
    in_bootloader: bool,
}

/// SWRST argument that sends the sensor into its bootloader
const BOOTLOADER_ARG: u8 = 0x82;

/// Mock Modbus device. Clones share the device and its register map.
#[derive(Clone)]
pub struct MockModbusDevice {
    state: Arc<Mutex<ModbusDeviceState>>,
    sim: SharedSim,
}

impl Default for MockModbusDevice {
    fn default() -> Self {
        Self::new(1)
    }
}

impl MockModbusDevice {
    /// Creates an M16 answering on `server_address`
    pub fn new(server_address: u8) -> Self {
        Self::with_sim(
            server_address,
            RegisterSim::shared(DEVICE_TYPE_ADDRESS_OLD, DEVICE_TYPE_M16),
        )
    }

    pub fn with_sim(server_address: u8, sim: SharedSim) -> Self {
        Self {
            state: Arc::new(Mutex::new(ModbusDeviceState {
                connected: false,
                server_address,
                device_type: DEVICE_TYPE_M16,
                answer: Vec::new(),
                requests: Vec::new(),
                engine: ENGINE_START,
                engine_stop_polls: 0,
                corrupt_answers: 0,
                truncate_answers: 0,
                in_bootloader: false,
            })),
            sim,
        }
    }

    pub fn sim(&self) -> SharedSim {
        Arc::clone(&self.sim)
    }

    /// Device type reported by the server id answer
    pub fn set_device_type(&self, device_type: u16) {
        self.state.lock().device_type = device_type;
    }

    /// The engine reports stopped only after `polls` reads of its register.
    /// `u32::MAX` keeps it running forever.
    pub fn set_engine_stop_polls(&self, polls: u32) {
        self.state.lock().engine_stop_polls = polls;
    }

    pub fn engine_register(&self) -> u16 {
        self.state.lock().engine
    }

    /// The CRC of the next `count` answers is corrupted
    pub fn corrupt_next_answers(&self, count: u32) {
        self.state.lock().corrupt_answers = count;
    }

    /// The next `count` answers lose their last byte
    pub fn truncate_next_answers(&self, count: u32) {
        self.state.lock().truncate_answers = count;
    }

    /// Set once a SWRST asked for the bootloader; the device stays silent from then on
    pub fn in_bootloader(&self) -> bool {
        self.state.lock().in_bootloader
    }

    /// Every raw request received, CRC excluded
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.state.lock().requests.clone()
    }

    pub fn requests_with(&self, function_code: u8) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|request| request.get(1) == Some(&function_code))
            .count()
    }

    fn answer_for(&self, request: &[u8], device_type: u16) -> Vec<u8> {
        let mut sim = self.sim.lock();
        let mut answer = request[..2].to_vec();
        match request[1] {
            FC_READ_DATA if request.len() >= 7 => {
                let address = u32::from_le_bytes([request[2], request[3], request[4], request[5]]);
                answer.extend_from_slice(&request[2..7]);
                answer.extend(sim.peek(address, request[6] as usize));
            }
            FC_WRITE_DATA if request.len() >= 7 => {
                let address = u32::from_le_bytes([request[2], request[3], request[4], request[5]]);
                let len = (request[6] as usize).min(request.len() - 7);
                sim.write(address, &request[7..7 + len]);
                answer.extend_from_slice(&request[2..7]);
            }
            FC_SEND_OPCODE if request.len() >= 4 => {
                let retval = sim.execute(request[2], request[3]);
                answer.extend_from_slice(&[request[2], retval]);
            }
            FC_REPORT_SERVER_ID => {
                let mut payload = vec![0u8; SERVER_ID_LENGTH];
                payload[0] = (SERVER_ID_LENGTH - 1) as u8;
                answer.extend(payload);
                answer.truncate(SERVER_ID_DEVICE_TYPE_OFFSET);
                answer.extend_from_slice(&device_type.to_le_bytes());
            }
            // Exception: illegal function
            function => {
                answer[1] = function | 0x80;
                answer.push(0x01);
            }
        }
        answer
    }

    fn ensure_connected(state: &ModbusDeviceState) -> Result<()> {
        if !state.connected {
            return Err(SensorError::NotConnected("mock Modbus device closed".into()));
        }
        Ok(())
    }
}

impl PhysicalLayer for MockModbusDevice {
    fn connect(&mut self) -> Result<()> {
        self.state.lock().connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.state.lock().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}

impl ModbusInterface for MockModbusDevice {
    fn send_raw_request(&mut self, request: &[u8]) -> Result<()> {
        let (addressed, device_type) = {
            let mut state = self.state.lock();
            Self::ensure_connected(&state)?;
            state.requests.push(request.to_vec());
            state.answer.clear();
            (
                request.len() >= 2 && request[0] == state.server_address && !state.in_bootloader,
                state.device_type,
            )
        };
        if !addressed {
            return Ok(());
        }

        let mut answer = self.answer_for(request, device_type);
        let mut crc = crc16(&[&answer]);
        let mut state = self.state.lock();
        if state.corrupt_answers > 0 {
            state.corrupt_answers -= 1;
            crc ^= 0x0001;
        }
        answer.extend_from_slice(&crc.to_le_bytes());
        if state.truncate_answers > 0 {
            state.truncate_answers -= 1;
            answer.pop();
        }
        state.answer = answer;
        if request[1] == FC_SEND_OPCODE
            && request.get(2) == Some(&OpCode::SoftReset.code())
            && request.get(3) == Some(&BOOTLOADER_ARG)
        {
            state.in_bootloader = true;
        }
        Ok(())
    }

    fn receive_raw_confirmation(&mut self, answer: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        Self::ensure_connected(&state)?;
        let len = state.answer.len().min(answer.len());
        answer[..len].copy_from_slice(&state.answer[..len]);
        state.answer.clear();
        Ok(len)
    }

    fn read_registers(&mut self, address: u16, values: &mut [u16]) -> Result<()> {
        let mut state = self.state.lock();
        Self::ensure_connected(&state)?;
        if address != ENGINE_REGISTER {
            return Err(SensorError::Protocol(format!("illegal data address {address}")));
        }
        if state.engine != ENGINE_START && state.engine != ENGINE_STOPPED {
            if state.engine_stop_polls == 0 {
                state.engine = ENGINE_STOPPED;
            } else if state.engine_stop_polls != u32::MAX {
                state.engine_stop_polls -= 1;
            }
        }
        values.fill(0);
        if let Some(first) = values.first_mut() {
            *first = state.engine;
        }
        Ok(())
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        let mut state = self.state.lock();
        Self::ensure_connected(&state)?;
        if address != ENGINE_REGISTER {
            return Err(SensorError::Protocol(format!("illegal data address {address}")));
        }
        state.engine = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_answer_layout() {
        let mut device = MockModbusDevice::new(1);
        device.connect().unwrap();
        device.send_raw_request(&[1, FC_SEND_OPCODE, 0x05, 0]).unwrap();

        let mut answer = [0u8; 6];
        assert_eq!(device.receive_raw_confirmation(&mut answer).unwrap(), 6);
        assert_eq!(&answer[..3], &[1, FC_SEND_OPCODE, 0x05]);
        assert_eq!(u16::from_le_bytes([answer[4], answer[5]]), crc16(&[&answer[..4]]));
    }

    #[test]
    fn other_server_addresses_stay_silent() {
        let mut device = MockModbusDevice::new(3);
        device.connect().unwrap();
        device.send_raw_request(&[1, FC_REPORT_SERVER_ID]).unwrap();

        let mut answer = [0u8; 16];
        assert_eq!(device.receive_raw_confirmation(&mut answer).unwrap(), 0);
    }

    #[test]
    fn bootloader_entry_silences_the_device() {
        let mut device = MockModbusDevice::new(1);
        device.connect().unwrap();
        let swrst = OpCode::SoftReset.code();
        device.send_raw_request(&[1, FC_SEND_OPCODE, swrst, BOOTLOADER_ARG]).unwrap();

        // The reset itself is still acknowledged
        let mut answer = [0u8; 6];
        assert_eq!(device.receive_raw_confirmation(&mut answer).unwrap(), 6);
        assert!(device.in_bootloader());
        assert_eq!(device.sim().lock().bootloader_requests(), 1);

        device.send_raw_request(&[1, FC_SEND_OPCODE, OpCode::ReadStatus.code(), 0]).unwrap();
        assert_eq!(device.receive_raw_confirmation(&mut answer).unwrap(), 0);
    }

    #[test]
    fn engine_stops_after_polls() {
        let mut device = MockModbusDevice::new(1);
        device.connect().unwrap();
        device.set_engine_stop_polls(1);
        device.write_register(ENGINE_REGISTER, 0).unwrap();

        let mut value = [0u16; 1];
        device.read_registers(ENGINE_REGISTER, &mut value).unwrap();
        assert_eq!(value[0], 0);
        device.read_registers(ENGINE_REGISTER, &mut value).unwrap();
        assert_eq!(value[0], ENGINE_STOPPED);
    }
}
