use super::universal::{
    check_capacity, ready_after, ready_before, soft_reset, OpCode, RegisterTransaction,
    TransportEncoder, UniversalProtocol, UniversalSettings,
};
use crate::connection::{CanConnectionInfo, Connection, ConnectionInfo, SensorConnection};
use crate::error::{Result, SensorError};
use crate::network::CanNetwork;
use crate::types::{CanFrame, ResetType, CAN_DATA_SIZE};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

// Command set of the Universal protocol over CAN
pub const CMD_STOP_SEND_DETECT: u8 = 1;
pub const CMD_SEND_DETECT_ONCE: u8 = 2;
pub const CMD_START_SEND_DETECT: u8 = 3;
pub const CMD_GET_INPUT_DATA: u8 = 4;
pub const CMD_GET_HOLDING_DATA: u8 = 5;
pub const CMD_SET_HOLDING_DATA: u8 = 6;
pub const CMD_SET_BASE_ADDRESS: u8 = 7;
pub const CMD_READ_DATA: u8 = 8;
pub const CMD_WRITE_DATA: u8 = 9;
pub const CMD_SEND_OP_CODE: u8 = 10;

pub const CAN_BUFFER_SIZE: usize = 2048;
/// Largest data chunk one READ_DATA or WRITE_DATA frame carries
pub const CAN_CHUNK_SIZE: usize = 4;
/// Answer data starts after {cmd, sub-cmd, 2 address bytes}
const ANSWER_DATA_OFFSET: usize = 4;

const ANSWER_POLLS: u32 = 100;
const ANSWER_POLL_INTERVAL: Duration = Duration::from_millis(1);
const DEFAULT_SOFT_RESET_WAIT_MS: u64 = 5000;

/// Bytes carried by the next chunk: 4, except 3 remaining bytes which go as 2 then 1
fn chunk_len(remaining: usize) -> usize {
    match remaining {
        0..=2 => remaining,
        3 => 2,
        _ => CAN_CHUNK_SIZE,
    }
}

/// Universal protocol over CAN. Addresses travel as 16 bits; the upper half is set
/// separately with SET_BASE_ADDRESS and cached until it changes.
pub struct CanUniversalEncoder<N: CanNetwork> {
    connection: Connection<CanConnectionInfo, N>,
    settings: UniversalSettings,
    current_base_address: Option<u32>,
    soft_reset_wait_ms: u64,
}

impl<N: CanNetwork> CanUniversalEncoder<N> {
    pub fn new(interface: N) -> Self {
        let info = interface.info().clone();
        Self {
            connection: Connection::new(info, interface, CAN_BUFFER_SIZE),
            settings: UniversalSettings::default(),
            current_base_address: None,
            soft_reset_wait_ms: DEFAULT_SOFT_RESET_WAIT_MS,
        }
    }

    pub fn with_settings(mut self, settings: UniversalSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Delay between SWRST and reading its acknowledgement
    pub fn with_soft_reset_wait(mut self, wait_ms: u64) -> Self {
        self.soft_reset_wait_ms = wait_ms;
        self
    }

    pub fn interface(&self) -> &N {
        self.connection.interface()
    }

    pub fn interface_mut(&mut self) -> &mut N {
        self.connection.interface_mut()
    }

    pub fn current_base_address(&self) -> Option<u32> {
        self.current_base_address
    }

    pub fn into_interface(self) -> N {
        self.connection.into_parts().1
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.connection.interface().is_connected() {
            return Err(SensorError::NotConnected("CAN device not connected".into()));
        }
        Ok(())
    }

    fn request_id(&self) -> u32 {
        self.connection.info().base_id_rx()
    }

    /// Takes every frame routed to this connection, keeping the last one in the output buffer
    fn collect_answers(&mut self) -> Result<Option<CanFrame>> {
        let mut last = None;
        for frame in self.connection.interface_mut().drain_received() {
            if frame.is_failure_marker() {
                return Err(SensorError::Protocol(format!(
                    "Sensor failed to process command:{:x}",
                    frame.cmd()
                )));
            }
            debug!(id = frame.id, data = ?frame.data, "Universal CAN answer");
            self.connection.buffers_mut().output_mut()[..CAN_DATA_SIZE]
                .copy_from_slice(&frame.data);
            last = Some(frame);
        }
        Ok(last)
    }

    /// Polls the bus until an answer landed in the output buffer
    fn wait_for_answer(&mut self) -> Result<()> {
        let mut polls = 0;
        while self.connection.buffers().output()[0] == 0 {
            if polls == ANSWER_POLLS {
                return Err(SensorError::timeout("No answer from sensor"));
            }
            self.connection.interface_mut().read()?;
            self.collect_answers()?;
            thread::sleep(ANSWER_POLL_INTERVAL);
            polls += 1;
        }
        Ok(())
    }

    /// Sends SET_BASE_ADDRESS when the upper 16 bits changed; returns the lower 16 bits
    pub fn set_base_address(&mut self, address: u32) -> Result<u16> {
        let base = address & 0xFFFF_0000;
        if self.current_base_address != Some(base) {
            let mut frame = CanFrame::command(CMD_SET_BASE_ADDRESS, 0);
            frame.args_mut()[2..6].copy_from_slice(&base.to_le_bytes());
            let id = self.request_id();
            if !self
                .connection
                .interface_mut()
                .write_and_wait_for_answer(id, &frame.data)?
            {
                return Err(SensorError::Protocol("Couldnt set base address".into()));
            }
            self.collect_answers()?;
            self.connection.buffers_mut().output_mut()[..CAN_DATA_SIZE].fill(0);
            debug!("Base address changed to 0x{base:08x}");
            self.current_base_address = Some(base);
        }
        Ok((address & 0xFFFF) as u16)
    }
}

impl<N: CanNetwork> SensorConnection for CanUniversalEncoder<N> {
    fn connect(&mut self) -> Result<()> {
        self.raw_connect()?;
        if let Err(err) = self.universal_init() {
            if let Err(cleanup) = self.connection.interface_mut().disconnect() {
                debug!(%cleanup, "Disconnect after failed bring-up also failed");
            }
            return Err(err);
        }
        info!(
            rx = self.connection.info().base_id_rx(),
            tx = self.connection.info().base_id_tx(),
            "Universal CAN sensor connected"
        );
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.current_base_address = None;
        if self.connection.interface().is_connected() {
            self.connection.interface_mut().disconnect()?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.interface().is_connected()
    }

    fn init(&mut self) -> Result<()> {
        self.current_base_address = None;
        self.universal_init()
    }

    fn connection_info(&self) -> ConnectionInfo {
        self.connection.info().clone().into()
    }

    fn device_type(&self) -> u16 {
        self.connection.device_type()
    }

    fn set_device_type(&mut self, device_type: u16) {
        self.connection.set_device_type(device_type);
    }
}

impl<N: CanNetwork> TransportEncoder for CanUniversalEncoder<N> {
    fn read(&mut self, transaction: &RegisterTransaction) -> Result<()> {
        if !matches!(transaction.opcode, OpCode::Read | OpCode::ReadStatus) {
            return Err(SensorError::Configuration("Unhandled op code".into()));
        }
        self.ensure_connected()?;
        ready_before(self, transaction)?;
        let size = transaction.size;
        check_capacity(self.payload_capacity(), size)?;
        if transaction.opcode == OpCode::Read && size == 0 {
            return Ok(());
        }

        let id = self.request_id();
        let mut data = vec![0u8; size];
        let mut done = 0;
        loop {
            self.connection.buffers_mut().output_mut().fill(0);
            let (frame, len) = match transaction.opcode {
                OpCode::Read => {
                    let len = chunk_len(size - done);
                    let low = self.set_base_address(transaction.address.wrapping_add(done as u32))?;
                    let mut frame = CanFrame::command(CMD_READ_DATA, len as u8);
                    frame.args_mut()[..2].copy_from_slice(&low.to_le_bytes());
                    (frame, len)
                }
                opcode => {
                    let mut frame = CanFrame::command(CMD_SEND_OP_CODE, 0);
                    frame.args_mut()[0] = opcode.code();
                    (frame, size.min(CAN_CHUNK_SIZE))
                }
            };

            if !self
                .connection
                .interface_mut()
                .write_and_wait_for_answer(id, &frame.data)?
            {
                return Err(SensorError::Protocol(format!(
                    "Couldnt read register {:x}",
                    transaction.address
                )));
            }
            self.collect_answers()?;
            self.wait_for_answer()?;

            let output = self.connection.buffers().output();
            data[done..done + len]
                .copy_from_slice(&output[ANSWER_DATA_OFFSET..ANSWER_DATA_OFFSET + len]);
            done += len;
            if transaction.opcode != OpCode::Read || done >= size {
                break;
            }
        }

        self.connection.buffers_mut().output_mut()[..size].copy_from_slice(&data);
        Ok(())
    }

    fn write(&mut self, transaction: &RegisterTransaction) -> Result<()> {
        if !matches!(
            transaction.opcode,
            OpCode::Write
                | OpCode::WriteEnable
                | OpCode::WriteDisable
                | OpCode::SoftReset
                | OpCode::ChipErase
        ) {
            return Err(SensorError::Configuration("Unhandled op code".into()));
        }
        self.ensure_connected()?;
        check_capacity(self.payload_capacity(), transaction.size)?;
        // Data transfers without data put nothing on the bus
        if transaction.opcode == OpCode::Write && transaction.size == 0 {
            return Ok(());
        }

        let id = self.request_id();
        let opcode = transaction.opcode.code();
        let mut done = 0;
        loop {
            self.connection.buffers_mut().output_mut().fill(0);
            let (frame, len) = match transaction.opcode {
                OpCode::Write => {
                    let len = chunk_len(transaction.size - done);
                    let low = self.set_base_address(transaction.address.wrapping_add(done as u32))?;
                    let mut frame = CanFrame::command(CMD_WRITE_DATA, len as u8);
                    frame.args_mut()[..2].copy_from_slice(&low.to_le_bytes());
                    frame.args_mut()[2..2 + len]
                        .copy_from_slice(&self.connection.buffers().input()[done..done + len]);
                    (frame, len)
                }
                _ => {
                    let mut frame = CanFrame::command(CMD_SEND_OP_CODE, 0);
                    frame.args_mut()[0] = opcode;
                    (frame, transaction.size)
                }
            };

            let interface = self.connection.interface_mut();
            if transaction.wait_after_opcode_ms == 0 {
                if !interface.write_and_wait_for_answer(id, &frame.data)? {
                    return Err(SensorError::Protocol(format!(
                        "Couldnt write register {:x}",
                        transaction.address
                    )));
                }
            } else {
                interface.write(id, &frame.data)?;
                thread::sleep(Duration::from_millis(transaction.wait_after_opcode_ms));
                if !interface.read()? {
                    return Err(SensorError::Protocol(format!(
                        "Couldnt send op code {opcode:x}"
                    )));
                }
            }
            self.collect_answers()?;
            ready_after(self, transaction.post_ready_timeout_ms)?;

            done += len;
            if transaction.opcode != OpCode::Write || done >= transaction.size {
                break;
            }
        }
        Ok(())
    }

    fn reset(&mut self, reset_type: ResetType, _enter_bootloader: bool) -> Result<()> {
        match reset_type {
            ResetType::Soft => {
                self.ensure_connected()?;
                let transaction = RegisterTransaction::write(OpCode::SoftReset, 0, 0)
                    .with_post_ready_timeout(0)
                    .with_wait_after_opcode(self.soft_reset_wait_ms);
                soft_reset(self, &transaction)?;
                self.current_base_address = None;
                Ok(())
            }
            _ => Err(SensorError::Configuration(
                "Reset type not implemented for this type of device".into(),
            )),
        }
    }

    fn raw_connect(&mut self) -> Result<()> {
        self.current_base_address = None;
        self.connection.interface_mut().connect()
    }

    fn payload_capacity(&self) -> usize {
        self.connection.buffers().len()
    }

    fn input_payload(&mut self) -> &mut [u8] {
        self.connection.buffers_mut().input_mut()
    }

    fn output_payload(&self) -> &[u8] {
        self.connection.buffers().output()
    }

    fn settings(&self) -> &UniversalSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut UniversalSettings {
        &mut self.settings
    }

    fn resize_buffers(&mut self, size: usize) {
        self.connection.resize_buffers(size);
    }
}
