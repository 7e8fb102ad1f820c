use super::crc::crc16;
use super::universal::{
    check_capacity, ready_after, ready_before, OpCode, RegisterTransaction,
    TransportEncoder, UniversalProtocol, UniversalSettings,
};
use crate::connection::{Connection, ConnectionInfo, ModbusConnectionInfo, SensorConnection};
use crate::error::{Result, SensorError};
use crate::physical::modbus::{ModbusInterface, MODBUS_CRC_SIZE, MODBUS_MAX_ADU_LENGTH};
use crate::types::ResetType;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const MODBUS_BUFFER_SIZE: usize = 1024;
/// Largest data block one read-data or write-data request carries
pub const MODBUS_CHUNK_SIZE: usize = 247;

// User-defined function codes
pub const FC_REPORT_SERVER_ID: u8 = 0x11;
pub const FC_READ_DATA: u8 = 0x42;
pub const FC_WRITE_DATA: u8 = 0x43;
pub const FC_SEND_OPCODE: u8 = 0x44;

/// Holding register driving the carrier engine
pub const ENGINE_REGISTER: u16 = 0x0A;
pub const ENGINE_STOP: u16 = 0;
pub const ENGINE_START: u16 = 1;
/// Value the engine register reports once the engine stopped
pub const ENGINE_STOPPED: u16 = 10;

/// Server id answer payload, device type at [`SERVER_ID_DEVICE_TYPE_OFFSET`]
pub const SERVER_ID_LENGTH: usize = 154;
pub const SERVER_ID_DEVICE_TYPE_OFFSET: usize = 154;

const DATA_HEADER_SIZE: usize = 7;
const OPCODE_ANSWER_SIZE: usize = 4 + MODBUS_CRC_SIZE;
const WRITE_ANSWER_SIZE: usize = DATA_HEADER_SIZE + MODBUS_CRC_SIZE;
const ENGINE_POLL_STEP_MS: u64 = 10;
const DEFAULT_ENGINE_STOP_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_READY_POLL_INTERVAL_MS: u64 = 100;

/// Universal protocol over Modbus-RTU user-defined function codes
pub struct ModbusEncoder<I: ModbusInterface> {
    connection: Connection<ModbusConnectionInfo, I>,
    settings: UniversalSettings,
    engine_stop_timeout_ms: u64,
}

impl<I: ModbusInterface> ModbusEncoder<I> {
    pub fn new(info: ModbusConnectionInfo, interface: I) -> Self {
        Self {
            connection: Connection::new(info, interface, MODBUS_BUFFER_SIZE),
            settings: UniversalSettings {
                ready_poll_interval_ms: DEFAULT_READY_POLL_INTERVAL_MS,
                ..Default::default()
            },
            engine_stop_timeout_ms: DEFAULT_ENGINE_STOP_TIMEOUT_MS,
        }
    }

    pub fn with_settings(mut self, settings: UniversalSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_engine_stop_timeout(mut self, timeout_ms: u64) -> Self {
        self.engine_stop_timeout_ms = timeout_ms;
        self
    }

    pub fn interface(&self) -> &I {
        self.connection.interface()
    }

    fn server_address(&self) -> u8 {
        self.connection.info().modbus_address()
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.connection.interface().is_connected() {
            return Err(SensorError::NotConnected("Modbus device not connected".into()));
        }
        Ok(())
    }

    /// Sends `request` and fills `answer` completely, verifying its CRC trailer
    fn exchange(&mut self, request: &[u8], answer: &mut [u8]) -> Result<()> {
        let modbus = self.connection.interface_mut();
        modbus.send_raw_request(request)?;
        let received = modbus.receive_raw_confirmation(answer)?;
        if received < answer.len() {
            return Err(SensorError::Protocol("Missing bytes in modbus packet".into()));
        }
        let body = answer.len() - MODBUS_CRC_SIZE;
        let expected = u16::from_le_bytes([answer[body], answer[body + 1]]);
        if crc16(&[&answer[..body]]) != expected {
            return Err(SensorError::Crc { context: None });
        }
        Ok(())
    }

    /// Runs `exchange` until it succeeds or the shared retry budget runs out
    fn exchange_with_retries(
        &mut self,
        request: &[u8],
        answer: &mut [u8],
        retries_left: &mut u16,
        transaction: &RegisterTransaction,
    ) -> Result<()> {
        loop {
            match self.exchange(request, answer) {
                Ok(()) => return Ok(()),
                Err(err) if *retries_left == 0 => {
                    return Err(err.with_context(format!(
                        "Modbus address: 0x{:x} size: {}",
                        transaction.address, transaction.size
                    )));
                }
                Err(err) => {
                    *retries_left -= 1;
                    warn!(%err, retries_left = *retries_left, "Modbus exchange failed, retrying");
                }
            }
        }
    }

    /// Sends the transaction's opcode with `arg`, resending on bad answers
    fn send_opcode(&mut self, transaction: &RegisterTransaction, arg: u8) -> Result<u8> {
        let mut retries_left = transaction.crc_retries;
        let request = [self.server_address(), FC_SEND_OPCODE, transaction.opcode.code(), arg];
        let mut answer = [0u8; OPCODE_ANSWER_SIZE];
        self.exchange_with_retries(&request, &mut answer, &mut retries_left, transaction)?;
        Ok(answer[3])
    }

    fn read_chunks(&mut self, transaction: &RegisterTransaction) -> Result<()> {
        let mut retries_left = transaction.crc_retries;
        let mut answer = [0u8; MODBUS_MAX_ADU_LENGTH];
        let mut done = 0;

        while done < transaction.size {
            let len = (transaction.size - done).min(MODBUS_CHUNK_SIZE);
            let base = transaction.address.wrapping_add(done as u32).to_le_bytes();
            let request = [
                self.server_address(),
                FC_READ_DATA,
                base[0],
                base[1],
                base[2],
                base[3],
                len as u8,
            ];
            let answer = &mut answer[..DATA_HEADER_SIZE + len + MODBUS_CRC_SIZE];
            self.exchange_with_retries(&request, answer, &mut retries_left, transaction)?;

            self.connection.buffers_mut().output_mut()[done..done + len]
                .copy_from_slice(&answer[DATA_HEADER_SIZE..DATA_HEADER_SIZE + len]);
            done += len;
        }
        Ok(())
    }

    fn write_chunks(&mut self, transaction: &RegisterTransaction) -> Result<()> {
        let mut retries_left = transaction.crc_retries;
        let mut request = [0u8; MODBUS_MAX_ADU_LENGTH];
        let mut answer = [0u8; WRITE_ANSWER_SIZE];
        let mut done = 0;

        while done < transaction.size {
            let len = (transaction.size - done).min(MODBUS_CHUNK_SIZE);
            let base = transaction.address.wrapping_add(done as u32).to_le_bytes();
            request[0] = self.server_address();
            request[1] = FC_WRITE_DATA;
            request[2..6].copy_from_slice(&base);
            request[6] = len as u8;
            request[DATA_HEADER_SIZE..DATA_HEADER_SIZE + len]
                .copy_from_slice(&self.connection.buffers().input()[done..done + len]);

            let request = &request[..DATA_HEADER_SIZE + len];
            self.exchange_with_retries(request, &mut answer, &mut retries_left, transaction)?;
            ready_after(self, transaction.post_ready_timeout_ms)?;
            done += len;
        }
        Ok(())
    }

    fn stop_engine(&mut self) -> Result<()> {
        let modbus = self.connection.interface_mut();
        modbus.write_register(ENGINE_REGISTER, ENGINE_STOP)?;

        let mut waited = 0;
        loop {
            let mut value = [0u16; 1];
            modbus.read_registers(ENGINE_REGISTER, &mut value)?;
            if value[0] == ENGINE_STOPPED {
                debug!(waited_ms = waited, "Carrier engine stopped");
                return Ok(());
            }
            if waited >= self.engine_stop_timeout_ms {
                return Err(SensorError::timeout("Carrier engine never stopped"));
            }
            thread::sleep(Duration::from_millis(ENGINE_POLL_STEP_MS));
            waited += ENGINE_POLL_STEP_MS;
        }
    }

    /// Device type from the report-server-id answer
    pub fn read_device_type(&mut self) -> Result<u16> {
        self.ensure_connected()?;
        let request = [self.server_address(), FC_REPORT_SERVER_ID];
        let mut answer = [0u8; 2 + SERVER_ID_LENGTH + MODBUS_CRC_SIZE];
        self.exchange(&request, &mut answer)?;
        Ok(u16::from_le_bytes([
            answer[SERVER_ID_DEVICE_TYPE_OFFSET],
            answer[SERVER_ID_DEVICE_TYPE_OFFSET + 1],
        ]))
    }
}

impl<I: ModbusInterface> SensorConnection for ModbusEncoder<I> {
    fn connect(&mut self) -> Result<()> {
        self.connection.interface_mut().connect()?;
        if let Err(err) = self.init() {
            warn!(%err, "Modbus bring-up failed, disconnecting");
            if let Err(cleanup) = self.connection.interface_mut().disconnect() {
                debug!(%cleanup, "Disconnect after failed bring-up also failed");
            }
            return Err(err);
        }
        info!(port = self.connection.info().serial_port(), "Modbus sensor connected");
        Ok(())
    }

    /// Restarts the carrier engine before closing the link
    fn disconnect(&mut self) -> Result<()> {
        let modbus = self.connection.interface_mut();
        if !modbus.is_connected() {
            return Ok(());
        }
        if let Err(err) = modbus.write_register(ENGINE_REGISTER, ENGINE_START) {
            debug!(%err, "Could not restart the carrier engine");
        }
        modbus.disconnect()
    }

    fn is_connected(&self) -> bool {
        self.connection.interface().is_connected()
    }

    fn init(&mut self) -> Result<()> {
        self.stop_engine()?;
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

impl<I: ModbusInterface> TransportEncoder for ModbusEncoder<I> {
    fn read(&mut self, transaction: &RegisterTransaction) -> Result<()> {
        self.ensure_connected()?;
        ready_before(self, transaction)?;
        check_capacity(self.payload_capacity(), transaction.size)?;

        match transaction.opcode {
            OpCode::Read => self.read_chunks(transaction),
            _ => {
                let retval = self.send_opcode(transaction, 0)?;
                self.connection.buffers_mut().output_mut()[0] = retval;
                Ok(())
            }
        }
    }

    fn write(&mut self, transaction: &RegisterTransaction) -> Result<()> {
        self.ensure_connected()?;
        check_capacity(self.payload_capacity(), transaction.size)?;

        match transaction.opcode {
            OpCode::Write => self.write_chunks(transaction),
            _ => {
                let arg = if transaction.size >= 1 {
                    self.connection.buffers().input()[0]
                } else {
                    0
                };
                self.send_opcode(transaction, arg)?;
                if transaction.wait_after_opcode_ms > 0 {
                    thread::sleep(Duration::from_millis(transaction.wait_after_opcode_ms));
                }
                ready_after(self, transaction.post_ready_timeout_ms)
            }
        }
    }

    /// Every reset type is a single SWRST; the argument selects the bootloader.
    /// No ready-poll follows.
    fn reset(&mut self, reset_type: ResetType, enter_bootloader: bool) -> Result<()> {
        self.ensure_connected()?;
        debug!(?reset_type, enter_bootloader, "Modbus sensor reset");
        self.connection.buffers_mut().input_mut()[0] = if enter_bootloader { 0x82 } else { 0 };
        let transaction = RegisterTransaction::write(OpCode::SoftReset, 0, 1).with_post_ready_timeout(0);
        self.write(&transaction)?;
        info!(enter_bootloader, "Software reset sent");
        Ok(())
    }

    fn raw_connect(&mut self) -> Result<()> {
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

impl<I: ModbusInterface> Drop for ModbusEncoder<I> {
    fn drop(&mut self) {
        if let Err(err) = self.disconnect() {
            debug!(%err, "Modbus disconnect on drop failed");
        }
    }
}
