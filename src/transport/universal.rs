//! Universal register protocol engine.
//!
//! The engine talks in opcodes, 32-bit addresses and sizes. Every transport encoder
//! implements [`TransportEncoder`] and gets the register-level operations of
//! [`UniversalProtocol`] for free.

use crate::connection::SensorConnection;
use crate::error::{Result, SensorError};
use crate::types::{Config, ResetType};
use bitflags::bitflags;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

// Transaction configuration block
pub const TRANSACTION_CONFIG_ADDRESS: u32 = 0x00FF_FB00;
pub const SECURE_TRANSFER_ADDRESS: u32 = TRANSACTION_CONFIG_ADDRESS;
pub const TRANSFER_MODE_ADDRESS: u32 = TRANSACTION_CONFIG_ADDRESS + 1;
pub const TRANSACTION_CRC_ADDRESS: u32 = TRANSACTION_CONFIG_ADDRESS + 2;
pub const TRANSACTION_INFO_ADDRESS: u32 = TRANSACTION_CONFIG_ADDRESS + 4;
pub const READY_DEASSERTING_ADDRESS: u32 = TRANSACTION_CONFIG_ADDRESS + 6;

// Device type register, depends on the sensor generation
pub const DEVICE_TYPE_ADDRESS_OLD: u32 = 0x0040_0140;
pub const DEVICE_TYPE_ADDRESS_NEW: u32 = 0x0004_6146;

/// Ready-check applied to every READ when always-ready-check is on
pub const ALWAYS_READY_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_POST_READY_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_READ_CRC_RETRIES: u16 = 0;
pub const DEFAULT_WRITE_CRC_RETRIES: u16 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Write = 0x02,
    WriteDisable = 0x04,
    ReadStatus = 0x05,
    WriteEnable = 0x06,
    Read = 0x0B,
    SoftReset = 0x99,
    ChipErase = 0xC7,
}

impl OpCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x02 => Some(OpCode::Write),
            0x04 => Some(OpCode::WriteDisable),
            0x05 => Some(OpCode::ReadStatus),
            0x06 => Some(OpCode::WriteEnable),
            0x0B => Some(OpCode::Read),
            0x99 => Some(OpCode::SoftReset),
            0xC7 => Some(OpCode::ChipErase),
            _ => None,
        }
    }
}

bitflags! {
    /// Error code the sensor leaves in the transaction info register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransactionInfo: u16 {
        const ACCESS_RIGHT_VIOLATION = 0x01;
        const INVALID_ADDR = 0x02;
        const CMD_NOT_FOUND = 0x04;
        const WRITE_DISABLE = 0x08;
        const CRC_FAILED = 0x10;
        const CMD_EXEC_ERROR = 0x20;
        const INVALID_PACKET = 0x40;
    }
}

impl TransactionInfo {
    pub fn describe(code: u16) -> &'static str {
        match code {
            0 => "No error",
            0x01 => "Access right violation",
            0x02 => "Invalid address",
            0x04 => "Command not found",
            0x08 => "Write disable",
            0x10 => "CRC failed",
            0x20 => "Command execution error",
            0x40 => "Invalid packet",
            _ => "Invalid error code",
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusRegister: u8 {
        const BUSY = 0x01;
        const WRITE_ENABLED = 0x02;
    }
}

/// One opcode-level transaction: the unit of work of every encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterTransaction {
    pub opcode: OpCode,
    pub address: u32,
    pub size: usize,
    pub crc_retries: u16,
    pub pre_ready_timeout_ms: u64,
    pub post_ready_timeout_ms: u64,
    pub wait_after_opcode_ms: u64,
}

impl RegisterTransaction {
    /// Read transaction, no CRC checking and no ready-check by default
    pub fn read(opcode: OpCode, address: u32, size: usize) -> Self {
        Self {
            opcode,
            address,
            size,
            crc_retries: DEFAULT_READ_CRC_RETRIES,
            pre_ready_timeout_ms: 0,
            post_ready_timeout_ms: 0,
            wait_after_opcode_ms: 0,
        }
    }

    /// Write transaction, followed by a 10 s ready-poll by default
    pub fn write(opcode: OpCode, address: u32, size: usize) -> Self {
        Self {
            post_ready_timeout_ms: DEFAULT_POST_READY_TIMEOUT_MS,
            crc_retries: 0,
            ..Self::read(opcode, address, size)
        }
    }

    pub fn with_crc_retries(mut self, crc_retries: u16) -> Self {
        self.crc_retries = crc_retries;
        self
    }

    pub fn with_pre_ready_timeout(mut self, timeout_ms: u64) -> Self {
        self.pre_ready_timeout_ms = timeout_ms;
        self
    }

    pub fn with_post_ready_timeout(mut self, timeout_ms: u64) -> Self {
        self.post_ready_timeout_ms = timeout_ms;
        self
    }

    pub fn with_wait_after_opcode(mut self, wait_ms: u64) -> Self {
        self.wait_after_opcode_ms = wait_ms;
        self
    }

    /// Ready-check to run before a READ, 0 when none
    pub fn pre_ready_timeout(&self, always_ready_check: bool) -> u64 {
        if self.opcode != OpCode::Read {
            return 0;
        }
        let forced = if always_ready_check {
            ALWAYS_READY_TIMEOUT_MS
        } else {
            0
        };
        self.pre_ready_timeout_ms.max(forced)
    }

    /// Number of transport attempts the CRC budget allows
    pub fn attempts(&self) -> u16 {
        self.crc_retries.max(1)
    }
}

/// Engine tuning shared by every encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniversalSettings {
    pub always_ready_check: bool,
    pub ready_poll_interval_ms: u64,
    pub device_type_address: u32,
    pub reset_wait_ms: u64,
    pub reboot_timeout_ms: u64,
}

impl Default for UniversalSettings {
    fn default() -> Self {
        Self {
            always_ready_check: false,
            ready_poll_interval_ms: 10,
            device_type_address: DEVICE_TYPE_ADDRESS_OLD,
            reset_wait_ms: 100,
            reboot_timeout_ms: 10_000,
        }
    }
}

impl Config for UniversalSettings {
    fn validate(&self) -> Result<()> {
        if self.ready_poll_interval_ms == 0 {
            return Err(SensorError::InvalidParameter(
                "ready poll interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Transport-level capability every encoder provides
pub trait TransportEncoder: SensorConnection {
    /// Runs a read transaction; the data lands in [`output_payload`](Self::output_payload)
    fn read(&mut self, transaction: &RegisterTransaction) -> Result<()>;

    /// Runs a write transaction with the data staged in [`input_payload`](Self::input_payload)
    fn write(&mut self, transaction: &RegisterTransaction) -> Result<()>;

    fn reset(&mut self, reset_type: ResetType, enter_bootloader: bool) -> Result<()>;

    /// Brings the link up without running the device bring-up
    fn raw_connect(&mut self) -> Result<()>;

    /// Largest transaction the transfer buffers hold
    fn payload_capacity(&self) -> usize;
    fn input_payload(&mut self) -> &mut [u8];
    fn output_payload(&self) -> &[u8];

    fn settings(&self) -> &UniversalSettings;
    fn settings_mut(&mut self) -> &mut UniversalSettings;

    fn resize_buffers(&mut self, size: usize);
}

/// Register-level operations built on any [`TransportEncoder`]
pub trait UniversalProtocol: TransportEncoder {
    fn read_register(&mut self, address: u32, buffer: &mut [u8], crc_retries: u16) -> Result<()> {
        let transaction = RegisterTransaction::read(OpCode::Read, address, buffer.len())
            .with_crc_retries(crc_retries);
        self.read_data(&transaction, buffer)
    }

    /// Write-enable, write, write-disable. The latch is cleared even when the write fails.
    fn write_register(&mut self, address: u32, data: &[u8], crc_retries: u16) -> Result<()> {
        check_capacity(self.payload_capacity(), data.len())?;
        let transaction = RegisterTransaction::write(OpCode::Write, address, data.len())
            .with_crc_retries(crc_retries);

        let outcome = self.set_write_enable(true, 0).and_then(|()| {
            self.input_payload()[..data.len()].copy_from_slice(data);
            self.write(&transaction)
        });

        match outcome {
            Ok(()) => self.set_write_enable(false, 0),
            Err(err) => {
                if let Err(cleanup) = self.set_write_enable(false, 0) {
                    warn!(%cleanup, "Failed to clear write enable after a failed write");
                }
                Err(err)
            }
        }
    }

    /// Runs `transaction` and copies its result into `buffer`
    fn read_data(&mut self, transaction: &RegisterTransaction, buffer: &mut [u8]) -> Result<()> {
        check_capacity(self.payload_capacity(), buffer.len())?;
        self.read(transaction)?;
        buffer.copy_from_slice(&self.output_payload()[..buffer.len()]);
        Ok(())
    }

    /// Stages `data` then runs `transaction`
    fn write_data(&mut self, transaction: &RegisterTransaction, data: &[u8]) -> Result<()> {
        check_capacity(self.payload_capacity(), data.len())?;
        self.input_payload()[..data.len()].copy_from_slice(data);
        self.write(transaction)
    }

    fn get_status_register(&mut self, crc_retries: u16) -> Result<u8> {
        let transaction =
            RegisterTransaction::read(OpCode::ReadStatus, 0, 1).with_crc_retries(crc_retries);
        self.read(&transaction)?;
        Ok(self.output_payload()[0])
    }

    /// Polls the busy bit until it clears. Errors while polling count as "busy".
    fn is_device_ready(&mut self, timeout_ms: u64, crc_retries: u16) -> bool {
        let interval = self.settings().ready_poll_interval_ms.max(1);
        let mut remaining = timeout_ms;
        while remaining > 0 {
            match self.get_status_register(crc_retries) {
                Ok(status) if status & StatusRegister::BUSY.bits() == 0 => return true,
                Ok(_) => {}
                Err(err) => debug!(%err, "Status read failed while polling for ready"),
            }
            thread::sleep(Duration::from_millis(interval));
            remaining = remaining.saturating_sub(interval);
        }
        false
    }

    fn is_write_enabled(&mut self, crc_retries: u16) -> Result<bool> {
        let status = self.get_status_register(crc_retries)?;
        Ok(status & StatusRegister::WRITE_ENABLED.bits() != 0 && status != 0xFF)
    }

    fn set_write_enable(&mut self, enable: bool, crc_retries: u16) -> Result<()> {
        let opcode = if enable {
            OpCode::WriteEnable
        } else {
            OpCode::WriteDisable
        };
        self.write(&RegisterTransaction::write(opcode, 0, 0).with_crc_retries(crc_retries))?;
        if self.is_write_enabled(0)? != enable {
            return Err(SensorError::Protocol(
                "Error to set write enable status".into(),
            ));
        }
        Ok(())
    }

    /// Device bring-up shared by every transport
    fn universal_init(&mut self) -> Result<()> {
        let mut device_type = [0u8; 2];
        let address = self.settings().device_type_address;
        self.read_register(address, &mut device_type, 5)?;
        let device_type = u16::from_le_bytes(device_type);
        self.set_device_type(device_type);

        // Secure (CRC) transfers
        self.write_register(SECURE_TRANSFER_ADDRESS, &[1], 0)?;
        // Ready pin no longer deasserts on trace
        self.write_register(READY_DEASSERTING_ADDRESS, &[3], DEFAULT_WRITE_CRC_RETRIES)?;
        // Partial blocking
        self.write_register(TRANSFER_MODE_ADDRESS, &[0], DEFAULT_WRITE_CRC_RETRIES)?;

        info!("Sensor initialized, device type 0x{:04x}", device_type);
        Ok(())
    }

    fn set_always_ready_check(&mut self, value: bool) {
        self.settings_mut().always_ready_check = value;
    }

    fn set_ready_poll_interval(&mut self, interval_ms: u64) {
        self.settings_mut().ready_poll_interval_ms = interval_ms;
    }
}

impl<T: TransportEncoder + ?Sized> UniversalProtocol for T {}

pub(crate) fn check_capacity(capacity: usize, requested: usize) -> Result<()> {
    if requested > capacity {
        return Err(SensorError::BufferOverflow {
            requested,
            capacity,
        });
    }
    Ok(())
}

/// Ready-check before a transaction, when one applies
pub(crate) fn ready_before<E: UniversalProtocol + ?Sized>(
    encoder: &mut E,
    transaction: &RegisterTransaction,
) -> Result<()> {
    let timeout = transaction.pre_ready_timeout(encoder.settings().always_ready_check);
    if timeout > 0 && !encoder.is_device_ready(timeout, 0) {
        return Err(SensorError::ready_timeout(format!(
            "Timeout expired. Device not ready for other operation (timeout: {timeout} ms)"
        )));
    }
    Ok(())
}

/// Ready-poll after a transaction, when one applies
pub(crate) fn ready_after<E: UniversalProtocol + ?Sized>(encoder: &mut E, timeout_ms: u64) -> Result<()> {
    if timeout_ms > 0 && !encoder.is_device_ready(timeout_ms, 0) {
        return Err(SensorError::ready_timeout(format!(
            "Timeout expired. Device not ready for other operation (timeout: {timeout_ms} ms)"
        )));
    }
    Ok(())
}

/// SWRST, then wait for the sensor to come back
pub(crate) fn soft_reset<E: UniversalProtocol + ?Sized>(
    encoder: &mut E,
    transaction: &RegisterTransaction,
) -> Result<()> {
    encoder.write(transaction)?;
    thread::sleep(Duration::from_millis(encoder.settings().reset_wait_ms));
    let timeout = encoder.settings().reboot_timeout_ms;
    if !encoder.is_device_ready(timeout, 0) {
        return Err(SensorError::ready_timeout(
            "Device never rebooted after software reset",
        ));
    }
    info!("Sensor rebooted after software reset");
    Ok(())
}
