use super::crc::{crc16, crc_check};
use super::universal::{
    check_capacity, ready_after, ready_before, soft_reset, OpCode, RegisterTransaction,
    TransactionInfo, TransportEncoder, UniversalProtocol, UniversalSettings,
    TRANSACTION_INFO_ADDRESS,
};
use crate::connection::{Connection, ConnectionInfo, SensorConnection, SpiConnectionInfo};
use crate::error::{Result, SensorError};
use crate::physical::spi::{SpiConfig, SpiInterface, SpiPin};
use crate::types::{Config, ResetType};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SPI_BUFFER_SIZE: usize = 2048;
/// Largest payload of one SPI write frame
pub const SPI_PAGE_SIZE: usize = 512;

const OPCODE_SIZE: usize = 1;
const ADDRESS_SIZE: usize = 3;
const LENGTH_SIZE: usize = 2;
const CRC_SIZE: usize = 2;
pub const HEADER_SIZE: usize = OPCODE_SIZE + ADDRESS_SIZE + LENGTH_SIZE;
pub const OVERHEAD_SIZE: usize = HEADER_SIZE + CRC_SIZE;

/// Delay between the header and the payload of a read
const HEADER_SETTLE: Duration = Duration::from_micros(1000);
const CRC_RETRY_DELAY: Duration = Duration::from_millis(1);
const TRANSACTION_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Encodes `[opcode][address:3 BE][size:2 BE]`
pub fn encode_header(opcode: u8, address: u32, size: u16) -> [u8; HEADER_SIZE] {
    let address = address.to_be_bytes();
    let size = size.to_be_bytes();
    [opcode, address[1], address[2], address[3], size[0], size[1]]
}

/// Reset line timing for hard resets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardResetTiming {
    pub pulse_ms: u64,
    pub settle_ms: u64,
}

impl Default for HardResetTiming {
    fn default() -> Self {
        Self {
            pulse_ms: 100,
            settle_ms: 2000,
        }
    }
}

/// Universal protocol over SPI
pub struct SpiEncoder<I: SpiInterface> {
    connection: Connection<SpiConnectionInfo, I>,
    write_buffer: Vec<u8>,
    settings: UniversalSettings,
    hard_reset: HardResetTiming,
}

impl<I: SpiInterface> SpiEncoder<I> {
    /// Creates a new SPI encoder owning the given interface
    pub fn new(info: SpiConnectionInfo, interface: I) -> Self {
        Self {
            connection: Connection::new(info, interface, SPI_BUFFER_SIZE + OVERHEAD_SIZE),
            write_buffer: vec![0; SPI_PAGE_SIZE + OVERHEAD_SIZE],
            settings: UniversalSettings::default(),
            hard_reset: HardResetTiming::default(),
        }
    }

    pub fn with_settings(mut self, settings: UniversalSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_hard_reset_timing(mut self, timing: HardResetTiming) -> Self {
        self.hard_reset = timing;
        self
    }

    pub fn interface(&self) -> &I {
        self.connection.interface()
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.connection.interface().is_connected() {
            return Err(SensorError::NotConnected("SPI device not connected".into()));
        }
        Ok(())
    }

    fn configure_link(&mut self) -> Result<()> {
        let config = SpiConfig::for_sensor(self.connection.info().clock_khz());
        config.validate()?;
        self.connection.interface_mut().configure(&config)
    }

    fn init_io(&mut self) -> Result<()> {
        let spi = self.connection.interface_mut();
        let mask = spi.pin_mask(&[
            SpiPin::Sck,
            SpiPin::Mosi,
            SpiPin::Miso,
            SpiPin::Cs,
            SpiPin::Reset,
            SpiPin::Gpio0,
            SpiPin::Gpio1,
            SpiPin::Gpio2,
        ]);
        let direction = mask & !spi.pin_mask(&[SpiPin::Miso]);
        let pins = spi.pin_mask(&[SpiPin::Sck, SpiPin::Mosi, SpiPin::Cs, SpiPin::Reset]);
        spi.init_gpio(direction)?;
        spi.write_gpio(mask, pins)
    }

    fn open_link(&mut self, with_init: bool) -> Result<()> {
        self.connection.interface_mut().connect()?;
        let mut outcome = self.configure_link().and_then(|()| self.init_io());
        if with_init {
            outcome = outcome.and_then(|()| self.universal_init());
        }
        if let Err(err) = outcome {
            warn!(%err, "SPI bring-up failed, disconnecting");
            if let Err(cleanup) = self.disconnect() {
                debug!(%cleanup, "Disconnect after failed bring-up also failed");
            }
            return Err(err);
        }
        info!(address = self.connection.info().address(), "SPI sensor connected");
        Ok(())
    }

    /// Pulses the reset line. SCK, MOSI and CS are held low when entering the bootloader.
    fn hard_reset(&mut self, enter_bootloader: bool) -> Result<()> {
        let spi = self.connection.interface_mut();
        let mask = spi.pin_mask(&[SpiPin::Sck, SpiPin::Mosi, SpiPin::Miso, SpiPin::Cs, SpiPin::Reset]);
        let direction = mask & !spi.pin_mask(&[SpiPin::Miso]);
        let pins = if enter_bootloader {
            0
        } else {
            spi.pin_mask(&[SpiPin::Sck, SpiPin::Mosi, SpiPin::Cs])
        };
        let reset = spi.pin_mask(&[SpiPin::Reset]);

        spi.init_gpio(direction)?;
        spi.write_gpio(mask, pins)?;
        thread::sleep(Duration::from_millis(self.hard_reset.pulse_ms));
        self.connection.interface_mut().write_gpio(mask, pins | reset)?;
        thread::sleep(Duration::from_millis(self.hard_reset.settle_ms));
        info!(enter_bootloader, "SPI sensor hard reset");
        self.configure_link()
    }

    fn read_transaction_info(&mut self) -> Result<u16> {
        let mut info = [0u8; 2];
        self.read_register(TRANSACTION_INFO_ADDRESS, &mut info, 0)?;
        Ok(u16::from_le_bytes(info))
    }

    fn write_page(&mut self, transaction: &RegisterTransaction, offset: usize, len: usize) -> Result<()> {
        let header = encode_header(
            transaction.opcode.code(),
            transaction.address.wrapping_add(offset as u32),
            len as u16,
        );
        let frame_len = HEADER_SIZE + len + CRC_SIZE;
        let attempts = transaction.attempts();

        for attempt in 1..=attempts {
            {
                let (spi, buffers) = self.connection.parts_mut();
                let frame = &mut self.write_buffer[..frame_len];
                frame[..HEADER_SIZE].copy_from_slice(&header);
                frame[HEADER_SIZE..HEADER_SIZE + len].copy_from_slice(
                    &buffers.input()[HEADER_SIZE + offset..HEADER_SIZE + offset + len],
                );
                let crc = crc16(&[&frame[..HEADER_SIZE + len]]);
                frame[HEADER_SIZE + len..].copy_from_slice(&crc.to_be_bytes());
                debug!(header = ?header, attempt, "SPI write frame");
                spi.transfer(frame, &mut buffers.output_mut()[..frame_len], true)?;
            }

            if transaction.wait_after_opcode_ms > 0 {
                thread::sleep(Duration::from_millis(transaction.wait_after_opcode_ms));
            }
            ready_after(self, transaction.post_ready_timeout_ms)?;

            if transaction.crc_retries == 0 {
                break;
            }
            let info = self.read_transaction_info()?;
            if info == 0 {
                break;
            }
            if attempt == attempts {
                return Err(SensorError::TransactionFailed {
                    info: TransactionInfo::describe(info).into(),
                    address: transaction.address,
                    size: transaction.size,
                });
            }
            warn!(
                info = TransactionInfo::describe(info),
                attempt, "SPI write rejected by sensor, retrying"
            );
            thread::sleep(TRANSACTION_RETRY_DELAY);
        }
        Ok(())
    }
}

impl<I: SpiInterface> SensorConnection for SpiEncoder<I> {
    fn connect(&mut self) -> Result<()> {
        self.open_link(true)
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.connection.interface().is_connected() {
            self.connection.interface_mut().disconnect()?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.interface().is_connected()
    }

    fn init(&mut self) -> Result<()> {
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

impl<I: SpiInterface> TransportEncoder for SpiEncoder<I> {
    fn read(&mut self, transaction: &RegisterTransaction) -> Result<()> {
        self.ensure_connected()?;
        ready_before(self, transaction)?;
        let size = transaction.size;
        check_capacity(self.payload_capacity(), size)?;

        let header = encode_header(transaction.opcode.code(), transaction.address, size as u16);
        let attempts = transaction.attempts();

        for attempt in 1..=attempts {
            let (spi, buffers) = self.connection.parts_mut();
            let (input, output) = buffers.split_mut();
            output[..size + OVERHEAD_SIZE].fill(0);
            input[..HEADER_SIZE].copy_from_slice(&header);

            spi.write(&input[..HEADER_SIZE], false)?;
            thread::sleep(HEADER_SETTLE);
            spi.read(&mut output[HEADER_SIZE..HEADER_SIZE + size + CRC_SIZE], true)?;

            if transaction.crc_retries == 0 {
                return Ok(());
            }
            let received = u16::from_be_bytes([
                output[HEADER_SIZE + size],
                output[HEADER_SIZE + size + 1],
            ]);
            match crc_check(&header, &output[HEADER_SIZE..HEADER_SIZE + size], received) {
                Ok(()) => return Ok(()),
                Err(err) if attempt == attempts => {
                    return Err(err.with_context(format!(
                        "Read address: 0x{:x} size: {}",
                        transaction.address, size
                    )));
                }
                Err(_) => {
                    warn!(
                        address = transaction.address,
                        size, attempt, "CRC mismatch on SPI read, retrying"
                    );
                    thread::sleep(CRC_RETRY_DELAY);
                }
            }
        }
        Ok(())
    }

    fn write(&mut self, transaction: &RegisterTransaction) -> Result<()> {
        self.ensure_connected()?;
        ready_before(self, transaction)?;
        check_capacity(self.payload_capacity(), transaction.size)?;

        // A zero-sized write still sends one frame carrying the opcode
        let mut sent = 0;
        loop {
            let len = (transaction.size - sent).min(SPI_PAGE_SIZE);
            self.write_page(transaction, sent, len)?;
            sent += len;
            if sent >= transaction.size {
                break;
            }
        }
        Ok(())
    }

    fn reset(&mut self, reset_type: ResetType, enter_bootloader: bool) -> Result<()> {
        self.ensure_connected()?;
        match reset_type {
            ResetType::Soft => soft_reset(self, &RegisterTransaction::write(OpCode::SoftReset, 0, 0)),
            ResetType::Hard => self.hard_reset(enter_bootloader),
            ResetType::Config => Err(SensorError::Configuration(
                "Reset type not implemented for this type of device".into(),
            )),
        }
    }

    fn raw_connect(&mut self) -> Result<()> {
        self.open_link(false)
    }

    fn payload_capacity(&self) -> usize {
        self.connection.buffers().len() - OVERHEAD_SIZE
    }

    fn input_payload(&mut self) -> &mut [u8] {
        &mut self.connection.buffers_mut().input_mut()[HEADER_SIZE..]
    }

    fn output_payload(&self) -> &[u8] {
        &self.connection.buffers().output()[HEADER_SIZE..]
    }

    fn settings(&self) -> &UniversalSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut UniversalSettings {
        &mut self.settings
    }

    fn resize_buffers(&mut self, size: usize) {
        self.connection.resize_buffers(size + OVERHEAD_SIZE);
    }
}

impl<I: SpiInterface> Drop for SpiEncoder<I> {
    fn drop(&mut self) {
        if let Err(err) = self.disconnect() {
            debug!(%err, "SPI disconnect on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_big_endian() {
        let header = encode_header(0x0B, 0x0012_3456, 0x0102);
        assert_eq!(header, [0x0B, 0x12, 0x34, 0x56, 0x01, 0x02]);
    }

    #[test]
    fn header_keeps_low_24_address_bits() {
        let header = encode_header(0x02, 0xFF00_0100, 2);
        assert_eq!(&header[1..4], &[0x00, 0x01, 0x00]);
    }
}
