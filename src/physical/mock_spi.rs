//! SPI device emulating a sensor behind the Universal SPI framing.

use super::mock::{RegisterSim, SharedSim};
use super::spi::{SpiConfig, SpiInterface, SpiPin};
use super::PhysicalLayer;
use crate::error::{Result, SensorError};
use crate::transport::crc::crc16;
use crate::transport::spi::HEADER_SIZE;
use crate::transport::universal::{OpCode, DEVICE_TYPE_ADDRESS_OLD};
use crate::types::DEVICE_TYPE_M16;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct SpiDeviceState {
    connected: bool,
    pending_header: Option<[u8; HEADER_SIZE]>,
    configs: Vec<SpiConfig>,
    gpio_direction: u32,
    gpio_writes: Vec<(u32, u32)>,
    transfers: Vec<[u8; HEADER_SIZE]>,
    read_frames: usize,
    corrupt_reads: u32,
    rejected_writes: u32,
}

/// Mock SPI device. Clones share the device and its register map.
#[derive(Clone)]
pub struct MockSpiDevice {
    state: Arc<Mutex<SpiDeviceState>>,
    sim: SharedSim,
}

impl Default for MockSpiDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSpiDevice {
    /// Creates a device reporting an M16 sensor at the legacy device-type address
    pub fn new() -> Self {
        Self::with_sim(RegisterSim::shared(DEVICE_TYPE_ADDRESS_OLD, DEVICE_TYPE_M16))
    }

    pub fn with_sim(sim: SharedSim) -> Self {
        Self {
            state: Arc::new(Mutex::new(SpiDeviceState::default())),
            sim,
        }
    }

    pub fn sim(&self) -> SharedSim {
        Arc::clone(&self.sim)
    }

    /// The CRC of the next `count` read answers is corrupted
    pub fn corrupt_next_reads(&self, count: u32) {
        self.state.lock().corrupt_reads = count;
    }

    /// The sensor rejects the next `count` write frames with a CRC failure
    pub fn fail_next_writes(&self, count: u32) {
        self.state.lock().rejected_writes = count;
    }

    /// Number of transfer frames sent with `opcode`
    pub fn transfers_with(&self, opcode: OpCode) -> usize {
        self.state
            .lock()
            .transfers
            .iter()
            .filter(|header| header[0] == opcode.code())
            .count()
    }

    /// Headers of every transfer frame, in order
    pub fn transfers(&self) -> Vec<[u8; HEADER_SIZE]> {
        self.state.lock().transfers.clone()
    }

    pub fn read_frames(&self) -> usize {
        self.state.lock().read_frames
    }

    pub fn configs(&self) -> Vec<SpiConfig> {
        self.state.lock().configs.clone()
    }

    pub fn gpio_direction(&self) -> u32 {
        self.state.lock().gpio_direction
    }

    /// Every `(mask, value)` pair written to the GPIOs
    pub fn gpio_writes(&self) -> Vec<(u32, u32)> {
        self.state.lock().gpio_writes.clone()
    }

    fn answer(&self, header: &[u8; HEADER_SIZE], size: usize) -> Vec<u8> {
        let address = u32::from_be_bytes([0, header[1], header[2], header[3]]);
        let mut sim = self.sim.lock();
        match OpCode::from_code(header[0]) {
            Some(OpCode::ReadStatus) => {
                let mut data = vec![0; size];
                if let Some(first) = data.first_mut() {
                    *first = sim.status();
                }
                data
            }
            _ => sim.peek(address, size),
        }
    }

    fn execute_frame(&self, frame: &[u8]) {
        let mut sim = self.sim.lock();
        let payload_end = frame.len() - 2;
        let expected = u16::from_be_bytes([frame[payload_end], frame[payload_end + 1]]);
        if crc16(&[&frame[..payload_end]]) != expected {
            sim.reject_write();
            return;
        }

        let address = u32::from_be_bytes([0, frame[1], frame[2], frame[3]]);
        let payload = &frame[HEADER_SIZE..payload_end];
        match OpCode::from_code(frame[0]) {
            Some(OpCode::Write) => {
                let mut state = self.state.lock();
                if state.rejected_writes > 0 {
                    state.rejected_writes -= 1;
                    sim.reject_write();
                } else {
                    sim.write(address, payload);
                }
            }
            _ => {
                sim.execute(frame[0], payload.first().copied().unwrap_or(0));
            }
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.state.lock().connected {
            return Err(SensorError::NotConnected("mock SPI device closed".into()));
        }
        Ok(())
    }
}

impl PhysicalLayer for MockSpiDevice {
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

impl SpiInterface for MockSpiDevice {
    fn configure(&mut self, config: &SpiConfig) -> Result<()> {
        self.ensure_connected()?;
        self.state.lock().configs.push(config.clone());
        Ok(())
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8], _end_transfer: bool) -> Result<()> {
        self.ensure_connected()?;
        if tx.len() < HEADER_SIZE + 2 {
            return Err(SensorError::Transport("SPI frame too short".into()));
        }
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&tx[..HEADER_SIZE]);
        self.state.lock().transfers.push(header);
        self.execute_frame(tx);
        rx.fill(0);
        Ok(())
    }

    fn read(&mut self, rx: &mut [u8], _end_transfer: bool) -> Result<()> {
        self.ensure_connected()?;
        let header = {
            let mut state = self.state.lock();
            state.read_frames += 1;
            state.pending_header.take()
        };
        let header = header.ok_or_else(|| SensorError::Transport("read without header".into()))?;

        let size = rx.len().saturating_sub(2);
        let data = self.answer(&header, size);
        let mut crc = crc16(&[&header, &data]);
        {
            let mut state = self.state.lock();
            if state.corrupt_reads > 0 {
                state.corrupt_reads -= 1;
                crc ^= 0x0100;
            }
        }
        rx[..size].copy_from_slice(&data);
        rx[size..].copy_from_slice(&crc.to_be_bytes());
        Ok(())
    }

    fn write(&mut self, tx: &[u8], _end_transfer: bool) -> Result<()> {
        self.ensure_connected()?;
        if tx.len() != HEADER_SIZE {
            return Err(SensorError::Transport("expected a read header".into()));
        }
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(tx);
        self.state.lock().pending_header = Some(header);
        Ok(())
    }

    fn init_gpio(&mut self, direction: u32) -> Result<()> {
        self.ensure_connected()?;
        self.state.lock().gpio_direction = direction;
        Ok(())
    }

    fn read_gpio(&mut self, mask: u32) -> Result<u32> {
        self.ensure_connected()?;
        let state = self.state.lock();
        let value = state
            .gpio_writes
            .iter()
            .fold(0, |pins, &(written_mask, value)| {
                (pins & !written_mask) | (value & written_mask)
            });
        Ok(value & mask)
    }

    fn write_gpio(&mut self, mask: u32, value: u32) -> Result<()> {
        self.ensure_connected()?;
        self.state.lock().gpio_writes.push((mask, value));
        Ok(())
    }

    fn gpio_pin(&self, pin: SpiPin) -> u8 {
        match pin {
            SpiPin::Sck => 0,
            SpiPin::Mosi => 1,
            SpiPin::Miso => 2,
            SpiPin::Cs => 3,
            SpiPin::Reset => 4,
            SpiPin::Gpio0 => 5,
            SpiPin::Gpio1 => 6,
            SpiPin::Gpio2 => 7,
        }
    }
}
