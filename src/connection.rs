//! Connection descriptors and the base connection every encoder builds on.
//!
//! A descriptor ([`ConnectionInfo`]) is created once at discovery time and carries the
//! transport-specific addressing. A [`Connection`] owns a descriptor, the sub-interface it
//! talks through and a pair of transfer buffers sized to the transport frame budget.
//!
//! Descriptors can be stored in host configuration files:
//!
//! ```rust
//! use libsensorcomm::connection::ConnectionInfo;
//!
//! let info: ConnectionInfo = toml::from_str(
//!     r#"
//!     type = "can"
//!     address = "0"
//!     port = 0
//!     base_id_tx = 0x752
//!     base_id_rx = 0x742
//!     "#,
//! ).unwrap();
//! assert!(info.as_can().is_some());
//! ```

use crate::error::{Result, SensorError};
use crate::physical::can::CanBitrate;
use crate::types::{CanId, Config};
use serde::{Deserialize, Serialize};

/// Highest 11-bit identifier
const STANDARD_ID_MAX: CanId = 0x7FF;
/// Highest 29-bit identifier
const EXTENDED_ID_MAX: CanId = 0x1FFF_FFFF;

/// SPI descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiConnectionInfo {
    description: String,
    address: String,
    chip_address: u32,
    clock_khz: u32,
}

impl Default for SpiConnectionInfo {
    fn default() -> Self {
        Self {
            description: String::new(),
            address: "0".into(),
            chip_address: 0,
            clock_khz: 1000,
        }
    }
}

impl SpiConnectionInfo {
    /// Creates a descriptor for the SPI device at `chip_address`
    pub fn new(description: impl Into<String>, chip_address: u32) -> Self {
        Self {
            description: description.into(),
            address: chip_address.to_string(),
            chip_address,
            ..Default::default()
        }
    }

    pub fn with_clock(mut self, clock_khz: u32) -> Self {
        self.clock_khz = clock_khz;
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn chip_address(&self) -> u32 {
        self.chip_address
    }

    pub fn clock_khz(&self) -> u32 {
        self.clock_khz
    }
}

impl Config for SpiConnectionInfo {
    fn validate(&self) -> Result<()> {
        if self.clock_khz == 0 {
            return Err(SensorError::InvalidParameter("SPI clock must be non-zero".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Modbus-RTU descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusConnectionInfo {
    description: String,
    address: String,
    serial_port: String,
    baud_rate: u32,
    parity: Parity,
    data_bits: u8,
    stop_bits: u8,
    modbus_address: u8,
}

impl Default for ModbusConnectionInfo {
    fn default() -> Self {
        Self {
            description: String::new(),
            address: String::new(),
            serial_port: String::new(),
            baud_rate: 115_200,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: 1,
            modbus_address: 1,
        }
    }
}

impl ModbusConnectionInfo {
    pub fn new(description: impl Into<String>, serial_port: impl Into<String>, modbus_address: u8) -> Self {
        let serial_port = serial_port.into();
        Self {
            description: description.into(),
            address: serial_port.clone(),
            serial_port,
            modbus_address,
            ..Default::default()
        }
    }

    pub fn with_serial_settings(mut self, baud_rate: u32, parity: Parity, data_bits: u8, stop_bits: u8) -> Self {
        self.baud_rate = baud_rate;
        self.parity = parity;
        self.data_bits = data_bits;
        self.stop_bits = stop_bits;
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn serial_port(&self) -> &str {
        &self.serial_port
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn parity(&self) -> Parity {
        self.parity
    }

    pub fn data_bits(&self) -> u8 {
        self.data_bits
    }

    pub fn stop_bits(&self) -> u8 {
        self.stop_bits
    }

    pub fn modbus_address(&self) -> u8 {
        self.modbus_address
    }
}

impl Config for ModbusConnectionInfo {
    fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(SensorError::InvalidParameter("baud rate must be non-zero".into()));
        }
        if !(1..=247).contains(&self.modbus_address) {
            return Err(SensorError::InvalidParameter(format!(
                "modbus address {} out of range",
                self.modbus_address
            )));
        }
        if !matches!(self.data_bits, 7 | 8) || !matches!(self.stop_bits, 1 | 2) {
            return Err(SensorError::InvalidParameter("unsupported serial framing".into()));
        }
        Ok(())
    }
}

/// CAN descriptor
///
/// `base_id_tx` is the first identifier the sensor transmits on (sensor to host),
/// `base_id_rx` the identifier the sensor listens on (host to sensor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanConnectionInfo {
    description: String,
    address: String,
    port: u16,
    channel: u8,
    speed_kbps: u32,
    base_id_tx: CanId,
    base_id_rx: CanId,
    standard_frame_format: bool,
}

impl Default for CanConnectionInfo {
    fn default() -> Self {
        Self {
            description: String::new(),
            address: "0".into(),
            port: 0,
            channel: 0,
            speed_kbps: 1000,
            base_id_tx: 0x750,
            base_id_rx: 0x740,
            standard_frame_format: true,
        }
    }
}

impl CanConnectionInfo {
    pub fn new(description: impl Into<String>, port: u16) -> Self {
        Self {
            description: description.into(),
            address: port.to_string(),
            port,
            ..Default::default()
        }
    }

    pub fn with_base_ids(mut self, base_id_tx: CanId, base_id_rx: CanId) -> Self {
        self.base_id_tx = base_id_tx;
        self.base_id_rx = base_id_rx;
        self
    }

    pub fn with_speed(mut self, speed_kbps: u32) -> Self {
        self.speed_kbps = speed_kbps;
        self
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_extended_frames(mut self) -> Self {
        self.standard_frame_format = false;
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn speed_kbps(&self) -> u32 {
        self.speed_kbps
    }

    pub fn base_id_tx(&self) -> CanId {
        self.base_id_tx
    }

    pub fn base_id_rx(&self) -> CanId {
        self.base_id_rx
    }

    pub fn standard_frame_format(&self) -> bool {
        self.standard_frame_format
    }
}

impl Config for CanConnectionInfo {
    fn validate(&self) -> Result<()> {
        if CanBitrate::from_kbps(self.speed_kbps).is_none() {
            return Err(SensorError::InvalidParameter(format!(
                "unsupported CAN speed {} kbps",
                self.speed_kbps
            )));
        }
        let max_id = if self.standard_frame_format {
            STANDARD_ID_MAX
        } else {
            EXTENDED_ID_MAX
        };
        if self.base_id_tx > max_id || self.base_id_rx > max_id {
            return Err(SensorError::InvalidParameter(format!(
                "base ids 0x{:x}/0x{:x} do not fit the frame format",
                self.base_id_tx, self.base_id_rx
            )));
        }
        Ok(())
    }
}

/// Transport-specific descriptor, immutable after discovery except for its address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionInfo {
    Spi(SpiConnectionInfo),
    Modbus(ModbusConnectionInfo),
    Can(CanConnectionInfo),
}

impl ConnectionInfo {
    pub fn description(&self) -> &str {
        match self {
            ConnectionInfo::Spi(info) => info.description(),
            ConnectionInfo::Modbus(info) => info.description(),
            ConnectionInfo::Can(info) => info.description(),
        }
    }

    pub fn address(&self) -> &str {
        match self {
            ConnectionInfo::Spi(info) => info.address(),
            ConnectionInfo::Modbus(info) => info.address(),
            ConnectionInfo::Can(info) => info.address(),
        }
    }

    /// The only mutation a descriptor accepts after creation
    pub fn set_address(&mut self, address: impl Into<String>) {
        let address = address.into();
        match self {
            ConnectionInfo::Spi(info) => info.address = address,
            ConnectionInfo::Modbus(info) => info.address = address,
            ConnectionInfo::Can(info) => info.address = address,
        }
    }

    pub fn as_spi(&self) -> Option<&SpiConnectionInfo> {
        match self {
            ConnectionInfo::Spi(info) => Some(info),
            _ => None,
        }
    }

    pub fn as_modbus(&self) -> Option<&ModbusConnectionInfo> {
        match self {
            ConnectionInfo::Modbus(info) => Some(info),
            _ => None,
        }
    }

    pub fn as_can(&self) -> Option<&CanConnectionInfo> {
        match self {
            ConnectionInfo::Can(info) => Some(info),
            _ => None,
        }
    }
}

impl Config for ConnectionInfo {
    fn validate(&self) -> Result<()> {
        match self {
            ConnectionInfo::Spi(info) => info.validate(),
            ConnectionInfo::Modbus(info) => info.validate(),
            ConnectionInfo::Can(info) => info.validate(),
        }
    }
}

impl From<SpiConnectionInfo> for ConnectionInfo {
    fn from(info: SpiConnectionInfo) -> Self {
        ConnectionInfo::Spi(info)
    }
}

impl From<ModbusConnectionInfo> for ConnectionInfo {
    fn from(info: ModbusConnectionInfo) -> Self {
        ConnectionInfo::Modbus(info)
    }
}

impl From<CanConnectionInfo> for ConnectionInfo {
    fn from(info: CanConnectionInfo) -> Self {
        ConnectionInfo::Can(info)
    }
}

/// Input/output transfer buffers of one connection
#[derive(Debug, Clone, Default)]
pub struct TransferBuffers {
    input: Vec<u8>,
    output: Vec<u8>,
}

impl TransferBuffers {
    pub fn new(size: usize) -> Self {
        Self {
            input: vec![0; size],
            output: vec![0; size],
        }
    }

    pub fn len(&self) -> usize {
        self.input.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    /// Resizes both buffers. The first `min(old, new)` bytes are kept, growth is zeroed.
    pub fn resize(&mut self, size: usize) {
        self.input.resize(size, 0);
        self.output.resize(size, 0);
        self.input.shrink_to_fit();
        self.output.shrink_to_fit();
    }

    pub fn clear(&mut self) {
        self.input.fill(0);
        self.output.fill(0);
    }

    pub fn input(&self) -> &[u8] {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut [u8] {
        &mut self.input
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut [u8] {
        &mut self.output
    }

    /// Both buffers at once, for encoders that stage a request while decoding an answer
    pub fn split_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        (&mut self.input, &mut self.output)
    }
}

/// Lifecycle shared by every sensor-facing connection
pub trait SensorConnection {
    fn connect(&mut self) -> Result<()>;
    fn disconnect(&mut self) -> Result<()>;
    fn is_connected(&self) -> bool;

    /// Device bring-up after the link is open
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn connection_info(&self) -> ConnectionInfo;
    fn device_type(&self) -> u16;
    fn set_device_type(&mut self, device_type: u16);
}

/// Base connection: owns a descriptor, a sub-interface and the transfer buffers.
///
/// Lending an interface instead of transferring it is done by instantiating with
/// `&mut T`; the physical traits are implemented for mutable references and boxes.
#[derive(Debug)]
pub struct Connection<D, I> {
    info: D,
    interface: I,
    buffers: TransferBuffers,
    device_type: u16,
}

impl<D, I> Connection<D, I> {
    pub fn new(info: D, interface: I, buffer_size: usize) -> Self {
        Self {
            info,
            interface,
            buffers: TransferBuffers::new(buffer_size),
            device_type: 0,
        }
    }

    pub fn info(&self) -> &D {
        &self.info
    }

    pub fn interface(&self) -> &I {
        &self.interface
    }

    pub fn interface_mut(&mut self) -> &mut I {
        &mut self.interface
    }

    pub fn buffers(&self) -> &TransferBuffers {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut TransferBuffers {
        &mut self.buffers
    }

    /// Interface and buffers borrowed together
    pub fn parts_mut(&mut self) -> (&mut I, &mut TransferBuffers) {
        (&mut self.interface, &mut self.buffers)
    }

    pub fn resize_buffers(&mut self, size: usize) {
        self.buffers.resize(size);
    }

    pub fn device_type(&self) -> u16 {
        self.device_type
    }

    pub fn set_device_type(&mut self, device_type: u16) {
        self.device_type = device_type;
    }

    /// Gives the descriptor and the sub-interface back to the caller
    pub fn into_parts(self) -> (D, I) {
        (self.info, self.interface)
    }
}
