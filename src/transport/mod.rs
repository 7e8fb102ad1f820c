//! Transport layer: the Universal register protocol and its encoders.
//!
//! - [`universal`] holds the transport-independent engine
//! - [`spi`], [`modbus`] and [`can`] encode its transactions for each link
//!
//! # Examples
//!
//! ```rust
//! use libsensorcomm::connection::{SensorConnection, SpiConnectionInfo};
//! use libsensorcomm::physical::mock_spi::MockSpiDevice;
//! use libsensorcomm::transport::spi::SpiEncoder;
//! use libsensorcomm::transport::universal::UniversalProtocol;
//!
//! let device = MockSpiDevice::new();
//! let mut sensor = SpiEncoder::new(SpiConnectionInfo::new("SPI 0", 0), device);
//! sensor.connect().unwrap();
//!
//! sensor.write_register(0x100, &[0xAA, 0xBB], 2).unwrap();
//! let mut data = [0u8; 2];
//! sensor.read_register(0x100, &mut data, 2).unwrap();
//! assert_eq!(data, [0xAA, 0xBB]);
//! ```

pub mod can;
pub mod crc;
pub mod modbus;
pub mod spi;
pub mod universal;

pub use universal::{
    OpCode, RegisterTransaction, TransportEncoder, UniversalProtocol, UniversalSettings,
};

#[cfg(test)]
mod tests;
