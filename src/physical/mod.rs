//! Physical layer: the transport primitives the encoders drive.
//!
//! This module only declares the boundary to the vendor drivers:
//! - SPI with chip-select and GPIO control
//! - Modbus-RTU raw request/confirmation exchange
//! - CAN adapters with non-blocking frame reads
//!
//! Drivers are expected to be blocking for SPI and Modbus, and non-blocking for CAN
//! reads. The in-memory devices of the `mock` feature implement the same traits.
//!
//! # Examples
//!
//! ```rust
//! use libsensorcomm::physical::{mock_spi::MockSpiDevice, PhysicalLayer};
//!
//! let mut spi = MockSpiDevice::new();
//! spi.connect().unwrap();
//! assert!(spi.is_connected());
//! ```

pub mod can;
pub mod modbus;
pub mod spi;

#[cfg(any(test, feature = "mock"))]
pub mod mock;
#[cfg(any(test, feature = "mock"))]
pub mod mock_modbus;
#[cfg(any(test, feature = "mock"))]
pub mod mock_spi;

use crate::error::Result;

/// Link lifecycle shared by SPI and Modbus interfaces
pub trait PhysicalLayer: Send {
    fn connect(&mut self) -> Result<()>;
    fn disconnect(&mut self) -> Result<()>;
    fn is_connected(&self) -> bool;
}

impl<T: PhysicalLayer + ?Sized> PhysicalLayer for &mut T {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn disconnect(&mut self) -> Result<()> {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}

impl<T: PhysicalLayer + ?Sized> PhysicalLayer for Box<T> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn disconnect(&mut self) -> Result<()> {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
