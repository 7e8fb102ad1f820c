//! Network layer: sharing one CAN adapter between several logical sensor connections.
//!
//! The first [`CanInterface`] built on a driver is the master. It owns the adapter and
//! the routing table. Interfaces attached to it afterwards are slaves: they go through
//! the same shared bus, and frames read by anyone are routed by CAN ID to the inbox of
//! the connection whose range contains them.
//!
//! # Examples
//!
//! ```rust
//! use libsensorcomm::connection::CanConnectionInfo;
//! use libsensorcomm::network::{CanInterface, CanNetwork};
//! use libsensorcomm::physical::mock::MockCanDriver;
//!
//! let driver = MockCanDriver::new();
//! let master = CanInterface::new(CanConnectionInfo::new("CAN 0", 0), driver).unwrap();
//! let slave = CanInterface::attach(
//!     CanConnectionInfo::new("CAN 0", 0).with_base_ids(0x850, 0x840),
//!     &master,
//! )
//! .unwrap();
//!
//! assert!(master.is_master());
//! assert!(!slave.is_master());
//! ```

pub mod can_bus;

pub use can_bus::{CanInterface, CanTiming};

use crate::connection::CanConnectionInfo;
use crate::error::Result;
use crate::types::{CanFrame, CanId};

/// Routed CAN access seen by one logical sensor connection
pub trait CanNetwork: Send {
    fn info(&self) -> &CanConnectionInfo;
    fn connect(&mut self) -> Result<()>;
    fn disconnect(&mut self) -> Result<()>;
    fn is_connected(&self) -> bool;

    /// One non-blocking adapter read. Returns true when the frame was routed to this connection.
    fn read(&mut self) -> Result<bool>;
    fn write(&mut self, id: CanId, data: &[u8]) -> Result<()>;

    /// Writes then polls until a frame for this connection arrives.
    /// Returns false when no answer came within the polling budget.
    fn write_and_wait_for_answer(&mut self, id: CanId, data: &[u8]) -> Result<bool>;

    /// Pops the oldest frame routed to this connection
    fn take_received(&mut self) -> Option<CanFrame>;

    fn drain_received(&mut self) -> Vec<CanFrame> {
        std::iter::from_fn(|| self.take_received()).collect()
    }
}

impl<T: CanNetwork + ?Sized> CanNetwork for Box<T> {
    fn info(&self) -> &CanConnectionInfo {
        (**self).info()
    }

    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn disconnect(&mut self) -> Result<()> {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn read(&mut self) -> Result<bool> {
        (**self).read()
    }

    fn write(&mut self, id: CanId, data: &[u8]) -> Result<()> {
        (**self).write(id, data)
    }

    fn write_and_wait_for_answer(&mut self, id: CanId, data: &[u8]) -> Result<bool> {
        (**self).write_and_wait_for_answer(id, data)
    }

    fn take_received(&mut self) -> Option<CanFrame> {
        (**self).take_received()
    }
}

impl<T: CanNetwork + ?Sized> CanNetwork for &mut T {
    fn info(&self) -> &CanConnectionInfo {
        (**self).info()
    }

    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn disconnect(&mut self) -> Result<()> {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn read(&mut self) -> Result<bool> {
        (**self).read()
    }

    fn write(&mut self, id: CanId, data: &[u8]) -> Result<()> {
        (**self).write(id, data)
    }

    fn write_and_wait_for_answer(&mut self, id: CanId, data: &[u8]) -> Result<bool> {
        (**self).write_and_wait_for_answer(id, data)
    }

    fn take_received(&mut self) -> Option<CanFrame> {
        (**self).take_received()
    }
}
