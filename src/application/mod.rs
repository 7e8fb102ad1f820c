//! Application layer: protocol handles sensor code talks to.
//!
//! - [`can_protocol`] implements the direct command/sub-command CAN protocol with its
//!   configuration and detection queues
//! - [`factory`] builds the right handle from a descriptor and a device type
//!
//! Register-level access through the Universal protocol lives in
//! [`crate::transport`]; this layer only selects and wires it.
//!
//! # Examples
//!
//! ```rust
//! use libsensorcomm::application::factory;
//! use libsensorcomm::application::SensorFamily;
//! use libsensorcomm::connection::CanConnectionInfo;
//! use libsensorcomm::network::CanInterface;
//! use libsensorcomm::physical::mock::MockCanDriver;
//! use libsensorcomm::types::DEVICE_TYPE_M16;
//!
//! let interface = CanInterface::new(CanConnectionInfo::new("CAN 0", 0), MockCanDriver::new()).unwrap();
//! let protocol = factory::can_protocol(interface, DEVICE_TYPE_M16).unwrap();
//! assert_eq!(protocol.family(), SensorFamily::M16);
//! assert!(!protocol.is_streaming());
//! ```

pub mod can_protocol;
pub mod factory;

pub use can_protocol::{CanProtocol, SensorFamily};
pub use factory::{universal_encoder, Link};
