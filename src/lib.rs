// Layer modules
pub mod application; // Direct CAN protocol and handle factory
pub mod network; // Shared CAN adapter with master/slave routing
pub mod physical; // SPI, Modbus and CAN driver boundaries
pub mod transport; // Universal register protocol and its encoders

// Re-exports for convenience
pub use application::{factory, CanProtocol, SensorFamily};
pub use network::{CanInterface, CanNetwork};
pub use transport::{can, modbus, spi, universal, TransportEncoder, UniversalProtocol};

// Common types and traits
pub mod connection;
pub mod error;
pub mod types;

pub use connection::{ConnectionInfo, SensorConnection};
pub use error::{Result, SensorError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
