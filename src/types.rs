use serde::{Deserialize, Serialize};

/// CAN ID type
pub type CanId = u32;

/// Number of payload bytes in a classic CAN frame
pub const CAN_DATA_SIZE: usize = 8;

/// Highest number of detection frames a sensor streams after its base ID
pub const CAN_MAX_DETECTIONS: u32 = 96;

// Device types reported by the device-type register or the server id
pub const DEVICE_TYPE_INVALID: u16 = 0x0000;
pub const DEVICE_TYPE_M16_EVALKIT: u16 = 0x0007;
pub const DEVICE_TYPE_IS16: u16 = 0x0008;
pub const DEVICE_TYPE_M16: u16 = 0x0009;
pub const DEVICE_TYPE_VU8: u16 = 0x000D;
pub const DEVICE_TYPE_M16_LASER: u16 = 0x000E;

/// 8-byte CAN frame split as {command, sub-command, 6 argument bytes}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanFrame {
    pub id: CanId,
    pub data: [u8; CAN_DATA_SIZE],
}

impl CanFrame {
    pub fn new(id: CanId, data: [u8; CAN_DATA_SIZE]) -> Self {
        Self { id, data }
    }

    /// Builds a command frame with zeroed arguments
    pub fn command(cmd: u8, sub_cmd: u8) -> Self {
        let mut data = [0u8; CAN_DATA_SIZE];
        data[0] = cmd;
        data[1] = sub_cmd;
        Self { id: 0, data }
    }

    /// Copies up to 8 bytes into a frame, zero-padding the rest
    pub fn from_slice(id: CanId, bytes: &[u8]) -> Self {
        let mut data = [0u8; CAN_DATA_SIZE];
        let len = bytes.len().min(CAN_DATA_SIZE);
        data[..len].copy_from_slice(&bytes[..len]);
        Self { id, data }
    }

    pub fn cmd(&self) -> u8 {
        self.data[0]
    }

    pub fn sub_cmd(&self) -> u8 {
        self.data[1]
    }

    pub fn args(&self) -> &[u8] {
        &self.data[2..]
    }

    pub fn args_mut(&mut self) -> &mut [u8] {
        &mut self.data[2..]
    }

    /// Sensor-side failure marker: all six argument bytes set to 0xFF
    pub fn is_failure_marker(&self) -> bool {
        self.args().iter().all(|&b| b == 0xFF)
    }
}

/// Reset strategies understood by the encoders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetType {
    Soft,
    Hard,
    Config,
}

/// Configuration trait that must be implemented by all descriptors and tuning structs
pub trait Config: Send + Sync {
    fn validate(&self) -> crate::error::Result<()>;
}
