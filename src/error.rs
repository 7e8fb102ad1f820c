use thiserror::Error;

#[derive(Debug, Error)]
pub enum SensorError {
    // Link errors
    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Timeout: {message}")]
    Timeout {
        message: String,
        likely_disconnected: bool,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    /// CAN adapter reported a bus event while reading
    #[error("Event error")]
    Event,

    // Protocol errors
    #[error("CRC error on transaction{}", crc_context(.context))]
    Crc { context: Option<String> },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Write operation failed: {info}. Address: {address:x} size: {size}")]
    TransactionFailed {
        info: String,
        address: u32,
        size: usize,
    },

    // Generic errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Buffer overflow: {requested} bytes requested, capacity is {capacity}")]
    BufferOverflow { requested: usize, capacity: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl SensorError {
    pub fn timeout(message: impl Into<String>) -> Self {
        SensorError::Timeout {
            message: message.into(),
            likely_disconnected: false,
        }
    }

    /// Timeout raised by a ready-poll, which usually means the link dropped.
    pub fn ready_timeout(message: impl Into<String>) -> Self {
        SensorError::Timeout {
            message: message.into(),
            likely_disconnected: true,
        }
    }

    /// Attaches address/size context to a CRC failure. Other variants pass through.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        match self {
            SensorError::Crc { .. } => SensorError::Crc {
                context: Some(context.into()),
            },
            other => other,
        }
    }

    pub fn is_crc(&self) -> bool {
        matches!(self, SensorError::Crc { .. })
    }

    pub fn is_event(&self) -> bool {
        matches!(self, SensorError::Event)
    }

    pub fn likely_disconnected(&self) -> bool {
        matches!(
            self,
            SensorError::Timeout {
                likely_disconnected: true,
                ..
            }
        )
    }
}

fn crc_context(context: &Option<String>) -> String {
    context
        .as_ref()
        .map(|c| format!(" ({c})"))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, SensorError>;
