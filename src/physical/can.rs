use crate::connection::CanConnectionInfo;
use crate::error::Result;
use crate::types::CanFrame;
use bitflags::bitflags;

/// CAN bitrate profiles adapters accept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanBitrate {
    Rate1M,   // 1Mbit/sec
    Rate800K, // 800kbit/sec
    Rate500K, // 500kbit/sec
    Rate250K, // 250kbit/sec
    Rate125K, // 125kbit/sec
    Rate100K, // 100kbit/sec
    Rate50K,  // 50kbit/sec
    Rate20K,  // 20kbit/sec
    Rate10K,  // 10kbit/sec
}

impl CanBitrate {
    /// Maps a descriptor speed in kbps to a profile
    pub fn from_kbps(kbps: u32) -> Option<Self> {
        match kbps {
            1000 => Some(CanBitrate::Rate1M),
            800 => Some(CanBitrate::Rate800K),
            500 => Some(CanBitrate::Rate500K),
            250 => Some(CanBitrate::Rate250K),
            125 => Some(CanBitrate::Rate125K),
            100 => Some(CanBitrate::Rate100K),
            50 => Some(CanBitrate::Rate50K),
            20 => Some(CanBitrate::Rate20K),
            10 => Some(CanBitrate::Rate10K),
            _ => None,
        }
    }

    pub fn bits_per_second(self) -> u32 {
        match self {
            CanBitrate::Rate1M => 1_000_000,
            CanBitrate::Rate800K => 800_000,
            CanBitrate::Rate500K => 500_000,
            CanBitrate::Rate250K => 250_000,
            CanBitrate::Rate125K => 125_000,
            CanBitrate::Rate100K => 100_000,
            CanBitrate::Rate50K => 50_000,
            CanBitrate::Rate20K => 20_000,
            CanBitrate::Rate10K => 10_000,
        }
    }
}

bitflags! {
    /// Bus events an adapter attaches to a read
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CanEvents: u32 {
        const NONE = 0;
        const BUS_STATE = 1;
        const BUS_ERROR = 2;
        const RX_OVERFLOW = 4;
        const TX_ERROR = 8;
        const POWER = 16;
    }
}

/// One non-blocking read result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriverFrame {
    pub frame: CanFrame,
    pub events: CanEvents,
}

impl DriverFrame {
    pub fn new(frame: CanFrame) -> Self {
        Self {
            frame,
            events: CanEvents::NONE,
        }
    }

    pub fn with_events(frame: CanFrame, events: CanEvents) -> Self {
        Self { frame, events }
    }
}

/// CAN adapter trait that must be implemented by platform-specific drivers
pub trait CanDriver: Send {
    /// Opens the adapter and applies port, channel and bitrate from the descriptor
    fn open(&mut self, info: &CanConnectionInfo) -> Result<()>;
    fn close(&mut self) -> Result<()>;

    /// Non-blocking read, `None` when nothing is pending
    fn read(&mut self) -> Result<Option<DriverFrame>>;
    fn write(&mut self, frame: &CanFrame, extended: bool) -> Result<()>;
}

impl<T: CanDriver + ?Sized> CanDriver for Box<T> {
    fn open(&mut self, info: &CanConnectionInfo) -> Result<()> {
        (**self).open(info)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn read(&mut self) -> Result<Option<DriverFrame>> {
        (**self).read()
    }

    fn write(&mut self, frame: &CanFrame, extended: bool) -> Result<()> {
        (**self).write(frame, extended)
    }
}
