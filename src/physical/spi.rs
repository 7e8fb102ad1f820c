use super::PhysicalLayer;
use crate::error::{Result, SensorError};
use crate::types::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipSelectPolarity {
    ActiveLow,
    ActiveHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockPolarity {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockPhase {
    FirstEdge,
    SecondEdge,
}

/// Logical pins a driver maps to GPIO indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiPin {
    Sck,
    Mosi,
    Miso,
    Cs,
    Reset,
    Gpio0,
    Gpio1,
    Gpio2,
}

/// SPI bus configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SpiConfig {
    pub chip_select_polarity: ChipSelectPolarity,
    pub chip_select: u8,
    pub clock_khz: u32,
    pub clock_polarity: ClockPolarity,
    pub clock_phase: ClockPhase,
    pub bits_per_sample: u8,
}

impl SpiConfig {
    /// Settings sensors expect: CS active low on line 3, CPOL high, first edge, 8 bits
    pub fn for_sensor(clock_khz: u32) -> Self {
        Self {
            chip_select_polarity: ChipSelectPolarity::ActiveLow,
            chip_select: 3,
            clock_khz,
            clock_polarity: ClockPolarity::High,
            clock_phase: ClockPhase::FirstEdge,
            bits_per_sample: 8,
        }
    }
}

impl Config for SpiConfig {
    fn validate(&self) -> Result<()> {
        if self.clock_khz == 0 {
            return Err(SensorError::InvalidParameter("SPI clock must be non-zero".into()));
        }
        if !matches!(self.bits_per_sample, 8 | 16) {
            return Err(SensorError::InvalidParameter(format!(
                "{} bits per sample not supported",
                self.bits_per_sample
            )));
        }
        Ok(())
    }
}

/// SPI interface trait that must be implemented by platform-specific drivers
pub trait SpiInterface: PhysicalLayer {
    fn configure(&mut self, config: &SpiConfig) -> Result<()>;

    /// Full-duplex exchange of `tx.len()` bytes
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8], end_transfer: bool) -> Result<()>;
    fn read(&mut self, rx: &mut [u8], end_transfer: bool) -> Result<()>;
    fn write(&mut self, tx: &[u8], end_transfer: bool) -> Result<()>;

    /// Sets GPIO directions, one bit per pin (1 = output)
    fn init_gpio(&mut self, direction: u32) -> Result<()>;
    fn read_gpio(&mut self, mask: u32) -> Result<u32>;
    fn write_gpio(&mut self, mask: u32, value: u32) -> Result<()>;
    fn gpio_pin(&self, pin: SpiPin) -> u8;

    /// Mask with the bits of every listed pin set
    fn pin_mask(&self, pins: &[SpiPin]) -> u32 {
        pins.iter().fold(0, |mask, &pin| mask | (1 << self.gpio_pin(pin)))
    }
}

impl<T: SpiInterface + ?Sized> SpiInterface for &mut T {
    fn configure(&mut self, config: &SpiConfig) -> Result<()> {
        (**self).configure(config)
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8], end_transfer: bool) -> Result<()> {
        (**self).transfer(tx, rx, end_transfer)
    }

    fn read(&mut self, rx: &mut [u8], end_transfer: bool) -> Result<()> {
        (**self).read(rx, end_transfer)
    }

    fn write(&mut self, tx: &[u8], end_transfer: bool) -> Result<()> {
        (**self).write(tx, end_transfer)
    }

    fn init_gpio(&mut self, direction: u32) -> Result<()> {
        (**self).init_gpio(direction)
    }

    fn read_gpio(&mut self, mask: u32) -> Result<u32> {
        (**self).read_gpio(mask)
    }

    fn write_gpio(&mut self, mask: u32, value: u32) -> Result<()> {
        (**self).write_gpio(mask, value)
    }

    fn gpio_pin(&self, pin: SpiPin) -> u8 {
        (**self).gpio_pin(pin)
    }
}

impl<T: SpiInterface + ?Sized> SpiInterface for Box<T> {
    fn configure(&mut self, config: &SpiConfig) -> Result<()> {
        (**self).configure(config)
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8], end_transfer: bool) -> Result<()> {
        (**self).transfer(tx, rx, end_transfer)
    }

    fn read(&mut self, rx: &mut [u8], end_transfer: bool) -> Result<()> {
        (**self).read(rx, end_transfer)
    }

    fn write(&mut self, tx: &[u8], end_transfer: bool) -> Result<()> {
        (**self).write(tx, end_transfer)
    }

    fn init_gpio(&mut self, direction: u32) -> Result<()> {
        (**self).init_gpio(direction)
    }

    fn read_gpio(&mut self, mask: u32) -> Result<u32> {
        (**self).read_gpio(mask)
    }

    fn write_gpio(&mut self, mask: u32, value: u32) -> Result<()> {
        (**self).write_gpio(mask, value)
    }

    fn gpio_pin(&self, pin: SpiPin) -> u8 {
        (**self).gpio_pin(pin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_config_is_valid() {
        let config = SpiConfig::for_sensor(1000);
        assert_eq!(config.chip_select, 3);
        assert_eq!(config.chip_select_polarity, ChipSelectPolarity::ActiveLow);
        assert_eq!(config.clock_polarity, ClockPolarity::High);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_clock_is_rejected() {
        assert!(SpiConfig::for_sensor(0).validate().is_err());
    }
}
