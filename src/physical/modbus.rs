use super::PhysicalLayer;
use crate::error::Result;

/// Largest Modbus-RTU application data unit
pub const MODBUS_MAX_ADU_LENGTH: usize = 256;
/// Modbus CRC16 trailer
pub const MODBUS_CRC_SIZE: usize = 2;

/// Modbus-RTU driver trait.
///
/// `send_raw_request` receives the request without its CRC and appends it on the wire.
/// `receive_raw_confirmation` fills `answer` with up to `answer.len()` bytes, CRC trailer
/// included, and returns the number of bytes received.
pub trait ModbusInterface: PhysicalLayer {
    fn send_raw_request(&mut self, request: &[u8]) -> Result<()>;
    fn receive_raw_confirmation(&mut self, answer: &mut [u8]) -> Result<usize>;
    fn read_registers(&mut self, address: u16, values: &mut [u16]) -> Result<()>;
    fn write_register(&mut self, address: u16, value: u16) -> Result<()>;
}

impl<T: ModbusInterface + ?Sized> ModbusInterface for &mut T {
    fn send_raw_request(&mut self, request: &[u8]) -> Result<()> {
        (**self).send_raw_request(request)
    }

    fn receive_raw_confirmation(&mut self, answer: &mut [u8]) -> Result<usize> {
        (**self).receive_raw_confirmation(answer)
    }

    fn read_registers(&mut self, address: u16, values: &mut [u16]) -> Result<()> {
        (**self).read_registers(address, values)
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        (**self).write_register(address, value)
    }
}

impl<T: ModbusInterface + ?Sized> ModbusInterface for Box<T> {
    fn send_raw_request(&mut self, request: &[u8]) -> Result<()> {
        (**self).send_raw_request(request)
    }

    fn receive_raw_confirmation(&mut self, answer: &mut [u8]) -> Result<usize> {
        (**self).receive_raw_confirmation(answer)
    }

    fn read_registers(&mut self, address: u16, values: &mut [u16]) -> Result<()> {
        (**self).read_registers(address, values)
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        (**self).write_register(address, value)
    }
}
