//! Builds protocol handles from discovery results.

use super::can_protocol::{CanProtocol, SensorFamily};
use crate::connection::ConnectionInfo;
use crate::error::{Result, SensorError};
use crate::network::CanNetwork;
use crate::physical::modbus::ModbusInterface;
use crate::physical::spi::SpiInterface;
use crate::transport::can::CanUniversalEncoder;
use crate::transport::modbus::ModbusEncoder;
use crate::transport::spi::SpiEncoder;
use crate::transport::TransportEncoder;
use tracing::debug;

/// Driver-side link a Universal encoder is built on
pub enum Link {
    Spi(Box<dyn SpiInterface>),
    Modbus(Box<dyn ModbusInterface>),
    Can(Box<dyn CanNetwork>),
}

impl Link {
    fn kind(&self) -> &'static str {
        match self {
            Link::Spi(_) => "SPI",
            Link::Modbus(_) => "Modbus",
            Link::Can(_) => "CAN",
        }
    }
}

/// Builds the Universal encoder matching `info`
pub fn universal_encoder(info: &ConnectionInfo, link: Link) -> Result<Box<dyn TransportEncoder>> {
    debug!(link = link.kind(), address = info.address(), "Building Universal encoder");
    match (info, link) {
        (ConnectionInfo::Spi(info), Link::Spi(spi)) => Ok(Box::new(SpiEncoder::new(info.clone(), spi))),
        (ConnectionInfo::Modbus(info), Link::Modbus(modbus)) => {
            Ok(Box::new(ModbusEncoder::new(info.clone(), modbus)))
        }
        (ConnectionInfo::Can(info), Link::Can(network)) => {
            if network.info() != info {
                return Err(SensorError::Configuration(
                    "CAN interface was opened for another descriptor".into(),
                ));
            }
            Ok(Box::new(CanUniversalEncoder::new(network)))
        }
        (info, link) => Err(SensorError::Configuration(format!(
            "Cannot drive a {} descriptor over a {} link",
            descriptor_kind(info),
            link.kind()
        ))),
    }
}

/// Builds the direct CAN protocol for a sensor of `device_type`
pub fn can_protocol<N: CanNetwork>(network: N, device_type: u16) -> Result<CanProtocol<N>> {
    let family = SensorFamily::from_device_type(device_type).ok_or_else(|| {
        SensorError::Configuration(format!(
            "Device type 0x{device_type:04x} does not speak the direct CAN protocol"
        ))
    })?;
    Ok(CanProtocol::new(network, family)?.with_device_type(device_type))
}

fn descriptor_kind(info: &ConnectionInfo) -> &'static str {
    match info {
        ConnectionInfo::Spi(_) => "SPI",
        ConnectionInfo::Modbus(_) => "Modbus",
        ConnectionInfo::Can(_) => "CAN",
    }
}
