use libsensorcomm::application::{factory, CanProtocol, Link, SensorFamily};
use libsensorcomm::connection::{
    CanConnectionInfo, ConnectionInfo, ModbusConnectionInfo, SensorConnection, SpiConnectionInfo,
};
use libsensorcomm::error::SensorError;
use libsensorcomm::network::{CanInterface, CanTiming};
use libsensorcomm::physical::mock::{MockCanDriver, RegisterSim};
use libsensorcomm::physical::mock_modbus::MockModbusDevice;
use libsensorcomm::physical::mock_spi::MockSpiDevice;
use libsensorcomm::transport::can::CanUniversalEncoder;
use libsensorcomm::transport::universal::{DEVICE_TYPE_ADDRESS_OLD, SECURE_TRANSFER_ADDRESS};
use libsensorcomm::transport::{OpCode, UniversalProtocol};
use libsensorcomm::types::{CanFrame, Config, ResetType, DEVICE_TYPE_M16, DEVICE_TYPE_VU8};
use serde::Deserialize;

fn fast_timing() -> CanTiming {
    CanTiming {
        answer_polls: 10,
        answer_poll_interval_ms: 0,
        power_up_ms: 0,
        waste_event_polls: 1,
        waste_event_interval_ms: 0,
        ..Default::default()
    }
}

/// Vu8 sensor listening on 0x840 and echoing on 0x850
fn vu8_sensor(frame: &CanFrame) -> Vec<CanFrame> {
    if frame.id != 0x840 {
        return Vec::new();
    }
    let mut answer = CanFrame::new(0x850, frame.data);
    if frame.cmd() == 4 {
        answer.args_mut()[..2].copy_from_slice(&[0x12, 0x34]);
    }
    vec![answer]
}

#[test]
fn test_full_stack_spi() {
    let device = MockSpiDevice::new();
    let info = ConnectionInfo::from(SpiConnectionInfo::new("SPI 0", 0));
    let mut sensor = factory::universal_encoder(&info, Link::Spi(Box::new(device.clone()))).unwrap();

    sensor.connect().unwrap();
    assert_eq!(sensor.device_type(), DEVICE_TYPE_M16);

    // Register round trip with CRC checking on both sides
    let data: Vec<u8> = (0..64).collect();
    sensor.write_register(0x0001_0000, &data, 5).unwrap();
    let mut read_back = vec![0u8; data.len()];
    sensor.read_register(0x0001_0000, &mut read_back, 5).unwrap();
    assert_eq!(read_back, data);

    // One rejected frame is resent
    device.fail_next_writes(1);
    let writes = device.transfers_with(OpCode::Write);
    sensor.write_register(0x0001_0000, &[0xAA, 0xBB], 2).unwrap();
    assert_eq!(device.transfers_with(OpCode::Write) - writes, 2);

    sensor.disconnect().unwrap();
    let mut status = [0u8; 1];
    assert!(matches!(
        sensor.read_register(0, &mut status, 0),
        Err(SensorError::NotConnected(_))
    ));
}

#[test]
fn test_full_stack_modbus() {
    let device = MockModbusDevice::new(3);
    let info = ConnectionInfo::from(ModbusConnectionInfo::new("Carrier", "/dev/ttyUSB0", 3));
    let mut sensor = factory::universal_encoder(&info, Link::Modbus(Box::new(device.clone()))).unwrap();
    sensor.set_ready_poll_interval(1);

    sensor.connect().unwrap();
    assert_eq!(sensor.device_type(), DEVICE_TYPE_M16);
    assert_eq!(device.sim().lock().peek(SECURE_TRANSFER_ADDRESS, 1), vec![1]);

    let data: Vec<u8> = (0..300).map(|i| (i * 7 % 256) as u8).collect();
    sensor.write_register(0x0002_0000, &data, 2).unwrap();
    let mut read_back = vec![0u8; data.len()];
    sensor.read_register(0x0002_0000, &mut read_back, 2).unwrap();
    assert_eq!(read_back, data);

    sensor.reset(ResetType::Soft, false).unwrap();
    assert_eq!(device.sim().lock().resets(), 1);

    sensor.disconnect().unwrap();
    assert!(!sensor.is_connected());
}

#[test]
fn test_full_stack_can_universal() {
    let info = CanConnectionInfo::new("CAN 0", 0);
    let sim = RegisterSim::shared(DEVICE_TYPE_ADDRESS_OLD, DEVICE_TYPE_M16);
    let driver = MockCanDriver::with_responder(MockCanDriver::universal_sensor(&info, sim.clone()));

    let interface = CanInterface::new(info.clone(), driver.clone())
        .unwrap()
        .with_timing(fast_timing())
        .unwrap();
    let mut sensor =
        factory::universal_encoder(&ConnectionInfo::from(info), Link::Can(Box::new(interface))).unwrap();
    sensor.set_ready_poll_interval(1);

    sensor.connect().unwrap();
    assert_eq!(sensor.device_type(), DEVICE_TYPE_M16);

    sensor.write_register(0x0003_FFFE, &[1, 2, 3, 4, 5], 0).unwrap();
    assert_eq!(sim.lock().peek(0x0003_FFFE, 5), vec![1, 2, 3, 4, 5]);

    let mut read_back = [0u8; 5];
    sensor.read_register(0x0003_FFFE, &mut read_back, 0).unwrap();
    assert_eq!(read_back, [1, 2, 3, 4, 5]);

    drop(sensor);
    assert!(!driver.is_open());
}

#[test]
fn test_master_and_slave_share_one_adapter() {
    let master_info = CanConnectionInfo::new("CAN 0", 0);
    let slave_info = CanConnectionInfo::new("CAN 0", 0).with_base_ids(0x850, 0x840);
    let sim = RegisterSim::shared(DEVICE_TYPE_ADDRESS_OLD, DEVICE_TYPE_M16);

    let driver = MockCanDriver::with_responder(MockCanDriver::universal_sensor(&master_info, sim));
    driver.add_responder(Box::new(vu8_sensor));

    let master = CanInterface::new(master_info, driver.clone())
        .unwrap()
        .with_timing(fast_timing())
        .unwrap();
    let slave = CanInterface::attach(slave_info, &master).unwrap();
    assert_eq!(master.connection_count(), 2);

    let mut universal = CanUniversalEncoder::new(master);
    universal.set_ready_poll_interval(1);
    universal.connect().unwrap();

    // The slave rides on the connection the master opened
    let mut direct = factory::can_protocol(slave, DEVICE_TYPE_VU8).unwrap();
    assert_eq!(direct.family(), SensorFamily::Vu8);
    assert!(!direct.is_streaming());

    let answer = direct.get_value(4, 1).unwrap();
    assert_eq!(&answer.args()[..2], &[0x12, 0x34]);

    // A detection read by the master lands in the slave's queue
    driver.push_frame(CanFrame::from_slice(0x851, &[0xD0, 0x01]));
    let mut data = [0u8; 2];
    universal.read_register(0x100, &mut data, 0).unwrap();
    assert!(direct.read_detection_answer().unwrap());
    assert_eq!(direct.next_detection_data().map(|frame| frame.id), Some(0x851));

    // Dropping the master hands the bus over; the last handle closes the adapter
    drop(universal);
    assert!(direct.interface().is_master());
    assert!(driver.is_open());
    drop(direct);
    assert!(!driver.is_open());
    assert_eq!(driver.close_count(), 1);
}

#[test]
fn test_slave_cannot_open_adapter() {
    let driver = MockCanDriver::new();
    let master = CanInterface::new(CanConnectionInfo::new("CAN 0", 0), driver).unwrap();
    let slave = CanInterface::attach(
        CanConnectionInfo::new("CAN 0", 0).with_base_ids(0x850, 0x840),
        &master,
    )
    .unwrap();

    let mut direct = CanProtocol::new(slave, SensorFamily::M16).unwrap();
    match direct.connect() {
        Err(SensorError::Configuration(message)) => assert_eq!(message, "Only the master can connect"),
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn test_overlapping_slave_is_rejected() {
    let master = CanInterface::new(CanConnectionInfo::new("CAN 0", 0), MockCanDriver::new()).unwrap();
    // 0x7A0 lies inside the master's detection range [0x750, 0x750 + 97]
    let result = CanInterface::attach(
        CanConnectionInfo::new("CAN 0", 0).with_base_ids(0x7A0, 0x790),
        &master,
    );
    assert!(matches!(result, Err(SensorError::Configuration(_))));
    assert_eq!(master.connection_count(), 1);
}

#[derive(Deserialize)]
struct SensorFile {
    sensor: Vec<ConnectionInfo>,
}

#[test]
fn test_descriptors_from_toml() {
    let file: SensorFile = toml::from_str(
        r#"
        [[sensor]]
        type = "spi"
        description = "Front radar"
        chip_address = 1
        clock_khz = 4000

        [[sensor]]
        type = "modbus"
        description = "Carrier"
        serial_port = "/dev/ttyUSB0"
        modbus_address = 7
        parity = "even"

        [[sensor]]
        type = "can"
        description = "Rear radar"
        port = 1
        base_id_tx = 0x850
        base_id_rx = 0x840
        "#,
    )
    .unwrap();

    assert_eq!(file.sensor.len(), 3);
    for info in &file.sensor {
        info.validate().unwrap();
    }

    let spi = file.sensor[0].as_spi().unwrap();
    assert_eq!(spi.chip_address(), 1);
    assert_eq!(spi.clock_khz(), 4000);

    let modbus = file.sensor[1].as_modbus().unwrap();
    assert_eq!(modbus.modbus_address(), 7);
    assert_eq!(modbus.baud_rate(), 115_200);

    let can = file.sensor[2].as_can().unwrap();
    assert_eq!(can.base_id_tx(), 0x850);
    assert_eq!(can.speed_kbps(), 1000);
    assert!(can.standard_frame_format());
}
