use super::*;
use crate::connection::{CanConnectionInfo, ModbusConnectionInfo, SensorConnection, SpiConnectionInfo};
use crate::error::SensorError;
use crate::types::{ResetType, DEVICE_TYPE_M16, DEVICE_TYPE_VU8};
use crate::transport::universal::{
    TransactionInfo, READY_DEASSERTING_ADDRESS, SECURE_TRANSFER_ADDRESS, TRANSFER_MODE_ADDRESS,
};

mod engine_tests {
    use super::*;

    #[test]
    fn test_transaction_defaults() {
        let read = RegisterTransaction::read(OpCode::Read, 0x100, 2);
        assert_eq!(read.crc_retries, 0);
        assert_eq!(read.post_ready_timeout_ms, 0);
        assert_eq!(read.attempts(), 1);

        let write = RegisterTransaction::write(OpCode::Write, 0x100, 2).with_crc_retries(5);
        assert_eq!(write.post_ready_timeout_ms, 10_000);
        assert_eq!(write.attempts(), 5);
    }

    #[test]
    fn test_always_ready_check_only_applies_to_reads() {
        let read = RegisterTransaction::read(OpCode::Read, 0, 1).with_pre_ready_timeout(20);
        assert_eq!(read.pre_ready_timeout(false), 20);
        assert_eq!(read.pre_ready_timeout(true), 5000);

        let status = RegisterTransaction::read(OpCode::ReadStatus, 0, 1);
        assert_eq!(status.pre_ready_timeout(true), 0);
    }

    #[test]
    fn test_transaction_info_strings() {
        assert_eq!(TransactionInfo::describe(0), "No error");
        assert_eq!(TransactionInfo::describe(0x10), "CRC failed");
        assert_eq!(TransactionInfo::describe(0x20), "Command execution error");
        assert_eq!(TransactionInfo::describe(0x40), "Invalid packet");
        assert_eq!(TransactionInfo::describe(0x30), "Invalid error code");
    }

    #[test]
    fn test_opcode_codes() {
        for opcode in [
            OpCode::Write,
            OpCode::WriteDisable,
            OpCode::ReadStatus,
            OpCode::WriteEnable,
            OpCode::Read,
            OpCode::SoftReset,
            OpCode::ChipErase,
        ] {
            assert_eq!(OpCode::from_code(opcode.code()), Some(opcode));
        }
        assert_eq!(OpCode::from_code(0x01), None);
    }
}

mod spi_tests {
    use super::*;
    use crate::physical::mock_spi::MockSpiDevice;
    use crate::transport::spi::{HardResetTiming, SpiEncoder};

    fn create_sensor() -> (SpiEncoder<MockSpiDevice>, MockSpiDevice) {
        let device = MockSpiDevice::new();
        let mut sensor = SpiEncoder::new(SpiConnectionInfo::new("SPI 0", 0), device.clone())
            .with_hard_reset_timing(HardResetTiming {
                pulse_ms: 0,
                settle_ms: 0,
            });
        sensor.connect().unwrap();
        (sensor, device)
    }

    #[test]
    fn test_connect_runs_init_sequence() {
        let (sensor, device) = create_sensor();
        assert_eq!(sensor.device_type(), DEVICE_TYPE_M16);

        let sim = device.sim();
        let sim = sim.lock();
        assert_eq!(sim.peek(SECURE_TRANSFER_ADDRESS, 1), vec![1]);
        assert_eq!(sim.peek(READY_DEASSERTING_ADDRESS, 1), vec![3]);
        assert_eq!(sim.peek(TRANSFER_MODE_ADDRESS, 1), vec![0]);
        assert!(!sim.is_write_enabled());
    }

    #[test]
    fn test_connect_configures_link() {
        let (_sensor, device) = create_sensor();

        let configs = device.configs();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].chip_select, 3);
        assert_eq!(configs[0].clock_khz, 1000);

        // Every pin but MISO is an output
        assert_eq!(device.gpio_direction(), 0xFB);
        assert_eq!(device.gpio_writes()[0], (0xFF, 0x1B));
    }

    #[test]
    fn test_write_then_read_register() {
        let (mut sensor, _device) = create_sensor();
        sensor.write_register(0x100, &[0xAA, 0xBB, 0xCC], 5).unwrap();

        let mut data = [0u8; 3];
        sensor.read_register(0x100, &mut data, 5).unwrap();
        assert_eq!(data, [0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_crc_failure_after_every_attempt() {
        let (mut sensor, device) = create_sensor();
        device.corrupt_next_reads(3);
        let before = device.read_frames();

        let mut data = [0u8; 2];
        let err = sensor.read_register(0x100, &mut data, 3).unwrap_err();
        assert!(err.is_crc());
        assert_eq!(
            err.to_string(),
            "CRC error on transaction (Read address: 0x100 size: 2)"
        );
        assert_eq!(device.read_frames() - before, 3);
    }

    #[test]
    fn test_crc_recovers_within_budget() {
        let (mut sensor, device) = create_sensor();
        device.sim().lock().poke(0x100, &[1, 2]);
        device.corrupt_next_reads(2);
        let before = device.read_frames();

        let mut data = [0u8; 2];
        sensor.read_register(0x100, &mut data, 3).unwrap();
        assert_eq!(data, [1, 2]);
        assert_eq!(device.read_frames() - before, 3);
    }

    #[test]
    fn test_zero_retries_skips_crc_check() {
        let (mut sensor, device) = create_sensor();
        device.corrupt_next_reads(1);
        let before = device.read_frames();

        let mut data = [0u8; 2];
        sensor.read_register(0x100, &mut data, 0).unwrap();
        assert_eq!(device.read_frames() - before, 1);
    }

    #[test]
    fn test_write_retried_after_rejection() {
        let (mut sensor, device) = create_sensor();
        device.fail_next_writes(1);
        let before = device.transfers_with(OpCode::Write);

        sensor.write_register(0x100, &[0xAA, 0xBB], 2).unwrap();
        assert_eq!(device.transfers_with(OpCode::Write) - before, 2);
        assert_eq!(device.sim().lock().peek(0x100, 2), vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_write_rejected_on_every_attempt() {
        let (mut sensor, device) = create_sensor();
        device.fail_next_writes(10);
        let before = device.transfers_with(OpCode::Write);

        match sensor.write_register(0x100, &[0xAA, 0xBB], 3) {
            Err(SensorError::TransactionFailed { info, address, size }) => {
                assert_eq!(info, "CRC failed");
                assert_eq!(address, 0x100);
                assert_eq!(size, 2);
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(device.transfers_with(OpCode::Write) - before, 3);
        assert!(!device.sim().lock().is_write_enabled());
    }

    #[test]
    fn test_large_write_is_paged() {
        let (mut sensor, device) = create_sensor();
        let data: Vec<u8> = (0..1200).map(|i| (i % 251) as u8).collect();
        let before = device.transfers().len();

        sensor.write_register(0x1000, &data, 0).unwrap();

        let pages: Vec<_> = device.transfers()[before..]
            .iter()
            .filter(|header| header[0] == OpCode::Write.code())
            .map(|header| {
                (
                    u32::from_be_bytes([0, header[1], header[2], header[3]]),
                    u16::from_be_bytes([header[4], header[5]]),
                )
            })
            .collect();
        assert_eq!(pages, vec![(0x1000, 512), (0x1200, 512), (0x1400, 176)]);

        let mut read_back = vec![0u8; data.len()];
        sensor.read_register(0x1000, &mut read_back, 2).unwrap();
        assert_eq!(read_back, data);
    }

    #[test]
    fn test_read_larger_than_buffer() {
        let (mut sensor, _device) = create_sensor();
        let mut data = vec![0u8; 4096];
        assert!(matches!(
            sensor.read_register(0, &mut data, 0),
            Err(SensorError::BufferOverflow { requested: 4096, .. })
        ));

        sensor.resize_buffers(4096);
        sensor.read_register(0, &mut data, 0).unwrap();
    }

    #[test]
    fn test_not_connected() {
        let mut sensor = SpiEncoder::new(SpiConnectionInfo::new("SPI 0", 0), MockSpiDevice::new());
        let mut data = [0u8; 2];
        assert!(matches!(
            sensor.read_register(0x100, &mut data, 0),
            Err(SensorError::NotConnected(_))
        ));
    }

    #[test]
    fn test_ready_polling_waits_for_busy_bit() {
        let (mut sensor, device) = create_sensor();
        device.sim().lock().set_busy_polls(3);
        sensor.write_register(0x100, &[1], 0).unwrap();
        assert_eq!(device.sim().lock().peek(0x100, 1), vec![1]);
    }

    #[test]
    fn test_ready_timeout_flags_disconnection() {
        let (mut sensor, device) = create_sensor();
        device.sim().lock().set_busy_polls(1000);

        let transaction = RegisterTransaction::read(OpCode::Read, 0x100, 2).with_pre_ready_timeout(30);
        let mut data = [0u8; 2];
        let err = sensor.read_data(&transaction, &mut data).unwrap_err();
        assert!(err.likely_disconnected());
        assert!(!sensor.is_device_ready(20, 0));
    }

    #[test]
    fn test_always_ready_check_polls_before_reads() {
        let (mut sensor, device) = create_sensor();
        sensor.set_always_ready_check(true);
        device.sim().lock().set_busy_polls(2);
        let before = device.read_frames();

        let mut data = [0u8; 2];
        sensor.read_register(0x100, &mut data, 0).unwrap();
        assert_eq!(device.read_frames() - before, 4);
    }

    #[test]
    fn test_write_enable_latch() {
        let (mut sensor, _device) = create_sensor();
        sensor.set_write_enable(true, 0).unwrap();
        assert!(sensor.is_write_enabled(0).unwrap());
        sensor.set_write_enable(false, 0).unwrap();
        assert!(!sensor.is_write_enabled(0).unwrap());
    }

    #[test]
    fn test_soft_reset() {
        let (mut sensor, device) = create_sensor();
        sensor.reset(ResetType::Soft, false).unwrap();
        assert_eq!(device.sim().lock().resets(), 1);
    }

    #[test]
    fn test_hard_reset_into_bootloader() {
        let (mut sensor, device) = create_sensor();
        sensor.reset(ResetType::Hard, true).unwrap();

        let writes = device.gpio_writes();
        // SCK, MOSI, MISO, CS and RESET
        let mask = 0x1F;
        assert_eq!(&writes[writes.len() - 2..], &[(mask, 0x00), (mask, 0x10)]);
        assert_eq!(device.configs().len(), 2);
    }

    #[test]
    fn test_config_reset_is_unsupported() {
        let (mut sensor, _device) = create_sensor();
        assert!(matches!(
            sensor.reset(ResetType::Config, false),
            Err(SensorError::Configuration(_))
        ));
    }

    #[test]
    fn test_failed_init_disconnects() {
        let device = MockSpiDevice::new();
        device.corrupt_next_reads(5);
        let mut sensor = SpiEncoder::new(SpiConnectionInfo::new("SPI 0", 0), device.clone());

        assert!(sensor.connect().unwrap_err().is_crc());
        assert!(!sensor.is_connected());
    }

    #[test]
    fn test_raw_connect_skips_init() {
        let device = MockSpiDevice::new();
        let mut sensor = SpiEncoder::new(SpiConnectionInfo::new("SPI 0", 0), device.clone());
        sensor.raw_connect().unwrap();

        assert!(sensor.is_connected());
        assert_eq!(sensor.device_type(), 0);
        assert_eq!(device.sim().lock().write_transactions(), 0);
    }
}

mod modbus_tests {
    use super::*;
    use crate::physical::mock_modbus::MockModbusDevice;
    use crate::transport::modbus::{
        ModbusEncoder, ENGINE_START, ENGINE_STOPPED, FC_READ_DATA, FC_SEND_OPCODE, FC_WRITE_DATA,
    };

    fn fast_settings() -> UniversalSettings {
        UniversalSettings {
            ready_poll_interval_ms: 1,
            reset_wait_ms: 0,
            ..Default::default()
        }
    }

    fn create_sensor() -> (ModbusEncoder<MockModbusDevice>, MockModbusDevice) {
        let device = MockModbusDevice::new(1);
        let mut sensor = ModbusEncoder::new(ModbusConnectionInfo::new("COM3", "COM3", 1), device.clone())
            .with_settings(fast_settings());
        sensor.connect().unwrap();
        (sensor, device)
    }

    #[test]
    fn test_connect_stops_engine_then_inits() {
        let (mut sensor, device) = create_sensor();
        assert_eq!(device.engine_register(), ENGINE_STOPPED);
        assert_eq!(sensor.device_type(), DEVICE_TYPE_M16);
        assert_eq!(device.sim().lock().peek(SECURE_TRANSFER_ADDRESS, 1), vec![1]);

        sensor.disconnect().unwrap();
        assert_eq!(device.engine_register(), ENGINE_START);
        assert!(!sensor.is_connected());
    }

    #[test]
    fn test_engine_never_stops() {
        let device = MockModbusDevice::new(1);
        device.set_engine_stop_polls(u32::MAX);
        let mut sensor = ModbusEncoder::new(ModbusConnectionInfo::new("COM3", "COM3", 1), device.clone())
            .with_engine_stop_timeout(30);

        match sensor.connect() {
            Err(SensorError::Timeout { message, .. }) => assert_eq!(message, "Carrier engine never stopped"),
            other => panic!("unexpected result {other:?}"),
        }
        assert!(!sensor.is_connected());
    }

    #[test]
    fn test_large_transfers_are_chunked() {
        let (mut sensor, device) = create_sensor();
        let data: Vec<u8> = (0..600).map(|i| (i % 256) as u8).collect();
        let writes = device.requests_with(FC_WRITE_DATA);
        let reads = device.requests_with(FC_READ_DATA);

        sensor.write_register(0x2000, &data, 0).unwrap();
        let mut read_back = vec![0u8; data.len()];
        sensor.read_register(0x2000, &mut read_back, 0).unwrap();

        assert_eq!(read_back, data);
        assert_eq!(device.requests_with(FC_WRITE_DATA) - writes, 3);
        assert_eq!(device.requests_with(FC_READ_DATA) - reads, 3);

        let last_read = device.requests().into_iter().filter(|r| r[1] == FC_READ_DATA).last().unwrap();
        assert_eq!(u32::from_le_bytes([last_read[2], last_read[3], last_read[4], last_read[5]]), 0x2000 + 494);
        assert_eq!(last_read[6], 106);
    }

    #[test]
    fn test_read_larger_than_buffer() {
        let (mut sensor, _device) = create_sensor();
        let mut data = vec![0u8; 2000];
        assert!(matches!(
            sensor.read_register(0, &mut data, 0),
            Err(SensorError::BufferOverflow { .. })
        ));
    }

    #[test]
    fn test_crc_retry_budget() {
        let (mut sensor, device) = create_sensor();
        let mut data = [0u8; 2];

        device.corrupt_next_answers(2);
        sensor.read_register(0x100, &mut data, 2).unwrap();

        device.corrupt_next_answers(3);
        assert!(sensor.read_register(0x100, &mut data, 2).unwrap_err().is_crc());
    }

    #[test]
    fn test_missing_bytes() {
        let (mut sensor, device) = create_sensor();
        device.truncate_next_answers(1);

        let mut data = [0u8; 2];
        match sensor.read_register(0x100, &mut data, 0) {
            Err(SensorError::Protocol(message)) => assert_eq!(message, "Missing bytes in modbus packet"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_reset_into_bootloader() {
        let (mut sensor, device) = create_sensor();
        sensor.reset(ResetType::Hard, true).unwrap();

        let sim = device.sim();
        let sim = sim.lock();
        assert_eq!(sim.resets(), 1);
        assert_eq!(sim.bootloader_requests(), 1);
    }

    #[test]
    fn test_device_type_from_server_id() {
        let (mut sensor, device) = create_sensor();
        device.set_device_type(DEVICE_TYPE_VU8);
        assert_eq!(sensor.read_device_type().unwrap(), DEVICE_TYPE_VU8);
    }

    #[test]
    fn test_status_through_send_opcode() {
        let (mut sensor, _device) = create_sensor();
        sensor.set_write_enable(true, 0).unwrap();
        assert!(sensor.is_write_enabled(0).unwrap());
    }

    #[test]
    fn test_status_read_resends_on_bad_crc() {
        let (mut sensor, device) = create_sensor();
        let opcodes = device.requests_with(FC_SEND_OPCODE);

        device.corrupt_next_answers(1);
        sensor.get_status_register(3).unwrap();
        assert_eq!(device.requests_with(FC_SEND_OPCODE) - opcodes, 2);

        device.corrupt_next_answers(1);
        assert!(sensor.get_status_register(0).unwrap_err().is_crc());
    }

    #[test]
    fn test_bootloader_reset_does_not_wait_for_the_sensor() {
        let (mut sensor, device) = create_sensor();
        sensor.reset(ResetType::Soft, true).unwrap();

        assert!(device.in_bootloader());
        assert_eq!(device.sim().lock().bootloader_requests(), 1);
        let swrst = device
            .requests()
            .into_iter()
            .filter(|r| r[1] == FC_SEND_OPCODE && r[2] == OpCode::SoftReset.code())
            .count();
        assert_eq!(swrst, 1);

        // The bootloader no longer answers the universal protocol
        match sensor.get_status_register(0) {
            Err(SensorError::Protocol(message)) => assert_eq!(message, "Missing bytes in modbus packet"),
            other => panic!("unexpected result {other:?}"),
        }
    }
}

mod can_tests {
    use super::*;
    use crate::network::{CanInterface, CanTiming};
    use crate::physical::mock::{MockCanDriver, RegisterSim, SharedSim};
    use crate::types::CanFrame;
    use crate::transport::can::{CanUniversalEncoder, CMD_READ_DATA, CMD_SEND_OP_CODE, CMD_SET_BASE_ADDRESS, CMD_WRITE_DATA};
    use crate::transport::universal::DEVICE_TYPE_ADDRESS_OLD;

    type Sensor = CanUniversalEncoder<CanInterface<MockCanDriver>>;

    fn fast_timing() -> CanTiming {
        CanTiming {
            answer_polls: 5,
            answer_poll_interval_ms: 0,
            power_up_ms: 0,
            waste_event_polls: 1,
            waste_event_interval_ms: 0,
            ..Default::default()
        }
    }

    fn encoder(driver: &MockCanDriver) -> Sensor {
        let interface = CanInterface::new(CanConnectionInfo::new("CAN 0", 0), driver.clone())
            .unwrap()
            .with_timing(fast_timing())
            .unwrap();
        CanUniversalEncoder::new(interface).with_settings(UniversalSettings {
            ready_poll_interval_ms: 1,
            reset_wait_ms: 0,
            ..Default::default()
        })
    }

    fn create_sensor() -> (Sensor, MockCanDriver, SharedSim) {
        let sim = RegisterSim::shared(DEVICE_TYPE_ADDRESS_OLD, DEVICE_TYPE_M16);
        let driver = MockCanDriver::new();
        driver.set_responder(Some(MockCanDriver::universal_sensor(
            &CanConnectionInfo::default(),
            sim.clone(),
        )));
        let mut sensor = encoder(&driver);
        sensor.connect().unwrap();
        (sensor, driver, sim)
    }

    fn count(driver: &MockCanDriver, cmd: u8) -> usize {
        driver.written().iter().filter(|frame| frame.cmd() == cmd).count()
    }

    #[test]
    fn test_connect_runs_init_sequence() {
        let (sensor, _driver, sim) = create_sensor();
        assert_eq!(sensor.device_type(), DEVICE_TYPE_M16);

        let sim = sim.lock();
        assert_eq!(sim.peek(SECURE_TRANSFER_ADDRESS, 1), vec![1]);
        assert_eq!(sim.peek(READY_DEASSERTING_ADDRESS, 1), vec![3]);
    }

    #[test]
    fn test_base_address_is_cached() {
        let (mut sensor, driver, _sim) = create_sensor();
        let before = count(&driver, CMD_SET_BASE_ADDRESS);
        let mut data = [0u8; 4];

        for address in [0x0001_0000, 0x0001_0004, 0x0001_FFFC, 0x0002_0000, 0x0002_0010] {
            sensor.read_register(address, &mut data, 0).unwrap();
        }
        assert_eq!(count(&driver, CMD_SET_BASE_ADDRESS) - before, 2);
        assert_eq!(sensor.current_base_address(), Some(0x0002_0000));

        let last = driver
            .written()
            .into_iter()
            .filter(|frame| frame.cmd() == CMD_SET_BASE_ADDRESS)
            .last()
            .unwrap();
        assert_eq!(&last.args()[2..6], &0x0002_0000u32.to_le_bytes());
    }

    #[test]
    fn test_writes_are_chunked() {
        let (mut sensor, driver, sim) = create_sensor();
        let data = [1, 2, 3, 4, 5, 6, 7];
        let before = driver.written().len();

        sensor.write_register(0x0003_0100, &data, 0).unwrap();

        let sizes: Vec<u8> = driver.written()[before..]
            .iter()
            .filter(|frame| frame.cmd() == CMD_WRITE_DATA)
            .map(CanFrame::sub_cmd)
            .collect();
        assert_eq!(sizes, vec![4, 2, 1]);
        assert_eq!(sim.lock().peek(0x0003_0100, 7), data.to_vec());

        let mut read_back = [0u8; 7];
        let reads = count(&driver, CMD_READ_DATA);
        sensor.read_register(0x0003_0100, &mut read_back, 0).unwrap();
        assert_eq!(read_back, data);
        assert_eq!(count(&driver, CMD_READ_DATA) - reads, 3);
    }

    #[test]
    fn test_empty_transfers_send_nothing() {
        let (mut sensor, driver, _sim) = create_sensor();
        let before = driver.written().len();

        sensor.read(&RegisterTransaction::read(OpCode::Read, 0x100, 0)).unwrap();
        sensor.write(&RegisterTransaction::write(OpCode::Write, 0x100, 0)).unwrap();

        assert_eq!(driver.written().len(), before);
    }

    #[test]
    fn test_unhandled_opcodes() {
        let (mut sensor, _driver, _sim) = create_sensor();
        assert!(matches!(
            sensor.read(&RegisterTransaction::read(OpCode::Write, 0, 1)),
            Err(SensorError::Configuration(_))
        ));
        assert!(matches!(
            sensor.write(&RegisterTransaction::write(OpCode::ReadStatus, 0, 0)),
            Err(SensorError::Configuration(_))
        ));
    }

    #[test]
    fn test_failure_marker() {
        let driver = MockCanDriver::with_responder(Box::new(|frame: &CanFrame| {
            let mut answer = CanFrame::new(0x750, frame.data);
            if frame.cmd() == CMD_READ_DATA {
                answer.args_mut().fill(0xFF);
            }
            vec![answer]
        }));
        let mut sensor = encoder(&driver);
        sensor.raw_connect().unwrap();

        let mut data = [0u8; 2];
        match sensor.read_register(0x100, &mut data, 0) {
            Err(SensorError::Protocol(message)) => assert_eq!(message, "Sensor failed to process command:8"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_silent_sensor() {
        let driver = MockCanDriver::new();
        let mut sensor = encoder(&driver);
        sensor.raw_connect().unwrap();

        let mut data = [0u8; 2];
        match sensor.read_register(0x100, &mut data, 0) {
            Err(SensorError::Protocol(message)) => assert_eq!(message, "Couldnt set base address"),
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(sensor.current_base_address(), None);
    }

    #[test]
    fn test_write_enable_mismatch() {
        // Sensor acknowledges every opcode but never sets its write-enable latch
        let driver = MockCanDriver::with_responder(Box::new(|frame: &CanFrame| {
            let mut answer = CanFrame::new(0x750, frame.data);
            if frame.cmd() == CMD_SEND_OP_CODE {
                answer.data[4] = 0;
            }
            vec![answer]
        }));
        let mut sensor = encoder(&driver);
        sensor.raw_connect().unwrap();

        match sensor.write_register(0x100, &[1], 0) {
            Err(SensorError::Protocol(message)) => assert_eq!(message, "Error to set write enable status"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_soft_reset() {
        let (sensor, _driver, sim) = create_sensor();
        let mut sensor = sensor.with_soft_reset_wait(1);
        sensor.reset(ResetType::Soft, false).unwrap();
        assert_eq!(sim.lock().resets(), 1);
        assert_eq!(sensor.current_base_address(), None);
    }

    #[test]
    fn test_hard_reset_is_unsupported() {
        let (mut sensor, _driver, _sim) = create_sensor();
        assert!(matches!(
            sensor.reset(ResetType::Hard, false),
            Err(SensorError::Configuration(_))
        ));
    }

    #[test]
    fn test_status_register() {
        let (mut sensor, _driver, _sim) = create_sensor();
        sensor.set_write_enable(true, 0).unwrap();
        assert_eq!(sensor.get_status_register(0).unwrap() & 0x02, 0x02);
    }
}
