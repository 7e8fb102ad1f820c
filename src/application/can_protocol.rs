use crate::error::{Result, SensorError};
use crate::network::CanNetwork;
use crate::types::{
    CanFrame, DEVICE_TYPE_IS16, DEVICE_TYPE_M16, DEVICE_TYPE_M16_EVALKIT, DEVICE_TYPE_M16_LASER,
    DEVICE_TYPE_VU8,
};
use std::collections::VecDeque;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

const STREAMING_SETTLE: Duration = Duration::from_millis(10);
const STREAMING_ATTEMPTS: u32 = 5;

/// Sensor families speaking the direct CAN protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorFamily {
    /// Answers on `base_id_tx + 1` with the command echoed plus 128
    M16,
    /// Answers on `base_id_tx` with the command echoed as is
    Vu8,
}

impl SensorFamily {
    pub fn from_device_type(device_type: u16) -> Option<Self> {
        match device_type {
            DEVICE_TYPE_M16 | DEVICE_TYPE_M16_LASER | DEVICE_TYPE_IS16 | DEVICE_TYPE_M16_EVALKIT => {
                Some(SensorFamily::M16)
            }
            DEVICE_TYPE_VU8 => Some(SensorFamily::Vu8),
            _ => None,
        }
    }

    /// Added to the request command in the echo of a configuration answer
    pub fn answer_offset(self) -> u8 {
        match self {
            SensorFamily::M16 => 128,
            SensorFamily::Vu8 => 0,
        }
    }

    fn streaming_command(self, enable: bool) -> u8 {
        match (self, enable) {
            (SensorFamily::M16, true) => 5,
            (SensorFamily::M16, false) => 3,
            (SensorFamily::Vu8, true) => 3,
            (SensorFamily::Vu8, false) => 1,
        }
    }
}

/// Direct command/sub-command protocol on a routed CAN connection.
///
/// Frames routed to the connection are split in two queues: configuration answers
/// and detection frames.
pub struct CanProtocol<N: CanNetwork> {
    interface: N,
    family: SensorFamily,
    device_type: u16,
    config_buffer: VecDeque<CanFrame>,
    detection_buffer: VecDeque<CanFrame>,
    is_streaming: bool,
}

impl<N: CanNetwork> CanProtocol<N> {
    /// Wraps `interface`; streaming is stopped right away when it is already connected
    pub fn new(interface: N, family: SensorFamily) -> Result<Self> {
        let mut protocol = Self {
            interface,
            family,
            device_type: 0,
            config_buffer: VecDeque::new(),
            detection_buffer: VecDeque::new(),
            is_streaming: false,
        };
        if protocol.interface.is_connected() {
            protocol.enable_streaming_detections(false, 0)?;
        }
        Ok(protocol)
    }

    pub fn with_device_type(mut self, device_type: u16) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn family(&self) -> SensorFamily {
        self.family
    }

    pub fn device_type(&self) -> u16 {
        self.device_type
    }

    pub fn set_device_type(&mut self, device_type: u16) {
        self.device_type = device_type;
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub fn interface(&self) -> &N {
        &self.interface
    }

    pub fn interface_mut(&mut self) -> &mut N {
        &mut self.interface
    }

    pub fn into_interface(self) -> N {
        self.interface
    }

    pub fn connect(&mut self) -> Result<()> {
        self.interface.connect()?;
        self.enable_streaming_detections(false, 0)?;
        info!(family = ?self.family, "Direct CAN sensor connected");
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<()> {
        self.is_streaming = false;
        self.interface.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.interface.is_connected()
    }

    fn is_config_frame(&self, frame: &CanFrame) -> bool {
        let tx = self.interface.info().base_id_tx();
        match self.family {
            SensorFamily::M16 => {
                frame.id == tx.wrapping_add(1) && frame.cmd() >= SensorFamily::M16.answer_offset()
            }
            SensorFamily::Vu8 => frame.id == tx,
        }
    }

    /// Sorts the routed frames into the two queues. A configuration answer carrying
    /// the failure marker is reported instead of being queued.
    fn intake(&mut self) -> Result<()> {
        let mut failure = None;
        for frame in self.interface.drain_received() {
            if !self.is_config_frame(&frame) {
                self.detection_buffer.push_back(frame);
            } else if frame.is_failure_marker() {
                failure.get_or_insert(frame.cmd());
            } else {
                self.config_buffer.push_back(frame);
            }
        }
        match failure {
            Some(cmd) => Err(SensorError::Protocol(format!(
                "Sensor failed to process command:{cmd:x}"
            ))),
            None => Ok(()),
        }
    }

    /// Sends a request without waiting for anything
    pub fn send_request(&mut self, request: &CanFrame) -> Result<()> {
        let id = self.interface.info().base_id_rx();
        self.interface.write(id, &request.data)
    }

    /// Sends a request and waits for a frame for this connection
    pub fn send_request_and_wait_for_answer(&mut self, request: &CanFrame) -> Result<bool> {
        let id = self.interface.info().base_id_rx();
        let answered = self.interface.write_and_wait_for_answer(id, &request.data)?;
        self.intake()?;
        Ok(answered)
    }

    fn exchange(&mut self, request: &CanFrame) -> Result<CanFrame> {
        if !self.send_request_and_wait_for_answer(request)? {
            return Err(SensorError::Protocol(
                "Couldnt get any answer from sensor".into(),
            ));
        }
        let answer = self.config_buffer.pop_front().unwrap_or_default();
        let expected_cmd = request.cmd().wrapping_add(self.family.answer_offset());
        if answer.cmd() != expected_cmd || answer.sub_cmd() != request.sub_cmd() {
            return Err(SensorError::Protocol(format!(
                "Got erroneous data. Received {}/{}",
                answer.cmd(),
                answer.sub_cmd()
            )));
        }
        debug!(cmd = request.cmd(), sub_cmd = request.sub_cmd(), "Configuration answer");
        Ok(answer)
    }

    /// Requests the value `cmd`/`arg` and returns the matching answer frame
    pub fn get_value(&mut self, cmd: u8, arg: u8) -> Result<CanFrame> {
        self.exchange(&CanFrame::command(cmd, arg))
    }

    /// Sends a complete command frame and returns its acknowledgement
    pub fn set_value(&mut self, request: &CanFrame) -> Result<CanFrame> {
        self.exchange(request)
    }

    /// Starts or stops detection streaming. Only Vu8 sensors acknowledge the request.
    pub fn enable_streaming_detections(&mut self, enable: bool, flag: u8) -> Result<()> {
        let request = CanFrame::command(self.family.streaming_command(enable), flag);
        match self.family {
            SensorFamily::M16 => self.send_request(&request)?,
            SensorFamily::Vu8 => {
                let mut acknowledged = false;
                for attempt in 1..=STREAMING_ATTEMPTS {
                    self.send_request_and_wait_for_answer(&request)?;
                    if let Some(answer) = self.config_buffer.pop_front() {
                        if answer.id != 0 {
                            acknowledged = true;
                            break;
                        }
                    }
                    warn!(attempt, enable, "Streaming change not acknowledged, retrying");
                }
                if !acknowledged {
                    return Err(SensorError::Protocol(
                        "Couldnt change streaming detection status - No answer from sensor".into(),
                    ));
                }
            }
        }
        self.is_streaming = enable;
        thread::sleep(STREAMING_SETTLE);
        debug!(enable, "Streaming detections changed");
        Ok(())
    }

    /// True when a configuration answer is queued, reading the bus once if none is
    pub fn read_config_answer(&mut self) -> Result<bool> {
        if self.config_buffer.is_empty() {
            self.interface.read()?;
            self.intake()?;
        }
        Ok(!self.config_buffer.is_empty())
    }

    /// True when a detection frame is queued, reading the bus once if none is
    pub fn read_detection_answer(&mut self) -> Result<bool> {
        if self.detection_buffer.is_empty() {
            self.interface.read()?;
            self.intake()?;
        }
        Ok(!self.detection_buffer.is_empty())
    }

    pub fn next_config_data(&mut self) -> Option<CanFrame> {
        self.config_buffer.pop_front()
    }

    pub fn next_detection_data(&mut self) -> Option<CanFrame> {
        self.detection_buffer.pop_front()
    }

    pub fn pending_config(&self) -> usize {
        self.config_buffer.len()
    }

    pub fn pending_detections(&self) -> usize {
        self.detection_buffer.len()
    }
}
