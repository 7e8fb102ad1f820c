use super::CanNetwork;
use crate::connection::CanConnectionInfo;
use crate::error::{Result, SensorError};
use crate::physical::can::CanDriver;
use crate::types::{CanFrame, CanId, Config, CAN_MAX_DETECTIONS};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Width of the ID range a sensor answers on, starting at its `base_id_tx`
pub const DETECTION_RANGE: CanId = CAN_MAX_DETECTIONS + 1;

/// Polling and settle delays of the shared bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanTiming {
    pub answer_polls: u32,
    pub answer_poll_interval_ms: u64,
    pub event_retries: u32,
    pub power_up_ms: u64,
    pub waste_event_polls: u32,
    pub waste_event_interval_ms: u64,
}

impl Default for CanTiming {
    fn default() -> Self {
        Self {
            answer_polls: 1000,
            answer_poll_interval_ms: 1,
            event_retries: 3,
            power_up_ms: 750,
            waste_event_polls: 10,
            waste_event_interval_ms: 50,
        }
    }
}

impl Config for CanTiming {
    fn validate(&self) -> Result<()> {
        if self.answer_polls == 0 {
            return Err(SensorError::InvalidParameter(
                "answer polls must be non-zero".into(),
            ));
        }
        if self.event_retries == 0 {
            return Err(SensorError::InvalidParameter(
                "event retries must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

struct RouteEntry {
    handle: usize,
    rx: CanId,
    tx: CanId,
    inbox: VecDeque<CanFrame>,
}

impl RouteEntry {
    fn owns(&self, id: CanId) -> bool {
        in_range(self.tx, id)
    }
}

fn in_range(tx: CanId, id: CanId) -> bool {
    id >= tx && id <= tx.saturating_add(DETECTION_RANGE)
}

struct BusState<D> {
    driver: D,
    connected: bool,
    extended: bool,
    routes: Vec<RouteEntry>,
    next_handle: usize,
    timing: CanTiming,
}

impl<D: CanDriver> BusState<D> {
    fn master(&self) -> Option<usize> {
        self.routes.first().map(|route| route.handle)
    }

    fn route_mut(&mut self, handle: usize) -> Option<&mut RouteEntry> {
        self.routes.iter_mut().find(|route| route.handle == handle)
    }

    /// Adds a route after checking it against every registered one
    fn register(&mut self, rx: CanId, tx: CanId) -> Result<usize> {
        if in_range(tx, rx) {
            return Err(SensorError::Configuration(format!(
                "Rx id 0x{rx:x} overlaps its own detection range 0x{tx:x}"
            )));
        }
        for route in &self.routes {
            if rx == route.rx {
                return Err(SensorError::Configuration(format!(
                    "Rx id 0x{rx:x} already in use"
                )));
            }
            if route.owns(rx) {
                return Err(SensorError::Configuration(format!(
                    "Rx id 0x{rx:x} overlaps the detection range of 0x{:x}",
                    route.tx
                )));
            }
            if in_range(tx, route.rx) {
                return Err(SensorError::Configuration(format!(
                    "Detection range of 0x{tx:x} overlaps rx id 0x{:x}",
                    route.rx
                )));
            }
            if tx <= route.tx.saturating_add(DETECTION_RANGE)
                && route.tx <= tx.saturating_add(DETECTION_RANGE)
            {
                return Err(SensorError::Configuration(format!(
                    "Detection range of 0x{tx:x} overlaps the one of 0x{:x}",
                    route.tx
                )));
            }
        }

        let handle = self.next_handle;
        self.next_handle += 1;
        self.routes.push(RouteEntry {
            handle,
            rx,
            tx,
            inbox: VecDeque::new(),
        });
        Ok(handle)
    }

    /// Copies a frame to the inbox of the route owning its ID
    fn forward(&mut self, frame: CanFrame) -> Result<usize> {
        let route = self
            .routes
            .iter_mut()
            .find(|route| route.owns(frame.id))
            .ok_or_else(|| {
                SensorError::Protocol(format!("Unexpected id received: 0x{:x}", frame.id))
            })?;
        route.inbox.push_back(frame);
        Ok(route.handle)
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.connected {
            return Err(SensorError::NotConnected("CAN interface not connected".into()));
        }
        Ok(())
    }
}

/// One logical sensor connection on a shared CAN adapter
pub struct CanInterface<D: CanDriver> {
    info: CanConnectionInfo,
    handle: usize,
    bus: Arc<Mutex<BusState<D>>>,
}

impl<D: CanDriver> CanInterface<D> {
    /// Creates the master interface, owning `driver`
    pub fn new(info: CanConnectionInfo, driver: D) -> Result<Self> {
        let mut state = BusState {
            driver,
            connected: false,
            extended: !info.standard_frame_format(),
            routes: Vec::new(),
            next_handle: 0,
            timing: CanTiming::default(),
        };
        let handle = state.register(info.base_id_rx(), info.base_id_tx())?;
        Ok(Self {
            info,
            handle,
            bus: Arc::new(Mutex::new(state)),
        })
    }

    /// Creates a slave sharing the adapter of `existing`
    pub fn attach(info: CanConnectionInfo, existing: &CanInterface<D>) -> Result<Self> {
        let handle = existing
            .bus
            .lock()
            .register(info.base_id_rx(), info.base_id_tx())?;
        debug!(
            rx = info.base_id_rx(),
            tx = info.base_id_tx(),
            "Slave CAN connection registered"
        );
        Ok(Self {
            info,
            handle,
            bus: Arc::clone(&existing.bus),
        })
    }

    /// Replaces the polling delays of the whole bus
    pub fn with_timing(self, timing: CanTiming) -> Result<Self> {
        timing.validate()?;
        self.bus.lock().timing = timing;
        Ok(self)
    }

    pub fn timing(&self) -> CanTiming {
        self.bus.lock().timing.clone()
    }

    pub fn is_master(&self) -> bool {
        self.bus.lock().master() == Some(self.handle)
    }

    /// Number of logical connections sharing the adapter
    pub fn connection_count(&self) -> usize {
        self.bus.lock().routes.len()
    }

    /// Frames routed to this connection and not taken yet
    pub fn pending(&self) -> usize {
        self.bus
            .lock()
            .routes
            .iter()
            .find(|route| route.handle == self.handle)
            .map_or(0, |route| route.inbox.len())
    }

    /// Drains what the adapter buffered while powering up, tolerating a few bus events
    fn waste_event(&mut self, timing: &CanTiming) -> Result<()> {
        let mut events = 0;
        for _ in 0..timing.waste_event_polls {
            let received = self.bus.lock().driver.read()?;
            match received {
                None => thread::sleep(Duration::from_millis(timing.waste_event_interval_ms)),
                Some(received) if !received.events.is_empty() => {
                    events += 1;
                    debug!(events = ?received.events, "Discarding power-up bus event");
                    if events >= timing.event_retries {
                        break;
                    }
                }
                Some(received) if received.frame.id == 0 => {}
                Some(received) => {
                    // Frames that arrived while powering up still reach their connection
                    if let Err(err) = self.bus.lock().forward(received.frame) {
                        debug!(%err, "Discarding stale frame");
                    }
                }
            }
        }
        Ok(())
    }

    fn write_and_poll(&mut self, id: CanId, data: &[u8], timing: &CanTiming) -> Result<bool> {
        self.write(id, data)?;
        for _ in 0..timing.answer_polls {
            if self.read()? {
                return Ok(true);
            }
            thread::sleep(Duration::from_millis(timing.answer_poll_interval_ms));
        }
        Ok(false)
    }
}

impl<D: CanDriver> CanNetwork for CanInterface<D> {
    fn info(&self) -> &CanConnectionInfo {
        &self.info
    }

    fn connect(&mut self) -> Result<()> {
        let timing = {
            let mut bus = self.bus.lock();
            if bus.master() != Some(self.handle) {
                return Err(SensorError::Configuration(
                    "Only the master can connect".into(),
                ));
            }
            if bus.connected {
                return Err(SensorError::Configuration("Already connected".into()));
            }
            bus.driver.open(&self.info)?;
            bus.connected = true;
            bus.extended = !self.info.standard_frame_format();
            bus.timing.clone()
        };

        thread::sleep(Duration::from_millis(timing.power_up_ms));
        self.waste_event(&timing)?;
        info!(
            port = self.info.port(),
            speed_kbps = self.info.speed_kbps(),
            "CAN adapter connected"
        );
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        let mut bus = self.bus.lock();
        if bus.master() != Some(self.handle) {
            return Err(SensorError::Configuration(
                "Only the master can disconnect".into(),
            ));
        }
        if bus.connected {
            bus.connected = false;
            bus.driver.close()?;
            info!(port = self.info.port(), "CAN adapter disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.bus.lock().connected
    }

    fn read(&mut self) -> Result<bool> {
        let mut bus = self.bus.lock();
        bus.ensure_connected()?;
        let Some(received) = bus.driver.read()? else {
            return Ok(false);
        };
        if !received.events.is_empty() {
            debug!(events = ?received.events, "CAN adapter reported a bus event");
            return Err(SensorError::Event);
        }
        if received.frame.id == 0 {
            return Ok(false);
        }
        debug!(id = received.frame.id, data = ?received.frame.data, "CAN frame received");
        let receiver = bus.forward(received.frame)?;
        Ok(receiver == self.handle)
    }

    fn write(&mut self, id: CanId, data: &[u8]) -> Result<()> {
        let mut bus = self.bus.lock();
        bus.ensure_connected()?;
        let frame = CanFrame::from_slice(id, data);
        let extended = bus.extended;
        debug!(id, data = ?frame.data, "CAN frame sent");
        bus.driver.write(&frame, extended)
    }

    /// Retries the whole write and wait when the adapter reports bus events
    fn write_and_wait_for_answer(&mut self, id: CanId, data: &[u8]) -> Result<bool> {
        let timing = self.timing();
        let mut attempt = 1;
        loop {
            match self.write_and_poll(id, data, &timing) {
                Err(SensorError::Event) if attempt < timing.event_retries => {
                    warn!(attempt, "Bus event while waiting for an answer, retrying");
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    fn take_received(&mut self) -> Option<CanFrame> {
        let handle = self.handle;
        self.bus.lock().route_mut(handle)?.inbox.pop_front()
    }
}

impl<D: CanDriver> Drop for CanInterface<D> {
    fn drop(&mut self) {
        let mut bus = self.bus.lock();
        let was_master = bus.master() == Some(self.handle);
        bus.routes.retain(|route| route.handle != self.handle);

        if was_master {
            if let Some(master) = bus.master() {
                info!(handle = master, "CAN master re-elected");
            }
        }
        if bus.routes.is_empty() && bus.connected {
            bus.connected = false;
            if let Err(err) = bus.driver.close() {
                warn!(%err, "Closing the CAN adapter failed");
            }
        }
    }
}
