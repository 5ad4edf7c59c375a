//! In-process tuner driver.
//!
//! Behaves like a real driver from the broker's point of view: frontends and
//! LNBs can be opened once at a time, filters hand out a legacy queue
//! descriptor and write transport stream packets into it when started.
//! Every step can be made to fail through [`FailureInjection`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Deserialize;
use tvtuner_protocol::fmq::bridge::layout_to_legacy;
use tvtuner_protocol::fmq::legacy::MqDescriptorSync;
use tvtuner_protocol::fmq::{QueueLayout, SyncReadWriteQueue};
use tvtuner_protocol::FrontendType;

use crate::hal::*;

/// Size of one transport stream packet.
pub const TS_PACKET_SIZE: usize = 188;

/// Steps that can be forced to fail.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FailureInjection {
    pub connect: bool,
    pub open_frontend: bool,
    pub open_demux: bool,
    pub open_filter: bool,
    pub configure_filter: bool,
    pub get_queue_desc: bool,
    pub start_filter: bool,
    /// Hand out a descriptor with only two grantors.
    pub truncate_descriptor: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedFrontendConfig {
    pub id: u32,
    #[serde(rename = "type")]
    pub frontend_type: FrontendType,
    pub min_frequency: u32,
    pub max_frequency: u32,
    #[serde(default)]
    pub min_symbol_rate: u32,
    #[serde(default)]
    pub max_symbol_rate: u32,
    #[serde(default)]
    pub acquire_range: u32,
    #[serde(default)]
    pub exclusive_group_id: u32,
    #[serde(default = "default_status_caps")]
    pub status_caps: Vec<FrontendStatusType>,
}

fn default_status_caps() -> Vec<FrontendStatusType> {
    vec![
        FrontendStatusType::DemodLock,
        FrontendStatusType::Snr,
        FrontendStatusType::SignalStrength,
    ]
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedLnbConfig {
    pub id: u32,
    pub name: String,
}

/// Description of the simulated hardware.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulatedDriverConfig {
    pub frontends: Vec<SimulatedFrontendConfig>,
    pub lnbs: Vec<SimulatedLnbConfig>,
    /// Null packets written into a filter's queue when it starts.
    pub preload_packets: usize,
    /// Delay before `connect` returns.
    pub connect_delay_ms: u64,
    pub failures: FailureInjection,
}

impl Default for SimulatedDriverConfig {
    fn default() -> Self {
        Self {
            frontends: vec![
                SimulatedFrontendConfig {
                    id: 0,
                    frontend_type: FrontendType::Isdbt,
                    min_frequency: 90_000_000,
                    max_frequency: 770_000_000,
                    min_symbol_rate: 0,
                    max_symbol_rate: 0,
                    acquire_range: 1_000_000,
                    exclusive_group_id: 0,
                    status_caps: default_status_caps(),
                },
                SimulatedFrontendConfig {
                    id: 1,
                    frontend_type: FrontendType::Isdbs,
                    min_frequency: 1_032_000_000,
                    max_frequency: 2_071_000_000,
                    min_symbol_rate: 28_860_000,
                    max_symbol_rate: 28_860_000,
                    acquire_range: 2_000_000,
                    exclusive_group_id: 1,
                    status_caps: default_status_caps(),
                },
            ],
            lnbs: vec![
                SimulatedLnbConfig {
                    id: 0,
                    name: "lnb_a".to_string(),
                },
                SimulatedLnbConfig {
                    id: 1,
                    name: "lnb_b".to_string(),
                },
            ],
            preload_packets: 0,
            connect_delay_ms: 0,
            failures: FailureInjection::default(),
        }
    }
}

/// Counts of driver objects currently open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub frontends: usize,
    pub lnbs: usize,
    pub demuxes: usize,
    pub filters: usize,
}

#[derive(Default)]
struct DriverState {
    open_frontends: Mutex<HashSet<u32>>,
    open_lnbs: Mutex<HashSet<u32>>,
    open_demuxes: AtomicUsize,
    open_filters: AtomicUsize,
    next_demux_id: AtomicU32,
}

/// Connector handing out a single [`SimulatedTuner`].
pub struct SimulatedConnector {
    config: Arc<SimulatedDriverConfig>,
    tuner: Arc<SimulatedTuner>,
    connect_calls: AtomicUsize,
}

impl SimulatedConnector {
    pub fn new(config: SimulatedDriverConfig) -> Self {
        let config = Arc::new(config);
        Self {
            tuner: Arc::new(SimulatedTuner {
                config: Arc::clone(&config),
                state: Arc::new(DriverState::default()),
            }),
            config,
            connect_calls: AtomicUsize::new(0),
        }
    }

    /// The driver this connector binds to.
    pub fn tuner(&self) -> &Arc<SimulatedTuner> {
        &self.tuner
    }

    /// Number of times `connect` has been called.
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

impl HalConnector for SimulatedConnector {
    fn connect(&self) -> HalResult<Arc<dyn TunerHal>> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.config.connect_delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.config.connect_delay_ms));
        }
        if self.config.failures.connect {
            warn!("[SimTuner] Driver service not available");
            return Err(HalError::Unavailable);
        }
        info!(
            "[SimTuner] Driver bound ({} frontends, {} lnbs)",
            self.config.frontends.len(),
            self.config.lnbs.len()
        );
        Ok(Arc::clone(&self.tuner) as Arc<dyn TunerHal>)
    }
}

pub struct SimulatedTuner {
    config: Arc<SimulatedDriverConfig>,
    state: Arc<DriverState>,
}

impl SimulatedTuner {
    pub fn stats(&self) -> DriverStats {
        DriverStats {
            frontends: self.state.open_frontends.lock().len(),
            lnbs: self.state.open_lnbs.lock().len(),
            demuxes: self.state.open_demuxes.load(Ordering::SeqCst),
            filters: self.state.open_filters.load(Ordering::SeqCst),
        }
    }

    fn frontend(&self, frontend_id: u32) -> HalResult<&SimulatedFrontendConfig> {
        self.config
            .frontends
            .iter()
            .find(|f| f.id == frontend_id)
            .ok_or(HalError::InvalidArgument)
    }
}

impl TunerHal for SimulatedTuner {
    fn get_frontend_ids(&self) -> HalResult<Vec<u32>> {
        Ok(self.config.frontends.iter().map(|f| f.id).collect())
    }

    fn get_frontend_info(&self, frontend_id: u32) -> HalResult<FrontendInfo> {
        let fe = self.frontend(frontend_id)?;
        Ok(FrontendInfo {
            frontend_type: fe.frontend_type,
            min_frequency: fe.min_frequency,
            max_frequency: fe.max_frequency,
            min_symbol_rate: fe.min_symbol_rate,
            max_symbol_rate: fe.max_symbol_rate,
            acquire_range: fe.acquire_range,
            exclusive_group_id: fe.exclusive_group_id,
            status_caps: fe.status_caps.clone(),
            frontend_caps: FrontendInfoFrontendCaps::typical(fe.frontend_type),
        })
    }

    fn open_frontend_by_id(&self, frontend_id: u32) -> HalResult<Box<dyn Frontend>> {
        let fe = self.frontend(frontend_id)?;
        if self.config.failures.open_frontend {
            return Err(HalError::UnknownError);
        }
        if !self.state.open_frontends.lock().insert(frontend_id) {
            return Err(HalError::InvalidState);
        }
        debug!("[SimTuner] Frontend {} opened", frontend_id);
        Ok(Box::new(SimFrontend {
            id: frontend_id,
            min_frequency: fe.min_frequency,
            max_frequency: fe.max_frequency,
            config: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
            tuned: None,
            lnb: None,
            closed: false,
        }))
    }

    fn open_demux(&self) -> HalResult<(u32, Box<dyn Demux>)> {
        if self.config.failures.open_demux {
            return Err(HalError::Unavailable);
        }
        let id = self.state.next_demux_id.fetch_add(1, Ordering::SeqCst);
        self.state.open_demuxes.fetch_add(1, Ordering::SeqCst);
        debug!("[SimTuner] Demux {} opened", id);
        Ok((
            id,
            Box::new(SimDemux {
                id,
                config: Arc::clone(&self.config),
                state: Arc::clone(&self.state),
                closed: false,
            }),
        ))
    }

    fn get_lnb_ids(&self) -> HalResult<Vec<u32>> {
        Ok(self.config.lnbs.iter().map(|l| l.id).collect())
    }

    fn get_lnb_info(&self, lnb_id: u32) -> HalResult<LnbInfo> {
        self.config
            .lnbs
            .iter()
            .find(|l| l.id == lnb_id)
            .map(|l| LnbInfo {
                id: l.id,
                name: l.name.clone(),
            })
            .ok_or(HalError::InvalidArgument)
    }

    fn open_lnb_by_id(&self, lnb_id: u32) -> HalResult<Box<dyn Lnb>> {
        if !self.config.lnbs.iter().any(|l| l.id == lnb_id) {
            return Err(HalError::InvalidArgument);
        }
        if !self.state.open_lnbs.lock().insert(lnb_id) {
            return Err(HalError::InvalidState);
        }
        debug!("[SimTuner] LNB {} opened", lnb_id);
        Ok(Box::new(SimLnb {
            id: lnb_id,
            state: Arc::clone(&self.state),
            voltage: LnbVoltage::None,
            tone: LnbTone::None,
            closed: false,
        }))
    }
}

struct SimFrontend {
    id: u32,
    min_frequency: u32,
    max_frequency: u32,
    config: Arc<SimulatedDriverConfig>,
    state: Arc<DriverState>,
    tuned: Option<FrontendSettings>,
    lnb: Option<u32>,
    closed: bool,
}

impl Frontend for SimFrontend {
    fn tune(&mut self, settings: &FrontendSettings) -> HalResult<()> {
        if self.closed {
            return Err(HalError::InvalidState);
        }
        if settings.frequency < self.min_frequency || settings.frequency > self.max_frequency {
            return Err(HalError::InvalidArgument);
        }
        debug!(
            "[SimTuner] Frontend {} tuned to {} Hz",
            self.id, settings.frequency
        );
        self.tuned = Some(*settings);
        Ok(())
    }

    fn stop_tune(&mut self) -> HalResult<()> {
        if self.closed {
            return Err(HalError::InvalidState);
        }
        self.tuned = None;
        Ok(())
    }

    fn set_lnb(&mut self, lnb_id: u32) -> HalResult<()> {
        if self.closed {
            return Err(HalError::InvalidState);
        }
        if !self.config.lnbs.iter().any(|l| l.id == lnb_id) {
            return Err(HalError::InvalidArgument);
        }
        self.lnb = Some(lnb_id);
        Ok(())
    }

    fn close(&mut self) -> HalResult<()> {
        if !self.closed {
            debug!(
                "[SimTuner] Frontend {} closed (tuned: {:?}, lnb: {:?})",
                self.id, self.tuned, self.lnb
            );
            self.closed = true;
            self.tuned = None;
            self.state.open_frontends.lock().remove(&self.id);
        }
        Ok(())
    }
}

struct SimDemux {
    id: u32,
    config: Arc<SimulatedDriverConfig>,
    state: Arc<DriverState>,
    closed: bool,
}

impl Demux for SimDemux {
    fn open_filter(
        &mut self,
        filter_type: DemuxFilterType,
        buffer_size: u32,
        callback: Arc<dyn FilterCallback>,
    ) -> HalResult<Box<dyn Filter>> {
        if self.closed {
            return Err(HalError::InvalidState);
        }
        if self.config.failures.open_filter {
            return Err(HalError::OutOfMemory);
        }
        if filter_type.main_type != DemuxFilterMainType::Ts || buffer_size == 0 {
            return Err(HalError::InvalidArgument);
        }
        self.state.open_filters.fetch_add(1, Ordering::SeqCst);
        debug!(
            "[SimTuner] Filter {:?} opened on demux {} ({} bytes)",
            filter_type.sub_type, self.id, buffer_size
        );
        Ok(Box::new(SimFilter {
            buffer_size: buffer_size as usize,
            callback,
            config: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
            tpid: None,
            queue: None,
            running: false,
            closed: false,
        }))
    }

    fn close(&mut self) -> HalResult<()> {
        if !self.closed {
            self.closed = true;
            self.state.open_demuxes.fetch_sub(1, Ordering::SeqCst);
            debug!("[SimTuner] Demux {} closed", self.id);
        }
        Ok(())
    }
}

struct SimFilter {
    buffer_size: usize,
    callback: Arc<dyn FilterCallback>,
    config: Arc<SimulatedDriverConfig>,
    state: Arc<DriverState>,
    tpid: Option<u16>,
    /// Producer side of the output queue, attached through the legacy descriptor.
    queue: Option<(MqDescriptorSync, SyncReadWriteQueue)>,
    running: bool,
    closed: bool,
}

impl SimFilter {
    fn null_packet() -> [u8; TS_PACKET_SIZE] {
        let mut packet = [0xFFu8; TS_PACKET_SIZE];
        packet[..4].copy_from_slice(&[0x47, 0x1F, 0xFF, 0x10]);
        packet
    }
}

impl Filter for SimFilter {
    fn configure(&mut self, settings: &DemuxFilterSettings) -> HalResult<()> {
        if self.closed {
            return Err(HalError::InvalidState);
        }
        if self.config.failures.configure_filter {
            return Err(HalError::InvalidArgument);
        }
        let DemuxFilterSettings::Ts(ts) = settings;
        // PIDs are 13 bits.
        if ts.tpid > 0x1FFF {
            return Err(HalError::InvalidArgument);
        }
        self.tpid = Some(ts.tpid);
        Ok(())
    }

    fn get_queue_desc(&mut self) -> HalResult<MqDescriptorSync> {
        if self.closed || self.tpid.is_none() {
            return Err(HalError::InvalidState);
        }
        if self.config.failures.get_queue_desc {
            return Err(HalError::UnknownError);
        }
        if self.queue.is_none() {
            let layout = QueueLayout::allocate(self.buffer_size, 1, true);
            let desc = layout_to_legacy(&layout).map_err(|_| HalError::OutOfMemory)?;
            let writer =
                SyncReadWriteQueue::from_legacy(&desc).map_err(|_| HalError::UnknownError)?;
            self.queue = Some((desc, writer));
        }
        let mut desc = match &self.queue {
            Some((desc, _)) => desc.clone(),
            None => return Err(HalError::UnknownError),
        };
        if self.config.failures.truncate_descriptor {
            desc.grantors.truncate(2);
        }
        Ok(desc)
    }

    fn start(&mut self) -> HalResult<()> {
        if self.closed {
            return Err(HalError::InvalidState);
        }
        if self.config.failures.start_filter {
            return Err(HalError::UnknownError);
        }
        let (Some(pid), Some((_, writer))) = (self.tpid, &self.queue) else {
            return Err(HalError::InvalidState);
        };

        let packet = Self::null_packet();
        let mut written = 0u64;
        for _ in 0..self.config.preload_packets {
            if writer.write(&packet).is_err() {
                break;
            }
            written += TS_PACKET_SIZE as u64;
        }
        self.running = true;

        if written > 0 {
            self.callback.on_filter_event(&DemuxFilterEvent::TsRecord {
                pid,
                byte_number: written,
            })?;
            self.callback.on_filter_status(DemuxFilterStatus::DataReady)?;
        }
        Ok(())
    }

    fn stop(&mut self) -> HalResult<()> {
        if self.closed {
            return Err(HalError::InvalidState);
        }
        if self.running {
            debug!("[SimTuner] Filter on pid {:?} stopped", self.tpid);
        }
        self.running = false;
        Ok(())
    }

    fn close(&mut self) -> HalResult<()> {
        if !self.closed {
            self.closed = true;
            self.running = false;
            self.queue = None;
            self.state.open_filters.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct SimLnb {
    id: u32,
    state: Arc<DriverState>,
    voltage: LnbVoltage,
    tone: LnbTone,
    closed: bool,
}

impl Lnb for SimLnb {
    fn set_voltage(&mut self, voltage: LnbVoltage) -> HalResult<()> {
        if self.closed {
            return Err(HalError::InvalidState);
        }
        self.voltage = voltage;
        Ok(())
    }

    fn set_tone(&mut self, tone: LnbTone) -> HalResult<()> {
        if self.closed {
            return Err(HalError::InvalidState);
        }
        self.tone = tone;
        Ok(())
    }

    fn close(&mut self) -> HalResult<()> {
        if !self.closed {
            debug!(
                "[SimTuner] LNB {} closed (voltage: {:?}, tone: {:?})",
                self.id, self.voltage, self.tone
            );
            self.closed = true;
            self.voltage = LnbVoltage::None;
            self.state.open_lnbs.lock().remove(&self.id);
        }
        Ok(())
    }
}
