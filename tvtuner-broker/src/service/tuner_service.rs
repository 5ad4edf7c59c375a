//! Driver session manager.
//!
//! `TunerService` binds the driver once, resolves client handles to driver
//! resources and keeps track of the sessions opened on them. One lock guards
//! the session tables; it is held only while entries are read or swapped,
//! never while the driver is being called.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tvtuner_protocol::fmq::{current, legacy_to_current, EventFlag, SyncReadWriteQueue};
use tvtuner_protocol::{
    DescriptorError, ResourceHandle, ResourceId, ResourceKind, ServiceError,
    TunerFrontendCapabilities, TunerFrontendInfo,
};

use crate::hal::*;
use crate::service::filter_sink::FilterEventSink;
use crate::service::session_table::SessionTable;
use crate::service::sessions::{FilterPipeline, FrontendSession, LnbSession};

/// Size of the filter output queue in bytes.
pub const FILTER_BUFFER_SIZE: u32 = 16_000_000;

/// PID the video filter is configured for.
pub const VIDEO_TPID: u16 = 256;

/// Default bound on driver acquisition.
pub const DEFAULT_DRIVER_TIMEOUT: Duration = Duration::from_secs(5);

const FILTER_TYPE: DemuxFilterType = DemuxFilterType {
    main_type: DemuxFilterMainType::Ts,
    sub_type: DemuxTsFilterType::Video,
};

const FILTER_SETTINGS: DemuxFilterSettings = DemuxFilterSettings::Ts(DemuxTsFilterSettings {
    tpid: VIDEO_TPID,
    filter_settings: DemuxTsFilterSettingsFilterSettings::Av(DemuxFilterAvSettings {
        is_passthrough: false,
    }),
});

fn open_failed(step: &'static str) -> impl FnOnce(HalError) -> ServiceError {
    move |e| ServiceError::SessionOpenFailed {
        step,
        reason: e.to_string(),
    }
}

fn call_failed(call: &'static str) -> impl FnOnce(HalError) -> ServiceError {
    move |e| ServiceError::DriverCallFailed {
        call,
        reason: e.to_string(),
    }
}

#[derive(Default)]
struct Sessions {
    frontends: SessionTable<FrontendSession>,
    lnbs: SessionTable<LnbSession>,
    pipeline: Option<Arc<FilterPipeline>>,
}

/// Counts of sessions currently installed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounts {
    pub frontends: usize,
    pub lnbs: usize,
    pub pipelines: usize,
}

/// A filter queue handed to a client.
///
/// Holds the descriptor in the current form and the event flag derived from
/// it. The pipeline producing into the queue stays open as long as the
/// service keeps it installed.
pub struct QueueBridge {
    descriptor: current::MqDescriptor,
    event_flag: Option<EventFlag>,
    pipeline: Arc<FilterPipeline>,
}

impl QueueBridge {
    pub fn descriptor(&self) -> &current::MqDescriptor {
        &self.descriptor
    }

    pub fn event_flag(&self) -> Option<&EventFlag> {
        self.event_flag.as_ref()
    }

    pub fn pipeline(&self) -> &Arc<FilterPipeline> {
        &self.pipeline
    }

    /// Attach a consumer to the queue.
    pub fn consumer(&self) -> Result<SyncReadWriteQueue, DescriptorError> {
        SyncReadWriteQueue::from_current(&self.descriptor)
    }
}

pub struct TunerService {
    connector: Arc<dyn HalConnector>,
    connect_timeout: Duration,
    driver: OnceCell<Result<Arc<dyn TunerHal>, String>>,
    sessions: Mutex<Sessions>,
}

impl TunerService {
    pub fn new(connector: Arc<dyn HalConnector>, connect_timeout: Duration) -> Self {
        Self {
            connector,
            connect_timeout,
            driver: OnceCell::new(),
            sessions: Mutex::new(Sessions::default()),
        }
    }

    /// Bind the driver on first use.
    ///
    /// Exactly one connection attempt is ever made. Concurrent first callers
    /// wait for it, and a failed attempt is reported to every later caller.
    pub fn ensure_driver_bound(&self) -> Result<Arc<dyn TunerHal>, ServiceError> {
        self.driver
            .get_or_init(|| self.bind_driver())
            .clone()
            .map_err(ServiceError::DriverUnavailable)
    }

    fn bind_driver(&self) -> Result<Arc<dyn TunerHal>, String> {
        info!("Binding tuner driver (timeout: {:?})", self.connect_timeout);
        let (tx, rx) = mpsc::channel();
        let connector = Arc::clone(&self.connector);
        std::thread::Builder::new()
            .name("hal-connect".to_string())
            .spawn(move || {
                let _ = tx.send(connector.connect());
            })
            .map_err(|e| format!("failed to spawn connector thread: {}", e))?;

        match rx.recv_timeout(self.connect_timeout) {
            Ok(Ok(hal)) => {
                info!("Tuner driver bound");
                Ok(hal)
            }
            Ok(Err(e)) => {
                error!("Failed to bind tuner driver: {}", e);
                Err(e.to_string())
            }
            Err(RecvTimeoutError::Timeout) => {
                error!(
                    "Timed out binding tuner driver after {:?}",
                    self.connect_timeout
                );
                Err(format!("timed out after {:?}", self.connect_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                error!("Connector thread exited without a result");
                Err("connector thread exited".to_string())
            }
        }
    }

    /// Ids of every frontend the driver exposes.
    pub fn list_frontend_ids(&self) -> Result<Vec<u32>, ServiceError> {
        let hal = self.ensure_driver_bound()?;
        hal.get_frontend_ids().map_err(call_failed("get_frontend_ids"))
    }

    fn require_frontend(&self, hal: &dyn TunerHal, id: ResourceId) -> Result<(), ServiceError> {
        let ids = hal
            .get_frontend_ids()
            .map_err(call_failed("get_frontend_ids"))?;
        if !ids.contains(&id.get()) {
            return Err(ServiceError::ResourceNotFound {
                kind: ResourceKind::Frontend,
                key: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn get_frontend_info(
        &self,
        handle: ResourceHandle,
    ) -> Result<TunerFrontendInfo, ServiceError> {
        let id = handle.resource_id(ResourceKind::Frontend);
        let hal = self.ensure_driver_bound()?;
        self.require_frontend(hal.as_ref(), id)?;
        let info = hal
            .get_frontend_info(id.get())
            .map_err(call_failed("get_frontend_info"))?;
        Ok(convert_frontend_info(id, info))
    }

    /// Open the frontend named by `handle`.
    ///
    /// An existing session on the same frontend is closed first.
    pub fn open_frontend(
        &self,
        handle: ResourceHandle,
    ) -> Result<Arc<FrontendSession>, ServiceError> {
        let id = handle.resource_id(ResourceKind::Frontend);
        let hal = self.ensure_driver_bound()?;
        self.require_frontend(hal.as_ref(), id)?;

        let previous = self.sessions.lock().frontends.take(id);
        close_displaced_frontend(previous);

        let frontend = hal
            .open_frontend_by_id(id.get())
            .map_err(open_failed("open_frontend"))?;
        let session = Arc::new(FrontendSession::new(id, frontend));
        let raced = self.sessions.lock().frontends.install(id, Arc::clone(&session));
        close_displaced_frontend(raced);

        info!("Frontend {} opened", id);
        Ok(session)
    }

    /// Close the frontend session installed for `id`.
    pub fn close_frontend(&self, id: ResourceId) -> bool {
        let session = self.sessions.lock().frontends.take(id);
        match session {
            Some(session) => {
                close_displaced_frontend(Some(session));
                true
            }
            None => false,
        }
    }

    /// Close `session`, removing it from the table if it is still installed.
    pub fn release_frontend(&self, session: &Arc<FrontendSession>) {
        self.sessions.lock().frontends.release(session.id(), session);
        if let Err(e) = session.close() {
            warn!("Failed to close frontend {}: {}", session.id(), e);
        }
    }

    pub fn open_lnb(&self, handle: ResourceHandle) -> Result<Arc<LnbSession>, ServiceError> {
        let id = handle.resource_id(ResourceKind::Lnb);
        let hal = self.ensure_driver_bound()?;
        let ids = hal.get_lnb_ids().map_err(call_failed("get_lnb_ids"))?;
        if !ids.contains(&id.get()) {
            return Err(ServiceError::ResourceNotFound {
                kind: ResourceKind::Lnb,
                key: id.to_string(),
            });
        }
        self.open_lnb_id(hal.as_ref(), id)
    }

    /// Open the LNB whose name matches `name` exactly.
    pub fn open_lnb_by_name(&self, name: &str) -> Result<Arc<LnbSession>, ServiceError> {
        let hal = self.ensure_driver_bound()?;
        let ids = hal.get_lnb_ids().map_err(call_failed("get_lnb_ids"))?;
        for lnb_id in ids {
            let info = hal
                .get_lnb_info(lnb_id)
                .map_err(call_failed("get_lnb_info"))?;
            if info.name == name {
                debug!("LNB name '{}' resolved to id {}", name, info.id);
                return self.open_lnb_id(hal.as_ref(), ResourceId(info.id));
            }
        }
        Err(ServiceError::ResourceNotFound {
            kind: ResourceKind::Lnb,
            key: name.to_string(),
        })
    }

    fn open_lnb_id(&self, hal: &dyn TunerHal, id: ResourceId) -> Result<Arc<LnbSession>, ServiceError> {
        let previous = self.sessions.lock().lnbs.take(id);
        close_displaced_lnb(previous);

        let lnb = hal.open_lnb_by_id(id.get()).map_err(open_failed("open_lnb"))?;
        let session = Arc::new(LnbSession::new(id, lnb));
        let raced = self.sessions.lock().lnbs.install(id, Arc::clone(&session));
        close_displaced_lnb(raced);

        info!("LNB {} opened", id);
        Ok(session)
    }

    pub fn close_lnb(&self, id: ResourceId) -> bool {
        let session = self.sessions.lock().lnbs.take(id);
        match session {
            Some(session) => {
                close_displaced_lnb(Some(session));
                true
            }
            None => false,
        }
    }

    pub fn release_lnb(&self, session: &Arc<LnbSession>) {
        self.sessions.lock().lnbs.release(session.id(), session);
        if let Err(e) = session.close() {
            warn!("Failed to close LNB {}: {}", session.id(), e);
        }
    }

    /// Descramblers are declared by the driver interface but not supported.
    pub fn open_descrambler(&self, handle: ResourceHandle) -> Result<(), ServiceError> {
        debug!(
            "Descrambler {} requested",
            handle.resource_id(ResourceKind::Descrambler)
        );
        Err(ServiceError::UnsupportedResourceKind(
            ResourceKind::Descrambler,
        ))
    }

    pub fn open_filter_pipeline(&self) -> Result<Arc<FilterPipeline>, ServiceError> {
        self.open_filter_pipeline_with(Arc::new(FilterEventSink))
    }

    /// Open a demux and a TS video filter on it, replacing the current
    /// pipeline.
    ///
    /// Either both are opened and configured, or whatever was opened is
    /// closed again and nothing is installed.
    pub fn open_filter_pipeline_with(
        &self,
        callback: Arc<dyn FilterCallback>,
    ) -> Result<Arc<FilterPipeline>, ServiceError> {
        let hal = self.ensure_driver_bound()?;

        let previous = self.sessions.lock().pipeline.take();
        close_displaced_pipeline(previous);

        let (demux_id, mut demux) = hal.open_demux().map_err(open_failed("open_demux"))?;

        let mut filter = match demux.open_filter(FILTER_TYPE, FILTER_BUFFER_SIZE, callback) {
            Ok(filter) => filter,
            Err(e) => {
                warn!("Failed to open filter on demux {}: {}", demux_id, e);
                rollback_demux(demux_id, demux);
                return Err(open_failed("open_filter")(e));
            }
        };

        if let Err(e) = filter.configure(&FILTER_SETTINGS) {
            warn!("Failed to configure filter on demux {}: {}", demux_id, e);
            if let Err(close_err) = filter.close() {
                warn!("Failed to close filter during rollback: {}", close_err);
            }
            rollback_demux(demux_id, demux);
            return Err(open_failed("configure_filter")(e));
        }

        let pipeline = Arc::new(FilterPipeline::new(ResourceId(demux_id), demux, filter));
        let raced = self.sessions.lock().pipeline.replace(Arc::clone(&pipeline));
        close_displaced_pipeline(raced);

        info!("Filter pipeline opened on demux {}", demux_id);
        Ok(pipeline)
    }

    pub fn close_filter_pipeline(&self) -> bool {
        let pipeline = self.sessions.lock().pipeline.take();
        match pipeline {
            Some(pipeline) => {
                close_displaced_pipeline(Some(pipeline));
                true
            }
            None => false,
        }
    }

    /// Close `pipeline`, uninstalling it if it is still the current one.
    pub fn release_filter_pipeline(&self, pipeline: &Arc<FilterPipeline>) {
        {
            let mut sessions = self.sessions.lock();
            if matches!(&sessions.pipeline, Some(current) if Arc::ptr_eq(current, pipeline)) {
                sessions.pipeline = None;
            }
        }
        if let Err(e) = pipeline.close() {
            warn!(
                "Failed to close filter pipeline on demux {}: {}",
                pipeline.demux_id(),
                e
            );
        }
    }

    /// Open a fresh filter pipeline and hand out its queue in the current
    /// descriptor form.
    ///
    /// The driver's legacy descriptor is converted, the event flag is
    /// derived from the converted descriptor, then the filter is started.
    /// On failure the new pipeline is closed.
    pub fn get_fmq_sync_read_write(&self) -> Result<QueueBridge, ServiceError> {
        let pipeline = self.open_filter_pipeline()?;
        match Self::bridge_queue(&pipeline) {
            Ok((descriptor, event_flag)) => {
                info!(
                    "Filter queue ready ({} grantors, {} bytes)",
                    descriptor.grantors.len(),
                    descriptor
                        .grantors
                        .get(tvtuner_protocol::fmq::DATA_PTR_POS)
                        .map_or(0, |g| g.extent)
                );
                Ok(QueueBridge {
                    descriptor,
                    event_flag,
                    pipeline,
                })
            }
            Err(e) => {
                self.release_filter_pipeline(&pipeline);
                Err(e)
            }
        }
    }

    fn bridge_queue(
        pipeline: &FilterPipeline,
    ) -> Result<(current::MqDescriptor, Option<EventFlag>), ServiceError> {
        let legacy = pipeline
            .queue_descriptor()
            .map_err(open_failed("get_queue_desc"))?;
        let descriptor = legacy_to_current(&legacy)?;
        let event_flag = EventFlag::from_descriptor(&descriptor)?;
        pipeline.start().map_err(open_failed("start_filter"))?;
        Ok((descriptor, event_flag))
    }

    pub fn session_counts(&self) -> SessionCounts {
        let sessions = self.sessions.lock();
        SessionCounts {
            frontends: sessions.frontends.len(),
            lnbs: sessions.lnbs.len(),
            pipelines: usize::from(sessions.pipeline.is_some()),
        }
    }

    /// Close every open session.
    pub fn shutdown(&self) {
        let (frontends, lnbs, pipeline) = {
            let mut sessions = self.sessions.lock();
            (
                sessions.frontends.drain(),
                sessions.lnbs.drain(),
                sessions.pipeline.take(),
            )
        };
        info!(
            "Shutting down tuner service ({} frontends, {} lnbs, {} pipelines)",
            frontends.len(),
            lnbs.len(),
            usize::from(pipeline.is_some())
        );
        close_displaced_pipeline(pipeline);
        for frontend in frontends {
            close_displaced_frontend(Some(frontend));
        }
        for lnb in lnbs {
            close_displaced_lnb(Some(lnb));
        }
    }
}

fn close_displaced_frontend(session: Option<Arc<FrontendSession>>) {
    if let Some(session) = session {
        if let Err(e) = session.close() {
            warn!("Failed to close frontend {}: {}", session.id(), e);
        }
    }
}

fn close_displaced_lnb(session: Option<Arc<LnbSession>>) {
    if let Some(session) = session {
        if let Err(e) = session.close() {
            warn!("Failed to close LNB {}: {}", session.id(), e);
        }
    }
}

fn close_displaced_pipeline(pipeline: Option<Arc<FilterPipeline>>) {
    if let Some(pipeline) = pipeline {
        if let Err(e) = pipeline.close() {
            warn!(
                "Failed to close filter pipeline on demux {}: {}",
                pipeline.demux_id(),
                e
            );
        }
    }
}

fn rollback_demux(demux_id: u32, mut demux: Box<dyn Demux>) {
    if let Err(e) = demux.close() {
        warn!("Failed to close demux {} during rollback: {}", demux_id, e);
    }
}

/// Map the driver's frontend description onto the client-facing one.
pub fn convert_frontend_info(id: ResourceId, info: FrontendInfo) -> TunerFrontendInfo {
    use TunerFrontendCapabilities as C;

    let capabilities = match info.frontend_caps {
        FrontendInfoFrontendCaps::None => None,
        FrontendInfoFrontendCaps::Analog(c) => Some(C::Analog {
            type_cap: c.type_cap,
            sif_standard_cap: c.sif_standard_cap,
        }),
        FrontendInfoFrontendCaps::Atsc(c) => Some(C::Atsc {
            modulation_cap: c.modulation_cap,
        }),
        FrontendInfoFrontendCaps::Atsc3(c) => Some(C::Atsc3 {
            bandwidth_cap: c.bandwidth_cap,
            modulation_cap: c.modulation_cap,
            time_interleave_mode_cap: c.time_interleave_mode_cap,
            code_rate_cap: c.code_rate_cap,
            fec_cap: c.fec_cap,
            demod_output_format_cap: c.demod_output_format_cap,
        }),
        FrontendInfoFrontendCaps::Dvbc(c) => Some(C::Dvbc {
            modulation_cap: c.modulation_cap,
            fec_cap: c.fec_cap,
            annex_cap: c.annex_cap,
        }),
        FrontendInfoFrontendCaps::Dvbs(c) => Some(C::Dvbs {
            modulation_cap: c.modulation_cap,
            inner_fec_cap: c.inner_fec_cap,
            standard: c.standard,
        }),
        FrontendInfoFrontendCaps::Dvbt(c) => Some(C::Dvbt {
            transmission_mode_cap: c.transmission_mode_cap,
            bandwidth_cap: c.bandwidth_cap,
            constellation_cap: c.constellation_cap,
            coderate_cap: c.coderate_cap,
            hierarchy_cap: c.hierarchy_cap,
            guard_interval_cap: c.guard_interval_cap,
            is_t2_supported: c.is_t2_supported,
            is_miso_supported: c.is_miso_supported,
        }),
        FrontendInfoFrontendCaps::Isdbs(c) => Some(C::Isdbs {
            modulation_cap: c.modulation_cap,
            coderate_cap: c.coderate_cap,
        }),
        FrontendInfoFrontendCaps::Isdbs3(c) => Some(C::Isdbs3 {
            modulation_cap: c.modulation_cap,
            coderate_cap: c.coderate_cap,
        }),
        FrontendInfoFrontendCaps::Isdbt(c) => Some(C::Isdbt {
            mode_cap: c.mode_cap,
            bandwidth_cap: c.bandwidth_cap,
            modulation_cap: c.modulation_cap,
            coderate_cap: c.coderate_cap,
            guard_interval_cap: c.guard_interval_cap,
        }),
    };

    TunerFrontendInfo {
        id: id.get(),
        frontend_type: info.frontend_type,
        min_frequency: info.min_frequency,
        max_frequency: info.max_frequency,
        min_symbol_rate: info.min_symbol_rate,
        max_symbol_rate: info.max_symbol_rate,
        acquire_range: info.acquire_range,
        // Group ids are reinterpreted bit for bit.
        exclusive_group_id: info.exclusive_group_id as i32,
        status_caps: info.status_caps.iter().map(|s| *s as u32).collect(),
        capabilities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::simulated::{
        DriverStats, FailureInjection, SimulatedConnector, SimulatedDriverConfig,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use tvtuner_protocol::fmq::{current_to_legacy, FMQ_NOT_EMPTY};
    use tvtuner_protocol::{ErrorCode, FrontendType};

    fn handle(id: u32) -> ResourceHandle {
        ResourceHandle::from_raw(0xA500_0000 | (id << 16) | 0x1234)
    }

    fn service_with(config: SimulatedDriverConfig) -> (Arc<SimulatedConnector>, TunerService) {
        let connector = Arc::new(SimulatedConnector::new(config));
        let service = TunerService::new(connector.clone(), DEFAULT_DRIVER_TIMEOUT);
        (connector, service)
    }

    fn service() -> (Arc<SimulatedConnector>, TunerService) {
        service_with(SimulatedDriverConfig::default())
    }

    fn failing(failures: FailureInjection) -> (Arc<SimulatedConnector>, TunerService) {
        service_with(SimulatedDriverConfig {
            failures,
            ..Default::default()
        })
    }

    #[test]
    fn test_driver_bound_once_under_contention() {
        let (connector, service) = service_with(SimulatedDriverConfig {
            connect_delay_ms: 50,
            ..Default::default()
        });
        let service = Arc::new(service);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = Arc::clone(&service);
                thread::spawn(move || service.ensure_driver_bound().is_ok())
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
        assert!(service.ensure_driver_bound().is_ok());
        assert_eq!(connector.connect_calls(), 1);
    }

    #[test]
    fn test_driver_failure_is_permanent() {
        let (connector, service) = failing(FailureInjection {
            connect: true,
            ..Default::default()
        });

        for _ in 0..3 {
            let err = service.list_frontend_ids().err().unwrap();
            assert!(matches!(err, ServiceError::DriverUnavailable(_)));
            assert_eq!(err.code(), ErrorCode::DriverUnavailable);
        }
        assert!(matches!(
            service.open_frontend(handle(0)),
            Err(ServiceError::DriverUnavailable(_))
        ));
        assert!(matches!(
            service.get_frontend_info(handle(0)),
            Err(ServiceError::DriverUnavailable(_))
        ));
        assert!(matches!(
            service.open_lnb(handle(0)),
            Err(ServiceError::DriverUnavailable(_))
        ));
        assert!(matches!(
            service.open_lnb_by_name("lnb_a"),
            Err(ServiceError::DriverUnavailable(_))
        ));
        assert!(matches!(
            service.open_filter_pipeline(),
            Err(ServiceError::DriverUnavailable(_))
        ));
        assert!(matches!(
            service.get_fmq_sync_read_write(),
            Err(ServiceError::DriverUnavailable(_))
        ));

        assert_eq!(connector.connect_calls(), 1);
        assert_eq!(service.session_counts(), SessionCounts::default());
        assert_eq!(connector.tuner().stats(), DriverStats::default());
    }

    #[test]
    fn test_driver_bind_timeout() {
        let connector = Arc::new(SimulatedConnector::new(SimulatedDriverConfig {
            connect_delay_ms: 500,
            ..Default::default()
        }));
        let service = TunerService::new(connector, Duration::from_millis(20));
        let err = service.ensure_driver_bound().err().unwrap();
        assert!(matches!(err, ServiceError::DriverUnavailable(ref reason) if reason.contains("timed out")));
    }

    #[test]
    fn test_list_frontend_ids() {
        let (_, service) = service();
        assert_eq!(service.list_frontend_ids().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_get_frontend_info() {
        let (_, service) = service();
        let info = service.get_frontend_info(handle(1)).unwrap();
        assert_eq!(info.id, 1);
        assert_eq!(info.frontend_type, FrontendType::Isdbs);
        assert_eq!(info.min_frequency, 1_032_000_000);
        assert_eq!(info.max_symbol_rate, 28_860_000);
        assert_eq!(info.exclusive_group_id, 1);
        assert_eq!(info.status_caps, vec![0, 1, 6]);
        assert!(matches!(
            info.capabilities,
            Some(TunerFrontendCapabilities::Isdbs { .. })
        ));
    }

    #[test]
    fn test_get_frontend_info_unknown_id() {
        let (_, service) = service();
        let err = service.get_frontend_info(handle(7)).err().unwrap();
        assert_eq!(
            err,
            ServiceError::ResourceNotFound {
                kind: ResourceKind::Frontend,
                key: "7".to_string()
            }
        );
    }

    #[test]
    fn test_open_frontend_resolves_handle() {
        let (connector, service) = service();
        let session = service.open_frontend(handle(1)).unwrap();
        assert_eq!(session.id(), ResourceId(1));
        assert_eq!(connector.tuner().stats().frontends, 1);

        session
            .tune(&FrontendSettings {
                frontend_type: FrontendType::Isdbs,
                frequency: 1_318_000_000,
                symbol_rate: 28_860_000,
            })
            .unwrap();
        session.stop_tune().unwrap();
    }

    #[test]
    fn test_reopen_replaces_and_closes() {
        let (connector, service) = service();
        let first = service.open_frontend(handle(0)).unwrap();
        let second = service.open_frontend(handle(0)).unwrap();

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(first.stop_tune(), Err(HalError::InvalidState));
        assert_eq!(connector.tuner().stats().frontends, 1);
        assert_eq!(service.session_counts().frontends, 1);
    }

    #[test]
    fn test_distinct_ids_do_not_share_slot() {
        let (connector, service) = service();
        let a = service.open_frontend(handle(0)).unwrap();
        let b = service.open_frontend(handle(1)).unwrap();
        assert!(!a.is_closed());
        assert!(!b.is_closed());
        assert_eq!(connector.tuner().stats().frontends, 2);
    }

    #[test]
    fn test_concurrent_open_distinct_frontends() {
        let (connector, service) = service();
        let service = Arc::new(service);
        let opened = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..2)
            .map(|id| {
                let service = Arc::clone(&service);
                let opened = Arc::clone(&opened);
                thread::spawn(move || {
                    let session = service.open_frontend(handle(id)).unwrap();
                    assert_eq!(session.id(), ResourceId(id));
                    opened.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_eq!(service.session_counts().frontends, 2);
        assert_eq!(connector.tuner().stats().frontends, 2);
    }

    #[test]
    fn test_open_frontend_unknown_id() {
        let (connector, service) = service();
        assert!(matches!(
            service.open_frontend(handle(0x42)),
            Err(ServiceError::ResourceNotFound { .. })
        ));
        assert_eq!(connector.tuner().stats(), DriverStats::default());
    }

    #[test]
    fn test_open_frontend_driver_failure() {
        let (_, service) = failing(FailureInjection {
            open_frontend: true,
            ..Default::default()
        });
        let err = service.open_frontend(handle(0)).err().unwrap();
        assert_eq!(
            err,
            ServiceError::SessionOpenFailed {
                step: "open_frontend",
                reason: "UNKNOWN_ERROR".to_string()
            }
        );
        assert_eq!(service.session_counts(), SessionCounts::default());
    }

    #[test]
    fn test_close_and_release_frontend() {
        let (connector, service) = service();
        let stale = service.open_frontend(handle(0)).unwrap();
        let current = service.open_frontend(handle(0)).unwrap();

        // Releasing a displaced session leaves the current one installed.
        service.release_frontend(&stale);
        assert_eq!(service.session_counts().frontends, 1);
        assert!(!current.is_closed());

        assert!(service.close_frontend(ResourceId(0)));
        assert!(!service.close_frontend(ResourceId(0)));
        assert!(current.is_closed());
        assert_eq!(connector.tuner().stats().frontends, 0);
    }

    #[test]
    fn test_open_lnb_by_handle() {
        let (_, service) = service();
        let lnb = service.open_lnb(handle(1)).unwrap();
        assert_eq!(lnb.id(), ResourceId(1));
        lnb.set_voltage(LnbVoltage::Voltage18V).unwrap();

        assert!(matches!(
            service.open_lnb(handle(5)),
            Err(ServiceError::ResourceNotFound {
                kind: ResourceKind::Lnb,
                ..
            })
        ));
    }

    #[test]
    fn test_open_lnb_by_name_exact_match() {
        let (connector, service) = service();
        let lnb = service.open_lnb_by_name("lnb_b").unwrap();
        assert_eq!(lnb.id(), ResourceId(1));
        assert_eq!(connector.tuner().stats().lnbs, 1);

        let err = service.open_lnb_by_name("LNB_B").err().unwrap();
        assert_eq!(
            err,
            ServiceError::ResourceNotFound {
                kind: ResourceKind::Lnb,
                key: "LNB_B".to_string()
            }
        );
        assert!(service.open_lnb_by_name("lnb_c").is_err());
    }

    #[test]
    fn test_frontend_set_lnb() {
        let (_, service) = service();
        let frontend = service.open_frontend(handle(1)).unwrap();
        let lnb = service.open_lnb_by_name("lnb_a").unwrap();
        frontend.set_lnb(&lnb).unwrap();
        lnb.set_tone(LnbTone::Continuous).unwrap();
        assert!(service.close_lnb(ResourceId(0)));
        assert!(lnb.is_closed());
    }

    #[test]
    fn test_descrambler_unsupported() {
        let (_, service) = service();
        let err = service.open_descrambler(handle(0)).err().unwrap();
        assert_eq!(
            err,
            ServiceError::UnsupportedResourceKind(ResourceKind::Descrambler)
        );
        assert_eq!(err.code(), ErrorCode::UnsupportedResourceKind);
    }

    #[test]
    fn test_filter_failure_rolls_back_demux() {
        let (connector, service) = failing(FailureInjection {
            open_filter: true,
            ..Default::default()
        });
        let err = service.open_filter_pipeline().err().unwrap();
        assert!(matches!(
            err,
            ServiceError::SessionOpenFailed {
                step: "open_filter",
                ..
            }
        ));
        assert_eq!(connector.tuner().stats(), DriverStats::default());
        assert_eq!(service.session_counts().pipelines, 0);
    }

    #[test]
    fn test_configure_failure_rolls_back_both() {
        let (connector, service) = failing(FailureInjection {
            configure_filter: true,
            ..Default::default()
        });
        assert!(matches!(
            service.open_filter_pipeline(),
            Err(ServiceError::SessionOpenFailed {
                step: "configure_filter",
                ..
            })
        ));
        assert_eq!(connector.tuner().stats(), DriverStats::default());
    }

    #[test]
    fn test_demux_failure() {
        let (connector, service) = failing(FailureInjection {
            open_demux: true,
            ..Default::default()
        });
        assert!(matches!(
            service.get_fmq_sync_read_write(),
            Err(ServiceError::SessionOpenFailed {
                step: "open_demux",
                ..
            })
        ));
        assert_eq!(service.session_counts().pipelines, 0);
        assert_eq!(connector.tuner().stats(), DriverStats::default());
    }

    #[test]
    fn test_filter_pipeline_replaced() {
        let (connector, service) = service();
        let first = service.open_filter_pipeline().unwrap();
        let second = service.open_filter_pipeline().unwrap();
        assert!(first.is_closed());
        assert_ne!(first.demux_id(), second.demux_id());
        assert_eq!(connector.tuner().stats().demuxes, 1);
        assert_eq!(connector.tuner().stats().filters, 1);
    }

    #[test]
    fn test_custom_filter_callback() {
        struct Counter(AtomicUsize);
        impl FilterCallback for Counter {
            fn on_filter_event(&self, _event: &DemuxFilterEvent) -> HalResult<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            fn on_filter_status(&self, _status: DemuxFilterStatus) -> HalResult<()> {
                Ok(())
            }
        }

        let (_, service) = service_with(SimulatedDriverConfig {
            preload_packets: 2,
            ..Default::default()
        });
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let pipeline = service.open_filter_pipeline_with(counter.clone()).unwrap();
        pipeline.queue_descriptor().unwrap();
        pipeline.start().unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        pipeline.stop().unwrap();
    }

    #[test]
    fn test_fmq_descriptor_matches_driver_layout() {
        let (_, service) = service();
        let bridge = service.get_fmq_sync_read_write().unwrap();
        let desc = bridge.descriptor();

        assert_eq!(desc.grantors.len(), 4);
        assert_eq!(desc.flags, current::SYNCHRONIZED_READ_WRITE);
        assert_eq!(desc.quantum, 1);
        assert_eq!(desc.grantors[2].extent, FILTER_BUFFER_SIZE as i64);

        // The driver's own descriptor is the reverse conversion.
        let legacy = bridge.pipeline().queue_descriptor().unwrap();
        assert_eq!(current_to_legacy(desc).unwrap(), legacy);
        assert!(bridge.event_flag().is_some());
    }

    #[test]
    fn test_fmq_data_flows_to_consumer() {
        let (_, service) = service_with(SimulatedDriverConfig {
            preload_packets: 5,
            ..Default::default()
        });
        let bridge = service.get_fmq_sync_read_write().unwrap();
        let flag = bridge.event_flag().unwrap();
        assert_eq!(
            flag.wait(FMQ_NOT_EMPTY, Duration::from_millis(100)).unwrap(),
            FMQ_NOT_EMPTY
        );

        let consumer = bridge.consumer().unwrap();
        assert_eq!(consumer.available_to_read().unwrap(), 188 * 5);
        let mut packet = [0u8; 188];
        consumer.read(&mut packet).unwrap();
        assert_eq!(packet[0], 0x47);
    }

    #[test]
    fn test_malformed_descriptor_closes_pipeline() {
        let (connector, service) = failing(FailureInjection {
            truncate_descriptor: true,
            ..Default::default()
        });
        let err = service.get_fmq_sync_read_write().err().unwrap();
        assert_eq!(
            err,
            ServiceError::DescriptorConversionFailed(DescriptorError::MissingGrantors {
                found: 2,
                required: 3
            })
        );
        assert_eq!(connector.tuner().stats(), DriverStats::default());
        assert_eq!(service.session_counts().pipelines, 0);
    }

    #[test]
    fn test_start_failure_closes_pipeline() {
        let (connector, service) = failing(FailureInjection {
            start_filter: true,
            ..Default::default()
        });
        assert!(matches!(
            service.get_fmq_sync_read_write(),
            Err(ServiceError::SessionOpenFailed {
                step: "start_filter",
                ..
            })
        ));
        assert_eq!(connector.tuner().stats(), DriverStats::default());
    }

    #[test]
    fn test_shutdown_closes_everything() {
        let (connector, service) = service();
        service.open_frontend(handle(0)).unwrap();
        service.open_frontend(handle(1)).unwrap();
        service.open_lnb_by_name("lnb_a").unwrap();
        service.get_fmq_sync_read_write().unwrap();

        service.shutdown();
        assert_eq!(service.session_counts(), SessionCounts::default());
        assert_eq!(connector.tuner().stats(), DriverStats::default());
    }

    #[test]
    fn test_convert_frontend_info_without_caps() {
        let info = FrontendInfo {
            frontend_type: FrontendType::Undefined,
            min_frequency: 1,
            max_frequency: 2,
            min_symbol_rate: 3,
            max_symbol_rate: 4,
            acquire_range: 5,
            exclusive_group_id: u32::MAX,
            status_caps: vec![FrontendStatusType::Agc],
            frontend_caps: FrontendInfoFrontendCaps::None,
        };
        let converted = convert_frontend_info(ResourceId(3), info);
        assert_eq!(converted.id, 3);
        assert_eq!(converted.exclusive_group_id, -1);
        assert_eq!(converted.status_caps, vec![14]);
        assert_eq!(converted.capabilities, None);
    }
}
