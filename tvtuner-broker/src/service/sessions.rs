//! Session objects handed out by the tuner service.
//!
//! Each session owns one driver object. `close` releases it and is safe to
//! call more than once; every other call on a closed session fails with
//! [`HalError::InvalidState`].

use log::{debug, warn};
use parking_lot::Mutex;
use tvtuner_protocol::fmq::legacy::MqDescriptorSync;
use tvtuner_protocol::ResourceId;

use crate::hal::{
    Demux, Filter, Frontend, FrontendSettings, HalError, HalResult, Lnb, LnbTone, LnbVoltage,
};

/// An open frontend.
pub struct FrontendSession {
    id: ResourceId,
    frontend: Mutex<Option<Box<dyn Frontend>>>,
}

impl FrontendSession {
    pub(crate) fn new(id: ResourceId, frontend: Box<dyn Frontend>) -> Self {
        Self {
            id,
            frontend: Mutex::new(Some(frontend)),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    fn with<T>(&self, f: impl FnOnce(&mut dyn Frontend) -> HalResult<T>) -> HalResult<T> {
        match self.frontend.lock().as_mut() {
            Some(frontend) => f(frontend.as_mut()),
            None => Err(HalError::InvalidState),
        }
    }

    pub fn tune(&self, settings: &FrontendSettings) -> HalResult<()> {
        self.with(|fe| fe.tune(settings))
    }

    pub fn stop_tune(&self) -> HalResult<()> {
        self.with(|fe| fe.stop_tune())
    }

    /// Feed this frontend from `lnb`.
    pub fn set_lnb(&self, lnb: &LnbSession) -> HalResult<()> {
        self.with(|fe| fe.set_lnb(lnb.id().get()))
    }

    pub fn close(&self) -> HalResult<()> {
        match self.frontend.lock().take() {
            Some(mut frontend) => {
                debug!("Closing frontend {}", self.id);
                frontend.close()
            }
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.frontend.lock().is_none()
    }
}

impl Drop for FrontendSession {
    fn drop(&mut self) {
        if let Some(mut frontend) = self.frontend.get_mut().take() {
            if let Err(e) = frontend.close() {
                warn!("Failed to close frontend {} on drop: {}", self.id, e);
            }
        }
    }
}

/// An open LNB.
pub struct LnbSession {
    id: ResourceId,
    lnb: Mutex<Option<Box<dyn Lnb>>>,
}

impl LnbSession {
    pub(crate) fn new(id: ResourceId, lnb: Box<dyn Lnb>) -> Self {
        Self {
            id,
            lnb: Mutex::new(Some(lnb)),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    fn with<T>(&self, f: impl FnOnce(&mut dyn Lnb) -> HalResult<T>) -> HalResult<T> {
        match self.lnb.lock().as_mut() {
            Some(lnb) => f(lnb.as_mut()),
            None => Err(HalError::InvalidState),
        }
    }

    pub fn set_voltage(&self, voltage: LnbVoltage) -> HalResult<()> {
        self.with(|lnb| lnb.set_voltage(voltage))
    }

    pub fn set_tone(&self, tone: LnbTone) -> HalResult<()> {
        self.with(|lnb| lnb.set_tone(tone))
    }

    pub fn close(&self) -> HalResult<()> {
        match self.lnb.lock().take() {
            Some(mut lnb) => {
                debug!("Closing LNB {}", self.id);
                lnb.close()
            }
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lnb.lock().is_none()
    }
}

impl Drop for LnbSession {
    fn drop(&mut self) {
        if let Some(mut lnb) = self.lnb.get_mut().take() {
            if let Err(e) = lnb.close() {
                warn!("Failed to close LNB {} on drop: {}", self.id, e);
            }
        }
    }
}

/// A demux together with the filter opened on it.
///
/// Built only once both halves are open and configured.
pub struct FilterPipeline {
    demux_id: ResourceId,
    parts: Mutex<Option<(Box<dyn Demux>, Box<dyn Filter>)>>,
}

impl FilterPipeline {
    pub(crate) fn new(demux_id: ResourceId, demux: Box<dyn Demux>, filter: Box<dyn Filter>) -> Self {
        Self {
            demux_id,
            parts: Mutex::new(Some((demux, filter))),
        }
    }

    pub fn demux_id(&self) -> ResourceId {
        self.demux_id
    }

    fn with_filter<T>(&self, f: impl FnOnce(&mut dyn Filter) -> HalResult<T>) -> HalResult<T> {
        match self.parts.lock().as_mut() {
            Some((_, filter)) => f(filter.as_mut()),
            None => Err(HalError::InvalidState),
        }
    }

    /// Legacy descriptor of the filter's output queue.
    pub fn queue_descriptor(&self) -> HalResult<MqDescriptorSync> {
        self.with_filter(|filter| filter.get_queue_desc())
    }

    pub fn start(&self) -> HalResult<()> {
        self.with_filter(|filter| filter.start())
    }

    pub fn stop(&self) -> HalResult<()> {
        self.with_filter(|filter| filter.stop())
    }

    /// Close the filter, then the demux. Both are closed even if the first
    /// close fails; the first error is returned.
    pub fn close(&self) -> HalResult<()> {
        match self.parts.lock().take() {
            Some((demux, filter)) => {
                debug!("Closing filter pipeline on demux {}", self.demux_id);
                close_parts(demux, filter)
            }
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.parts.lock().is_none()
    }
}

fn close_parts(mut demux: Box<dyn Demux>, mut filter: Box<dyn Filter>) -> HalResult<()> {
    let filter_result = filter.close();
    let demux_result = demux.close();
    filter_result.and(demux_result)
}

impl Drop for FilterPipeline {
    fn drop(&mut self) {
        if let Some((demux, filter)) = self.parts.get_mut().take() {
            if let Err(e) = close_parts(demux, filter) {
                warn!(
                    "Failed to close filter pipeline on demux {} on drop: {}",
                    self.demux_id, e
                );
            }
        }
    }
}
