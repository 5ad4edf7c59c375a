//! Tuner hardware driver interface.
//!
//! The broker talks to the driver only through these traits. The driver
//! itself lives behind a versioned interface owned by the platform; the
//! [`simulated`] module provides an in-process implementation.

pub mod simulated;
mod types;

use std::sync::Arc;

use thiserror::Error;
use tvtuner_protocol::fmq::legacy::MqDescriptorSync;

pub use types::*;

/// Result codes returned by the driver.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    #[error("UNAVAILABLE")]
    Unavailable,
    #[error("NOT_INITIALIZED")]
    NotInitialized,
    #[error("INVALID_STATE")]
    InvalidState,
    #[error("INVALID_ARGUMENT")]
    InvalidArgument,
    #[error("OUT_OF_MEMORY")]
    OutOfMemory,
    #[error("UNKNOWN_ERROR")]
    UnknownError,
}

pub type HalResult<T> = Result<T, HalError>;

/// Locates and binds the driver service.
pub trait HalConnector: Send + Sync {
    /// Connect to the driver. May block.
    fn connect(&self) -> HalResult<Arc<dyn TunerHal>>;
}

/// Root driver object.
pub trait TunerHal: Send + Sync {
    fn get_frontend_ids(&self) -> HalResult<Vec<u32>>;

    fn get_frontend_info(&self, frontend_id: u32) -> HalResult<FrontendInfo>;

    fn open_frontend_by_id(&self, frontend_id: u32) -> HalResult<Box<dyn Frontend>>;

    /// Open a demux. Returns the demux id with the demux.
    fn open_demux(&self) -> HalResult<(u32, Box<dyn Demux>)>;

    fn get_lnb_ids(&self) -> HalResult<Vec<u32>>;

    fn get_lnb_info(&self, lnb_id: u32) -> HalResult<LnbInfo>;

    fn open_lnb_by_id(&self, lnb_id: u32) -> HalResult<Box<dyn Lnb>>;
}

pub trait Frontend: Send {
    fn tune(&mut self, settings: &FrontendSettings) -> HalResult<()>;

    fn stop_tune(&mut self) -> HalResult<()>;

    /// Route the frontend's RF input through an LNB.
    fn set_lnb(&mut self, lnb_id: u32) -> HalResult<()>;

    fn close(&mut self) -> HalResult<()>;
}

pub trait Demux: Send {
    fn open_filter(
        &mut self,
        filter_type: DemuxFilterType,
        buffer_size: u32,
        callback: Arc<dyn FilterCallback>,
    ) -> HalResult<Box<dyn Filter>>;

    fn close(&mut self) -> HalResult<()>;
}

pub trait Filter: Send {
    fn configure(&mut self, settings: &DemuxFilterSettings) -> HalResult<()>;

    /// Descriptor of the filter's output queue, in the legacy form.
    fn get_queue_desc(&mut self) -> HalResult<MqDescriptorSync>;

    fn start(&mut self) -> HalResult<()>;

    fn stop(&mut self) -> HalResult<()>;

    fn close(&mut self) -> HalResult<()>;
}

pub trait Lnb: Send {
    fn set_voltage(&mut self, voltage: LnbVoltage) -> HalResult<()>;

    fn set_tone(&mut self, tone: LnbTone) -> HalResult<()>;

    fn close(&mut self) -> HalResult<()>;
}

/// Receives asynchronous notifications from an open filter.
pub trait FilterCallback: Send + Sync {
    fn on_filter_event(&self, event: &DemuxFilterEvent) -> HalResult<()>;

    fn on_filter_status(&self, status: DemuxFilterStatus) -> HalResult<()>;
}
