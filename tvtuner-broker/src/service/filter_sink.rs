//! Default filter callback.

use log::trace;

use crate::hal::{DemuxFilterEvent, DemuxFilterStatus, FilterCallback, HalResult};

/// Accepts every filter notification and does nothing with it.
///
/// Data reaches clients through the filter's queue, not through the
/// callback, so the broker has no use for the events themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilterEventSink;

impl FilterCallback for FilterEventSink {
    fn on_filter_event(&self, event: &DemuxFilterEvent) -> HalResult<()> {
        trace!("Filter event ignored: {:?}", event);
        Ok(())
    }

    fn on_filter_status(&self, status: DemuxFilterStatus) -> HalResult<()> {
        trace!("Filter status ignored: {:?}", status);
        Ok(())
    }
}
