//! Event flag word for producer/consumer signalling.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::error::{DescriptorError, EventFlagError};
use crate::fmq::bridge::layout_from_current;
use crate::fmq::current::MqDescriptor;
use crate::fmq::layout::QueueLayout;
use crate::fmq::region::SharedRegion;

/// Bit set by the reader after it frees space.
pub const FMQ_NOT_FULL: u32 = 0x01;
/// Bit set by the writer after it queues data.
pub const FMQ_NOT_EMPTY: u32 = 0x02;

/// A 32-bit flag word inside a queue's shared region.
///
/// `wake` sets bits, `wait` blocks until any requested bit is set and then
/// clears the bits it consumed.
#[derive(Debug, Clone)]
pub struct EventFlag {
    region: SharedRegion,
    offset: usize,
}

impl EventFlag {
    /// Derive the event flag from a current-form descriptor.
    ///
    /// Returns `Ok(None)` if the queue was created without a flag word.
    pub fn from_descriptor(desc: &MqDescriptor) -> Result<Option<Self>, DescriptorError> {
        let layout = layout_from_current(desc)?;
        Ok(Self::from_layout(&layout))
    }

    /// Event flag located by a layout's event flag grantor.
    pub fn from_layout(layout: &QueueLayout) -> Option<Self> {
        let (region, offset) = layout.event_flag_word()?;
        region.atomic_u32(offset)?;
        Some(Self {
            region: region.clone(),
            offset,
        })
    }

    fn word(&self) -> &AtomicU32 {
        // Offset was checked in `from_layout` and regions never shrink.
        match self.region.atomic_u32(self.offset) {
            Some(word) => word,
            None => unreachable!("event flag word validated at construction"),
        }
    }

    /// Region id and byte offset of the flag word.
    pub fn location(&self) -> (u64, usize) {
        (self.region.id(), self.offset)
    }

    /// Current value of the flag word.
    pub fn load(&self) -> u32 {
        self.word().load(Ordering::Acquire)
    }

    /// Set `bits` and wake waiters.
    pub fn wake(&self, bits: u32) -> Result<(), EventFlagError> {
        if bits == 0 {
            return Err(EventFlagError::InvalidBitMask);
        }
        self.word().fetch_or(bits, Ordering::AcqRel);
        self.region.wake_all();
        Ok(())
    }

    /// Wait for any of `bits`, consuming and returning the ones that were set.
    pub fn wait(&self, bits: u32, timeout: Duration) -> Result<u32, EventFlagError> {
        if bits == 0 {
            return Err(EventFlagError::InvalidBitMask);
        }
        let word = self.word();
        self.region
            .wait_until(timeout, || {
                let set = word.load(Ordering::Acquire) & bits;
                if set == 0 {
                    return None;
                }
                word.fetch_and(!set, Ordering::AcqRel);
                Some(set)
            })
            .ok_or(EventFlagError::Timeout(bits))
    }
}
