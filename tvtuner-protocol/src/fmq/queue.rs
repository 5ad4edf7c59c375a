//! Synchronized read/write queue over a shared region.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::{DescriptorError, QueueError};
use crate::fmq::bridge::{layout_from_current, layout_from_legacy};
use crate::fmq::event_flag::{EventFlag, FMQ_NOT_EMPTY, FMQ_NOT_FULL};
use crate::fmq::layout::QueueLayout;
use crate::fmq::region::SharedRegion;
use crate::fmq::{current, legacy};

/// A single-producer, single-consumer byte queue.
///
/// Read and write positions are free-running u64 counters stored in the
/// shared region; the ring index is the counter modulo the capacity. The
/// writer only advances the write counter, the reader only the read counter,
/// so producer and consumer may live on either side of a descriptor
/// conversion and still agree on the queue state.
#[derive(Debug, Clone)]
pub struct SyncReadWriteQueue {
    layout: QueueLayout,
    data_region: SharedRegion,
    data_offset: usize,
    capacity: usize,
    event_flag: Option<EventFlag>,
}

impl SyncReadWriteQueue {
    /// Attach to the queue described by `layout`.
    pub fn from_layout(layout: QueueLayout) -> Result<Self, DescriptorError> {
        layout.validate()?;
        let (data_region, data_offset, capacity) = match layout.data() {
            Some((region, offset, extent)) => (region.clone(), offset, extent),
            None => {
                return Err(DescriptorError::MissingGrantors {
                    found: layout.grantors.len(),
                    required: crate::fmq::MIN_GRANTOR_COUNT,
                })
            }
        };
        let event_flag = EventFlag::from_layout(&layout);
        Ok(Self {
            layout,
            data_region,
            data_offset,
            capacity,
            event_flag,
        })
    }

    /// Attach through a legacy descriptor.
    pub fn from_legacy(desc: &legacy::MqDescriptorSync) -> Result<Self, DescriptorError> {
        Self::from_layout(layout_from_legacy(desc)?)
    }

    /// Attach through a current descriptor.
    pub fn from_current(desc: &current::MqDescriptor) -> Result<Self, DescriptorError> {
        Self::from_layout(layout_from_current(desc)?)
    }

    /// The layout this queue is attached to.
    pub fn layout(&self) -> &QueueLayout {
        &self.layout
    }

    pub fn event_flag(&self) -> Option<&EventFlag> {
        self.event_flag.as_ref()
    }

    /// Capacity of the ring in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn quantum(&self) -> usize {
        self.layout.quantum
    }

    fn read_counter(&self) -> &AtomicU64 {
        let (region, offset) = self.index(self.layout.read_index());
        region_word(region, offset)
    }

    fn write_counter(&self) -> &AtomicU64 {
        let (region, offset) = self.index(self.layout.write_index());
        region_word(region, offset)
    }

    fn index<'a>(&self, slot: Option<(&'a SharedRegion, usize)>) -> (&'a SharedRegion, usize) {
        match slot {
            Some(slot) => slot,
            None => unreachable!("index grantors validated at construction"),
        }
    }

    /// Bytes queued and not yet read.
    ///
    /// Fails when the counters in shared memory are further apart than the
    /// ring is long.
    pub fn available_to_read(&self) -> Result<usize, QueueError> {
        let write = self.write_counter().load(Ordering::Acquire);
        let read = self.read_counter().load(Ordering::Acquire);
        let queued = write.wrapping_sub(read);
        if queued > self.capacity as u64 {
            return Err(QueueError::CorruptCounters {
                queued,
                capacity: self.capacity,
            });
        }
        Ok(queued as usize)
    }

    /// Bytes that can be written without overwriting unread data.
    pub fn available_to_write(&self) -> Result<usize, QueueError> {
        Ok(self.capacity - self.available_to_read()?)
    }

    fn check_quantum(&self, len: usize) -> Result<(), QueueError> {
        if len % self.layout.quantum != 0 {
            return Err(QueueError::UnalignedTransfer {
                len,
                quantum: self.layout.quantum,
            });
        }
        Ok(())
    }

    /// Write all of `data`, or nothing if it does not fit.
    ///
    /// Sets [`FMQ_NOT_EMPTY`] on the event flag after a successful write.
    pub fn write(&self, data: &[u8]) -> Result<(), QueueError> {
        self.check_quantum(data.len())?;
        let available = self.available_to_write()?;
        if data.len() > available {
            return Err(QueueError::InsufficientSpace {
                requested: data.len(),
                available,
            });
        }
        if data.is_empty() {
            return Ok(());
        }

        let write = self.write_counter().load(Ordering::Acquire);
        let start = (write % self.capacity as u64) as usize;
        let first_chunk = data.len().min(self.capacity - start);
        self.data_region
            .write_bytes(self.data_offset + start, &data[..first_chunk]);
        if first_chunk < data.len() {
            self.data_region
                .write_bytes(self.data_offset, &data[first_chunk..]);
        }

        self.write_counter()
            .store(write.wrapping_add(data.len() as u64), Ordering::Release);
        if let Some(flag) = &self.event_flag {
            flag.wake(FMQ_NOT_EMPTY)?;
        }
        Ok(())
    }

    /// Fill all of `dest`, or read nothing if not enough data is queued.
    ///
    /// Sets [`FMQ_NOT_FULL`] on the event flag after a successful read.
    pub fn read(&self, dest: &mut [u8]) -> Result<(), QueueError> {
        self.check_quantum(dest.len())?;
        let available = self.available_to_read()?;
        if dest.len() > available {
            return Err(QueueError::InsufficientData {
                requested: dest.len(),
                available,
            });
        }
        if dest.is_empty() {
            return Ok(());
        }

        let read = self.read_counter().load(Ordering::Acquire);
        let start = (read % self.capacity as u64) as usize;
        let first_chunk = dest.len().min(self.capacity - start);
        let (head, tail) = dest.split_at_mut(first_chunk);
        self.data_region.read_bytes(self.data_offset + start, head);
        if !tail.is_empty() {
            self.data_region.read_bytes(self.data_offset, tail);
        }

        self.read_counter()
            .store(read.wrapping_add(first_chunk as u64 + tail.len() as u64), Ordering::Release);
        if let Some(flag) = &self.event_flag {
            flag.wake(FMQ_NOT_FULL)?;
        }
        Ok(())
    }

    /// Write, waiting up to `timeout` for space to become available.
    pub fn write_blocking(&self, data: &[u8], timeout: Duration) -> Result<(), QueueError> {
        let flag = self.event_flag.as_ref().ok_or(QueueError::NoEventFlag)?;
        let deadline = Instant::now() + timeout;
        loop {
            match self.write(data) {
                Err(QueueError::InsufficientSpace { .. }) if data.len() <= self.capacity => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    flag.wait(FMQ_NOT_FULL, remaining)?;
                }
                other => return other,
            }
        }
    }

    /// Read, waiting up to `timeout` for enough data to arrive.
    pub fn read_blocking(&self, dest: &mut [u8], timeout: Duration) -> Result<(), QueueError> {
        let flag = self.event_flag.as_ref().ok_or(QueueError::NoEventFlag)?;
        let deadline = Instant::now() + timeout;
        loop {
            match self.read(dest) {
                Err(QueueError::InsufficientData { .. }) if dest.len() <= self.capacity => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    flag.wait(FMQ_NOT_EMPTY, remaining)?;
                }
                other => return other,
            }
        }
    }
}

fn region_word(region: &SharedRegion, offset: usize) -> &AtomicU64 {
    match region.atomic_u64(offset) {
        Some(word) => word,
        None => unreachable!("index grantors validated at construction"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmq::bridge::{layout_to_legacy, legacy_to_current};
    use std::thread;

    fn queue(capacity: usize) -> SyncReadWriteQueue {
        SyncReadWriteQueue::from_layout(QueueLayout::allocate(capacity, 1, true)).unwrap()
    }

    #[test]
    fn test_write_read() {
        let q = queue(188 * 10);
        let data = vec![0x47u8; 188 * 4];
        q.write(&data).unwrap();
        assert_eq!(q.available_to_read().unwrap(), data.len());
        assert_eq!(q.available_to_write().unwrap(), 188 * 6);

        let mut out = vec![0u8; 188];
        q.read(&mut out).unwrap();
        assert_eq!(out, vec![0x47u8; 188]);
        assert_eq!(q.available_to_read().unwrap(), 188 * 3);
    }

    #[test]
    fn test_write_is_all_or_nothing() {
        let q = queue(16);
        q.write(&[1u8; 10]).unwrap();
        assert_eq!(
            q.write(&[2u8; 7]),
            Err(QueueError::InsufficientSpace {
                requested: 7,
                available: 6
            })
        );
        assert_eq!(q.available_to_read().unwrap(), 10);
    }

    #[test]
    fn test_read_more_than_queued_fails() {
        let q = queue(16);
        q.write(&[1, 2, 3]).unwrap();
        let mut out = [0u8; 4];
        assert_eq!(
            q.read(&mut out),
            Err(QueueError::InsufficientData {
                requested: 4,
                available: 3
            })
        );
    }

    #[test]
    fn test_wrap_around() {
        let q = queue(8);
        q.write(&[1, 2, 3, 4, 5, 6]).unwrap();
        let mut out = [0u8; 5];
        q.read(&mut out).unwrap();

        // Crosses the end of the ring.
        q.write(&[7, 8, 9, 10, 11, 12]).unwrap();
        let mut out = [0u8; 7];
        q.read(&mut out).unwrap();
        assert_eq!(out, [6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(q.available_to_read().unwrap(), 0);
    }

    #[test]
    fn test_unaligned_transfer_rejected() {
        let q = SyncReadWriteQueue::from_layout(QueueLayout::allocate(16, 4, true)).unwrap();
        assert_eq!(
            q.write(&[0u8; 3]),
            Err(QueueError::UnalignedTransfer { len: 3, quantum: 4 })
        );
    }

    #[test]
    fn test_legacy_writer_current_reader_share_bytes() {
        let layout = QueueLayout::allocate(256, 1, true);
        let legacy = layout_to_legacy(&layout).unwrap();
        let current = legacy_to_current(&legacy).unwrap();

        let writer = SyncReadWriteQueue::from_legacy(&legacy).unwrap();
        let reader = SyncReadWriteQueue::from_current(&current).unwrap();

        writer.write(b"filtered section").unwrap();
        assert_eq!(reader.available_to_read().unwrap(), 16);
        let mut out = [0u8; 16];
        reader.read(&mut out).unwrap();
        assert_eq!(&out, b"filtered section");
        assert_eq!(writer.available_to_write().unwrap(), 256);
    }

    #[test]
    fn test_write_sets_not_empty() {
        let q = queue(16);
        q.write(&[1]).unwrap();
        let flag = q.event_flag().unwrap();
        assert_eq!(flag.load() & FMQ_NOT_EMPTY, FMQ_NOT_EMPTY);
    }

    #[test]
    fn test_blocking_without_event_flag() {
        let q = SyncReadWriteQueue::from_layout(QueueLayout::allocate(16, 1, false)).unwrap();
        assert_eq!(
            q.write_blocking(&[1], Duration::from_millis(1)),
            Err(QueueError::NoEventFlag)
        );
    }

    #[test]
    fn test_read_blocking_times_out() {
        let q = queue(16);
        let mut out = [0u8; 4];
        assert!(matches!(
            q.read_blocking(&mut out, Duration::from_millis(10)),
            Err(QueueError::EventFlag(_))
        ));
    }

    #[test]
    fn test_blocking_producer_consumer() {
        let q = queue(64);
        let producer = q.clone();
        let handle = thread::spawn(move || {
            for chunk in 0u8..32 {
                producer
                    .write_blocking(&[chunk; 16], Duration::from_secs(5))
                    .unwrap();
            }
        });

        let mut out = [0u8; 16];
        for chunk in 0u8..32 {
            q.read_blocking(&mut out, Duration::from_secs(5)).unwrap();
            assert_eq!(out, [chunk; 16]);
        }
        handle.join().unwrap();
    }

    #[test]
    fn test_overlapping_current_descriptor_rejected() {
        let mut layout = QueueLayout::allocate(48, 1, false);
        layout.grantors[crate::fmq::DATA_PTR_POS].offset = 0;
        layout.grantors[crate::fmq::DATA_PTR_POS].extent = 32;
        let current = crate::fmq::bridge::layout_to_current(&layout).unwrap();
        assert!(matches!(
            SyncReadWriteQueue::from_current(&current),
            Err(DescriptorError::OverlappingGrantors { .. })
        ));
    }

    #[test]
    fn test_write_counter_past_capacity_is_corrupt() {
        let q = queue(16);
        let (region, offset) = q.layout().write_index().unwrap();
        region.atomic_u64(offset).unwrap().store(1 << 20, Ordering::Release);

        let corrupt = QueueError::CorruptCounters {
            queued: 1 << 20,
            capacity: 16,
        };
        assert_eq!(q.available_to_read(), Err(corrupt.clone()));
        assert_eq!(q.available_to_write(), Err(corrupt.clone()));
        let mut out = [0u8; 64];
        assert_eq!(q.read(&mut out), Err(corrupt.clone()));
        assert_eq!(q.write(&[1u8; 4]), Err(corrupt));
    }

    #[test]
    fn test_read_counter_ahead_of_write_is_corrupt() {
        let q = queue(16);
        let (region, offset) = q.layout().read_index().unwrap();
        region.atomic_u64(offset).unwrap().store(4, Ordering::Release);
        let mut out = [0u8; 1];
        assert!(matches!(
            q.read(&mut out),
            Err(QueueError::CorruptCounters { capacity: 16, .. })
        ));
    }
}
