//! Width-neutral queue layout.
//!
//! Both descriptor generations are mapped onto [`QueueLayout`]; validation
//! and the data plane only ever look at this form.

use crate::error::DescriptorError;
use crate::fmq::region::{NativeHandle, SharedRegion};
use crate::fmq::{
    DATA_PTR_POS, EVFLAG_WORD_POS, EVFLAG_WORD_SIZE, INDEX_SIZE, MIN_GRANTOR_COUNT, READ_PTR_POS,
    WRITE_PTR_POS,
};

/// Queue synchronization discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueFlavor {
    /// Single writer, single reader, writes never overwrite unread data.
    SynchronizedReadWrite,
}

/// One queue region: fd slot, byte offset and byte extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grantor {
    pub fd_index: usize,
    pub offset: usize,
    pub extent: usize,
}

/// A validated-or-not queue layout independent of either descriptor encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueLayout {
    pub handle: NativeHandle,
    pub grantors: Vec<Grantor>,
    pub quantum: usize,
    pub flavor: QueueFlavor,
}

fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

impl QueueLayout {
    /// Lay out a fresh queue with a `capacity`-byte ring in a new region.
    ///
    /// Region layout: read index, write index, data ring, then the event
    /// flag word on the next 8-byte boundary.
    pub fn allocate(capacity: usize, quantum: usize, with_event_flag: bool) -> Self {
        let read = Grantor {
            fd_index: 0,
            offset: 0,
            extent: INDEX_SIZE,
        };
        let write = Grantor {
            fd_index: 0,
            offset: INDEX_SIZE,
            extent: INDEX_SIZE,
        };
        let data = Grantor {
            fd_index: 0,
            offset: 2 * INDEX_SIZE,
            extent: capacity,
        };
        let mut grantors = vec![read, write, data];
        let mut total = data.offset + capacity;
        if with_event_flag {
            let offset = align_up(total, 8);
            grantors.push(Grantor {
                fd_index: 0,
                offset,
                extent: EVFLAG_WORD_SIZE,
            });
            total = offset + EVFLAG_WORD_SIZE;
        }

        Self {
            handle: NativeHandle::new(vec![SharedRegion::new(total)], Vec::new()),
            grantors,
            quantum,
            flavor: QueueFlavor::SynchronizedReadWrite,
        }
    }

    /// Check that the layout describes a usable queue.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.grantors.len() < MIN_GRANTOR_COUNT {
            return Err(DescriptorError::MissingGrantors {
                found: self.grantors.len(),
                required: MIN_GRANTOR_COUNT,
            });
        }
        if self.quantum == 0 {
            return Err(DescriptorError::InvalidQuantum(0));
        }

        for (idx, grantor) in self.grantors.iter().enumerate() {
            let region = self.handle.fds.get(grantor.fd_index).ok_or(
                DescriptorError::FdIndexOutOfRange {
                    grantor: idx,
                    fd_index: grantor.fd_index as i64,
                    fd_count: self.handle.fds.len(),
                },
            )?;
            let fits = grantor
                .offset
                .checked_add(grantor.extent)
                .map(|end| end <= region.len())
                .unwrap_or(false);
            if !fits {
                return Err(DescriptorError::GrantorOutOfBounds {
                    grantor: idx,
                    offset: grantor.offset as u64,
                    extent: grantor.extent as u64,
                    region_len: region.len(),
                });
            }
        }

        for pos in [READ_PTR_POS, WRITE_PTR_POS] {
            let g = &self.grantors[pos];
            if g.extent != INDEX_SIZE || g.offset % INDEX_SIZE != 0 {
                return Err(misaligned(pos, g));
            }
        }

        let data = &self.grantors[DATA_PTR_POS];
        if data.extent == 0 || data.extent % self.quantum != 0 {
            return Err(DescriptorError::InvalidDataRegion {
                extent: data.extent as u64,
                quantum: self.quantum as u64,
            });
        }

        if let Some(g) = self.grantors.get(EVFLAG_WORD_POS) {
            if g.extent != EVFLAG_WORD_SIZE || g.offset % EVFLAG_WORD_SIZE != 0 {
                return Err(misaligned(EVFLAG_WORD_POS, g));
            }
        }

        // Index and flag words are accessed atomically, the data ring byte
        // by byte; none of them may share memory.
        let queue_grantors = self.grantors.len().min(EVFLAG_WORD_POS + 1);
        for first in 0..queue_grantors {
            for second in first + 1..queue_grantors {
                if overlaps(&self.grantors[first], &self.grantors[second]) {
                    return Err(DescriptorError::OverlappingGrantors { first, second });
                }
            }
        }

        Ok(())
    }

    fn region_of(&self, pos: usize) -> Option<(&SharedRegion, &Grantor)> {
        let grantor = self.grantors.get(pos)?;
        let region = self.handle.fds.get(grantor.fd_index)?;
        Some((region, grantor))
    }

    /// Region and offset of the read index.
    pub fn read_index(&self) -> Option<(&SharedRegion, usize)> {
        self.region_of(READ_PTR_POS).map(|(r, g)| (r, g.offset))
    }

    /// Region and offset of the write index.
    pub fn write_index(&self) -> Option<(&SharedRegion, usize)> {
        self.region_of(WRITE_PTR_POS).map(|(r, g)| (r, g.offset))
    }

    /// Region, offset and size of the data ring.
    pub fn data(&self) -> Option<(&SharedRegion, usize, usize)> {
        self.region_of(DATA_PTR_POS)
            .map(|(r, g)| (r, g.offset, g.extent))
    }

    /// Region and offset of the event flag word, if the queue has one.
    pub fn event_flag_word(&self) -> Option<(&SharedRegion, usize)> {
        self.region_of(EVFLAG_WORD_POS).map(|(r, g)| (r, g.offset))
    }

    /// Capacity of the data ring in bytes.
    pub fn capacity(&self) -> usize {
        self.grantors
            .get(DATA_PTR_POS)
            .map(|g| g.extent)
            .unwrap_or(0)
    }
}

fn overlaps(a: &Grantor, b: &Grantor) -> bool {
    a.fd_index == b.fd_index && a.offset < b.offset + b.extent && b.offset < a.offset + a.extent
}

fn misaligned(pos: usize, g: &Grantor) -> DescriptorError {
    DescriptorError::MisalignedGrantor {
        grantor: pos,
        offset: g.offset as u64,
        extent: g.extent as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocated_layout_is_valid() {
        let layout = QueueLayout::allocate(1000, 1, true);
        layout.validate().unwrap();
        assert_eq!(layout.grantors.len(), 4);
        assert_eq!(layout.capacity(), 1000);
        // 16 + 1000 = 1016, already 8-aligned
        assert_eq!(layout.grantors[EVFLAG_WORD_POS].offset, 1016);
        assert_eq!(layout.handle.fds[0].len(), 1020);
    }

    #[test]
    fn test_allocated_layout_without_event_flag() {
        let layout = QueueLayout::allocate(13, 1, false);
        layout.validate().unwrap();
        assert!(layout.event_flag_word().is_none());
    }

    #[test]
    fn test_event_flag_offset_is_aligned() {
        let layout = QueueLayout::allocate(13, 1, true);
        assert_eq!(layout.grantors[EVFLAG_WORD_POS].offset, 32);
        layout.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_missing_grantors() {
        let mut layout = QueueLayout::allocate(64, 1, false);
        layout.grantors.truncate(2);
        assert_eq!(
            layout.validate(),
            Err(DescriptorError::MissingGrantors {
                found: 2,
                required: 3
            })
        );
    }

    #[test]
    fn test_validate_rejects_unknown_fd() {
        let mut layout = QueueLayout::allocate(64, 1, false);
        layout.grantors[DATA_PTR_POS].fd_index = 1;
        assert!(matches!(
            layout.validate(),
            Err(DescriptorError::FdIndexOutOfRange { grantor: 2, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_bounds() {
        let mut layout = QueueLayout::allocate(64, 1, false);
        layout.grantors[DATA_PTR_POS].extent = 65;
        assert!(matches!(
            layout.validate(),
            Err(DescriptorError::GrantorOutOfBounds { grantor: 2, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_misaligned_index() {
        let mut layout = QueueLayout::allocate(64, 1, false);
        layout.grantors[WRITE_PTR_POS].offset = 4;
        assert!(matches!(
            layout.validate(),
            Err(DescriptorError::MisalignedGrantor { grantor: 1, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_data_covering_indices() {
        let mut layout = QueueLayout::allocate(48, 1, false);
        layout.grantors[DATA_PTR_POS].offset = 0;
        layout.grantors[DATA_PTR_POS].extent = 32;
        assert_eq!(
            layout.validate(),
            Err(DescriptorError::OverlappingGrantors {
                first: READ_PTR_POS,
                second: DATA_PTR_POS
            })
        );
    }

    #[test]
    fn test_validate_rejects_shared_index_word() {
        let mut layout = QueueLayout::allocate(64, 1, false);
        layout.grantors[WRITE_PTR_POS].offset = 0;
        assert_eq!(
            layout.validate(),
            Err(DescriptorError::OverlappingGrantors {
                first: READ_PTR_POS,
                second: WRITE_PTR_POS
            })
        );
    }

    #[test]
    fn test_validate_rejects_event_flag_inside_data() {
        let mut layout = QueueLayout::allocate(64, 1, true);
        layout.grantors[EVFLAG_WORD_POS].offset = 24;
        assert_eq!(
            layout.validate(),
            Err(DescriptorError::OverlappingGrantors {
                first: DATA_PTR_POS,
                second: EVFLAG_WORD_POS
            })
        );
    }

    #[test]
    fn test_validate_allows_same_offsets_in_distinct_regions() {
        let mut layout = QueueLayout::allocate(64, 1, false);
        let data_region = SharedRegion::new(64);
        layout.handle.fds.push(data_region);
        layout.grantors[DATA_PTR_POS].fd_index = 1;
        layout.grantors[DATA_PTR_POS].offset = 0;
        layout.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_oversized_event_flag() {
        let mut layout = QueueLayout::allocate(64, 1, true);
        layout.grantors[EVFLAG_WORD_POS].extent = 8;
        layout.handle.fds[0] = SharedRegion::new(96);
        assert!(matches!(
            layout.validate(),
            Err(DescriptorError::MisalignedGrantor { grantor: 3, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_data_not_multiple_of_quantum() {
        let layout = QueueLayout::allocate(10, 4, false);
        assert_eq!(
            layout.validate(),
            Err(DescriptorError::InvalidDataRegion {
                extent: 10,
                quantum: 4
            })
        );
    }
}
