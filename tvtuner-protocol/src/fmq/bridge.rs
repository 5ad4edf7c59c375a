//! Conversions between the legacy and current queue descriptors.
//!
//! Each direction goes through [`QueueLayout`]: the source adapter checks
//! field widths and flavor, the layout is validated, then the target adapter
//! narrows back into the destination field types. Regions are shared, never
//! reallocated, and no bytes move.

use crate::error::DescriptorError;
use crate::fmq::layout::{Grantor, QueueFlavor, QueueLayout};
use crate::fmq::{current, legacy};

fn widen<T>(field: &'static str, value: T) -> Result<usize, DescriptorError>
where
    T: Copy + Into<i128>,
    usize: TryFrom<T>,
{
    usize::try_from(value).map_err(|_| DescriptorError::FieldOverflow {
        field,
        value: value.into(),
    })
}

fn narrow<T: TryFrom<usize>>(field: &'static str, value: usize) -> Result<T, DescriptorError> {
    T::try_from(value).map_err(|_| DescriptorError::FieldOverflow {
        field,
        value: value as i128,
    })
}

/// Map a legacy descriptor onto the neutral layout and validate it.
pub fn layout_from_legacy(desc: &legacy::MqDescriptorSync) -> Result<QueueLayout, DescriptorError> {
    if desc.flags != legacy::K_SYNCHRONIZED_READ_WRITE {
        return Err(DescriptorError::UnsupportedFlavor(desc.flags as i64));
    }
    let handle = desc.handle.clone().ok_or(DescriptorError::MissingHandle)?;

    let grantors = desc
        .grantors
        .iter()
        .enumerate()
        .map(|(idx, g)| {
            if g.flags != 0 {
                return Err(DescriptorError::UnrepresentableGrantorFlags {
                    grantor: idx,
                    flags: g.flags,
                });
            }
            Ok(Grantor {
                fd_index: widen("fd_index", g.fd_index)?,
                offset: widen("offset", g.offset)?,
                extent: widen("extent", g.extent)?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let layout = QueueLayout {
        handle,
        grantors,
        quantum: widen("quantum", desc.quantum)?,
        flavor: QueueFlavor::SynchronizedReadWrite,
    };
    layout.validate()?;
    Ok(layout)
}

/// Map a current descriptor onto the neutral layout and validate it.
pub fn layout_from_current(desc: &current::MqDescriptor) -> Result<QueueLayout, DescriptorError> {
    if desc.flags != current::SYNCHRONIZED_READ_WRITE {
        return Err(DescriptorError::UnsupportedFlavor(desc.flags as i64));
    }
    if desc.quantum <= 0 {
        return Err(DescriptorError::InvalidQuantum(desc.quantum as i64));
    }

    let grantors = desc
        .grantors
        .iter()
        .map(|g| {
            Ok(Grantor {
                fd_index: widen("fd_index", g.fd_index)?,
                offset: widen("offset", g.offset)?,
                extent: widen("extent", g.extent)?,
            })
        })
        .collect::<Result<Vec<_>, DescriptorError>>()?;

    let layout = QueueLayout {
        handle: desc.handle.clone(),
        grantors,
        quantum: widen("quantum", desc.quantum)?,
        flavor: QueueFlavor::SynchronizedReadWrite,
    };
    layout.validate()?;
    Ok(layout)
}

/// Encode a layout in the current descriptor form.
pub fn layout_to_current(layout: &QueueLayout) -> Result<current::MqDescriptor, DescriptorError> {
    let grantors = layout
        .grantors
        .iter()
        .map(|g| {
            Ok(current::GrantorDescriptor {
                fd_index: narrow("fd_index", g.fd_index)?,
                offset: narrow("offset", g.offset)?,
                extent: narrow("extent", g.extent)?,
            })
        })
        .collect::<Result<Vec<_>, DescriptorError>>()?;

    Ok(current::MqDescriptor {
        grantors,
        handle: layout.handle.clone(),
        quantum: narrow("quantum", layout.quantum)?,
        flags: match layout.flavor {
            QueueFlavor::SynchronizedReadWrite => current::SYNCHRONIZED_READ_WRITE,
        },
    })
}

/// Encode a layout in the legacy descriptor form.
pub fn layout_to_legacy(layout: &QueueLayout) -> Result<legacy::MqDescriptorSync, DescriptorError> {
    let grantors = layout
        .grantors
        .iter()
        .map(|g| {
            Ok(legacy::GrantorDescriptor {
                flags: 0,
                fd_index: narrow("fd_index", g.fd_index)?,
                offset: narrow("offset", g.offset)?,
                extent: narrow("extent", g.extent)?,
            })
        })
        .collect::<Result<Vec<_>, DescriptorError>>()?;

    Ok(legacy::MqDescriptorSync {
        grantors,
        handle: Some(layout.handle.clone()),
        quantum: narrow("quantum", layout.quantum)?,
        flags: match layout.flavor {
            QueueFlavor::SynchronizedReadWrite => legacy::K_SYNCHRONIZED_READ_WRITE,
        },
    })
}

/// Re-encode a legacy descriptor in the current form.
pub fn legacy_to_current(
    desc: &legacy::MqDescriptorSync,
) -> Result<current::MqDescriptor, DescriptorError> {
    layout_to_current(&layout_from_legacy(desc)?)
}

/// Re-encode a current descriptor in the legacy form.
pub fn current_to_legacy(
    desc: &current::MqDescriptor,
) -> Result<legacy::MqDescriptorSync, DescriptorError> {
    layout_to_legacy(&layout_from_current(desc)?)
}
