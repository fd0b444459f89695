use crate::bitmap::Bitmap;
use crate::error::FatalError;
use crate::frame::{PageFrame, Pfn};
use crate::zone::Zone;
use crate::{METADATA_ALIGN, METADATA_TAIL_ALIGN};
use core::fmt;
use core::ops::Range;
use core::slice;
use kernel_memory_addresses::{VirtualAddress, checked_align_up};

/// One metadata structure's address range.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Section {
    start: VirtualAddress,
    end: VirtualAddress,
}

impl Section {
    /// Place `size` bytes at the next [`METADATA_ALIGN`] boundary at or
    /// after `cursor`.
    fn place(cursor: VirtualAddress, size: u64) -> Result<Self, FatalError> {
        let start = checked_align_up(cursor.as_u64(), METADATA_ALIGN)
            .ok_or(FatalError::MetadataOverflow)?;
        let end = start
            .checked_add(size)
            .ok_or(FatalError::MetadataOverflow)?;
        Ok(Self {
            start: VirtualAddress::new(start),
            end: VirtualAddress::new(end),
        })
    }

    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    /// Exclusive.
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        self.end
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.end.as_u64() - self.start.as_u64()
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} ({:#x} bytes)", self.start, self.end, self.size())
    }
}

/// Placement of the bitmap, frame table and zone table behind the kernel
/// image.
///
/// ```text
/// end_krnl ─► align 4K ─► [bitmap] ─► align 4K ─► [frames] ─► align 4K ─► [zones] ─► align 64 ─► struct_end
/// ```
///
/// Frame and zone table sizes are rounded up to 64 bytes; the bitmap holds
/// whole `u64` words.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MetadataLayout {
    bitmap: Section,
    frames: Section,
    zones: Section,
    struct_end: VirtualAddress,
    frame_count: usize,
    zone_slots: usize,
}

impl MetadataLayout {
    /// Lay out storage for `frame_count` frames and `zone_slots` zones.
    ///
    /// # Errors
    /// [`FatalError::MetadataOverflow`] if the structures would run past the
    /// end of the address space.
    pub fn compute(
        image_end: VirtualAddress,
        frame_count: usize,
        zone_slots: usize,
    ) -> Result<Self, FatalError> {
        let bitmap_size = byte_size(Bitmap::words_for(frame_count), size_of::<u64>())?;
        let frames_size = tail_aligned(byte_size(frame_count, size_of::<PageFrame>())?)?;
        let zones_size = tail_aligned(byte_size(zone_slots, size_of::<Zone>())?)?;

        let bitmap = Section::place(image_end, bitmap_size)?;
        let frames = Section::place(bitmap.end, frames_size)?;
        let zones = Section::place(frames.end, zones_size)?;
        let struct_end = checked_align_up(zones.end.as_u64(), METADATA_TAIL_ALIGN)
            .ok_or(FatalError::MetadataOverflow)?;

        Ok(Self {
            bitmap,
            frames,
            zones,
            struct_end: VirtualAddress::new(struct_end),
            frame_count,
            zone_slots,
        })
    }

    #[must_use]
    pub const fn bitmap(&self) -> Section {
        self.bitmap
    }

    #[must_use]
    pub const fn frames(&self) -> Section {
        self.frames
    }

    #[must_use]
    pub const fn zones(&self) -> Section {
        self.zones
    }

    /// First byte after all metadata.
    #[must_use]
    pub const fn struct_end(&self) -> VirtualAddress {
        self.struct_end
    }

    /// Everything written by [`carve`](Self::carve).
    #[must_use]
    pub const fn span(&self) -> Range<VirtualAddress> {
        self.bitmap.start..self.struct_end
    }

    #[must_use]
    pub const fn frame_count(&self) -> usize {
        self.frame_count
    }

    #[must_use]
    pub const fn zone_slots(&self) -> usize {
        self.zone_slots
    }

    /// Initialize the metadata memory and hand it out as slices.
    ///
    /// The bitmap starts with every bit set, every frame as
    /// [`PageFrame::reserved`] and every zone slot as [`Zone::UNUSED`].
    ///
    /// # Safety
    /// [`span`](Self::span) must be writable memory that nothing else reads
    /// or writes for `'m`.
    pub(crate) unsafe fn carve<'m>(&self) -> MetadataStorage<'m> {
        let words = self.bitmap.start.as_mut_ptr::<u64>();
        let frames = self.frames.start.as_mut_ptr::<PageFrame>();
        let zones = self.zones.start.as_mut_ptr::<Zone>();
        let word_count = Bitmap::words_for(self.frame_count);

        // SAFETY: each section is aligned for its element type and sized for
        // its element count; the caller guarantees exclusive access.
        unsafe {
            for i in 0..word_count {
                words.add(i).write(u64::MAX);
            }
            for i in 0..self.frame_count {
                frames.add(i).write(PageFrame::reserved(Pfn::new(i)));
            }
            for i in 0..self.zone_slots {
                zones.add(i).write(Zone::UNUSED);
            }

            MetadataStorage {
                bitmap: slice::from_raw_parts_mut(words, word_count),
                frames: slice::from_raw_parts_mut(frames, self.frame_count),
                zones: slice::from_raw_parts_mut(zones, self.zone_slots),
            }
        }
    }
}

/// Initialized metadata memory produced by [`MetadataLayout::carve`].
pub(crate) struct MetadataStorage<'m> {
    pub bitmap: &'m mut [u64],
    pub frames: &'m mut [PageFrame],
    pub zones: &'m mut [Zone],
}

fn byte_size(count: usize, element: usize) -> Result<u64, FatalError> {
    count
        .checked_mul(element)
        .map(|bytes| bytes as u64)
        .ok_or(FatalError::MetadataOverflow)
}

fn tail_aligned(size: u64) -> Result<u64, FatalError> {
    checked_align_up(size, METADATA_TAIL_ALIGN).ok_or(FatalError::MetadataOverflow)
}

const _: () = {
    assert!(align_of::<u64>() as u64 <= METADATA_ALIGN);
    assert!(align_of::<PageFrame>() as u64 <= METADATA_ALIGN);
    assert!(align_of::<Zone>() as u64 <= METADATA_ALIGN);
};
