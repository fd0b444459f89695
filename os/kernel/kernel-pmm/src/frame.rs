use crate::FrameSize;
use crate::flags::PageFlags;
use crate::zone::ZoneId;
use core::fmt;
use core::ops::Range;
use kernel_memory_addresses::{PageSize, PageSizeClass, PhysicalAddress};

/// Number of a 2 MiB physical frame; index into the bitmap and frame table.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pfn(usize);

impl Pfn {
    #[inline]
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }

    /// Frame containing `pa`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self((pa.as_u64() >> FrameSize::SHIFT) as usize)
    }

    /// First frame starting at or above `pa`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn at_or_above(pa: PhysicalAddress) -> Self {
        let raw = pa.as_u64();
        let partial = (raw & FrameSize::MASK != 0) as u64;
        Self(((raw >> FrameSize::SHIFT) + partial) as usize)
    }

    /// Physical base address of this frame.
    #[inline]
    #[must_use]
    pub const fn start_address(self) -> PhysicalAddress {
        PhysicalAddress::new((self.0 as u64) << FrameSize::SHIFT)
    }

    /// Index of the bitmap word holding this frame's bit.
    #[inline]
    #[must_use]
    pub const fn word(self) -> usize {
        self.0 / u64::BITS as usize
    }

    /// Bit position inside [`word`](Self::word).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn bit(self) -> u32 {
        (self.0 % u64::BITS as usize) as u32
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, count: usize) -> Option<Self> {
        match self.0.checked_add(count) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// `count` frames starting here.
    #[inline]
    #[must_use]
    pub const fn run(self, count: usize) -> Range<Self> {
        Self(self.0)..Self(self.0 + count)
    }

    /// Iterate the frames of `range`.
    pub fn iter(range: Range<Self>) -> impl DoubleEndedIterator<Item = Self> + ExactSizeIterator {
        (range.start.0..range.end.0).map(Self)
    }
}

impl fmt::Debug for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pfn({:#x})", self.0)
    }
}

impl fmt::Display for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pfn {:#x}", self.0)
    }
}

impl From<usize> for Pfn {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

/// Metadata of one physical frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PageFrame {
    zone: Option<ZoneId>,
    pfn: Pfn,
    ref_count: u32,
    flags: PageFlags,
    size: PageSizeClass,
}

impl PageFrame {
    /// Default state: outside every zone, not allocatable.
    #[must_use]
    pub const fn reserved(pfn: Pfn) -> Self {
        Self {
            zone: None,
            pfn,
            ref_count: 0,
            flags: PageFlags::RESERVED,
            size: PageSizeClass::Size2M,
        }
    }

    /// A free frame owned by `zone`.
    #[must_use]
    pub const fn free_in(zone: ZoneId, pfn: Pfn) -> Self {
        Self {
            zone: Some(zone),
            pfn,
            ref_count: 0,
            flags: PageFlags::EMPTY,
            size: PageSizeClass::Size2M,
        }
    }

    #[must_use]
    pub const fn zone(&self) -> Option<ZoneId> {
        self.zone
    }

    #[must_use]
    pub const fn pfn(&self) -> Pfn {
        self.pfn
    }

    #[must_use]
    pub const fn ref_count(&self) -> u32 {
        self.ref_count
    }

    #[must_use]
    pub const fn flags(&self) -> PageFlags {
        self.flags
    }

    #[must_use]
    pub const fn size(&self) -> PageSizeClass {
        self.size
    }

    #[must_use]
    pub const fn is_used(&self) -> bool {
        self.flags.used()
    }

    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        self.flags.reserved()
    }

    pub(crate) const fn set_flags(&mut self, flags: PageFlags) {
        self.flags = flags;
    }

    pub(crate) const fn set_ref_count(&mut self, ref_count: u32) {
        self.ref_count = ref_count;
    }
}

/// Frame records indexed by [`Pfn`].
pub struct FrameTable<'m> {
    frames: &'m mut [PageFrame],
}

impl<'m> FrameTable<'m> {
    #[must_use]
    pub const fn new(frames: &'m mut [PageFrame]) -> Self {
        Self { frames }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// One past the last frame.
    #[must_use]
    pub const fn end(&self) -> Pfn {
        Pfn(self.frames.len())
    }

    #[must_use]
    pub fn get(&self, pfn: Pfn) -> Option<&PageFrame> {
        self.frames.get(pfn.0)
    }

    pub fn get_mut(&mut self, pfn: Pfn) -> Option<&mut PageFrame> {
        self.frames.get_mut(pfn.0)
    }

    /// Frames of `range`; `None` if it leaves the table.
    #[must_use]
    pub fn slice(&self, range: Range<Pfn>) -> Option<&[PageFrame]> {
        self.frames.get(range.start.0..range.end.0)
    }

    pub(crate) fn slice_mut(&mut self, range: Range<Pfn>) -> Option<&mut [PageFrame]> {
        self.frames.get_mut(range.start.0..range.end.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageFrame> {
        self.frames.iter()
    }
}

impl fmt::Debug for FrameTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameTable")
            .field("len", &self.frames.len())
            .finish_non_exhaustive()
    }
}
