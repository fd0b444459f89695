use core::fmt;
use core::hash::Hash;

/// Sealed trait pattern to restrict `PageSize` impls to our markers.
mod sealed {
    pub trait Sealed {}
}

/// Marker trait for supported page sizes.
pub trait PageSize:
    sealed::Sealed + Clone + Copy + Eq + PartialEq + Ord + PartialOrd + Hash + fmt::Display + fmt::Debug
{
    /// Page size in bytes (power of two).
    const SIZE: u64;
    /// log2(SIZE), i.e., number of low bits used for the offset.
    const SHIFT: u32;
    /// Mask selecting the in-page offset bits.
    const MASK: u64 = Self::SIZE - 1;
    /// Runtime tag of this size.
    const CLASS: PageSizeClass;
}

/// Runtime page size tag.
///
/// Per-frame metadata stores one of these; the allocator only ever hands out
/// [`PageSizeClass::Size2M`] frames.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PageSizeClass {
    Size4K = 0,
    Size2M = 1,
    Size1G = 2,
}

impl PageSizeClass {
    /// Size of a page of this class in bytes.
    #[inline]
    #[must_use]
    pub const fn size(self) -> u64 {
        match self {
            Self::Size4K => Size4K::SIZE,
            Self::Size2M => Size2M::SIZE,
            Self::Size1G => Size1G::SIZE,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Size4K => "4K",
            Self::Size2M => "2M",
            Self::Size1G => "1G",
        }
    }
}

impl fmt::Display for PageSizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! page_size_marker {
    ($(#[$meta:meta])* $name:ident, $shift:expr) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name;

        impl sealed::Sealed for $name {}

        impl PageSize for $name {
            const SIZE: u64 = 1 << $shift;
            const SHIFT: u32 = $shift;
            const CLASS: PageSizeClass = PageSizeClass::$name;
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(Self::CLASS.as_str())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }
    };
}

page_size_marker!(
    /// 4 KiB page (4096 bytes).
    Size4K,
    12
);

page_size_marker!(
    /// 2 MiB page (`2_097_152` bytes).
    Size2M,
    21
);

page_size_marker!(
    /// 1 GiB page (`1_073_741_824` bytes).
    Size1G,
    30
);
