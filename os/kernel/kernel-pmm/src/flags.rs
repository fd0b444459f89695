use bitfield_struct::bitfield;
use core::ops::{BitOr, BitOrAssign};

/// Per-frame state and mapping attributes.
///
/// The low nibble records bookkeeping state, bits 8 through 13 carry the
/// attributes a later page-table mapping of the frame should use. Bit values
/// are part of the frame-table ABI and must not move.
///
/// | Bit | Name            | Meaning                                     |
/// |-----|-----------------|---------------------------------------------|
/// | 0   | `FREE`          | declared, never set by the manager          |
/// | 1   | `USED`          | frame is allocated                          |
/// | 2   | `RESERVED`      | firmware-owned or outside every zone        |
/// | 3   | `KERNEL`        | kernel image or boot metadata               |
/// | 8   | `PRESENT`       | map as present                              |
/// | 9   | `WRITABLE`      | map writable                                |
/// | 10  | `USER`          | user-accessible; also marks shared frames   |
/// | 11  | `NO_CACHE`      | map uncached                                |
/// | 12  | `WRITE_THROUGH` | map write-through                           |
/// | 13  | `NO_EXECUTE`    | map non-executable                          |
#[bitfield(u32)]
#[derive(Eq, PartialEq)]
pub struct PageFlags {
    pub free: bool,
    pub used: bool,
    pub reserved: bool,
    pub kernel: bool,

    #[bits(4)]
    __state_reserved: u8,

    pub present: bool,
    pub writable: bool,
    /// A frame with this bit may be handed out more than once; each
    /// additional [`page_init`](crate::PhysicalMemoryManager::page_init)
    /// bumps its reference count.
    pub user: bool,
    pub no_cache: bool,
    pub write_through: bool,
    pub no_execute: bool,

    #[bits(18)]
    __high_reserved: u32,
}

impl PageFlags {
    pub const EMPTY: Self = Self::new();
    pub const FREE: Self = Self::from_bits(0x0001);
    pub const USED: Self = Self::from_bits(0x0002);
    pub const RESERVED: Self = Self::from_bits(0x0004);
    pub const KERNEL: Self = Self::from_bits(0x0008);
    pub const PRESENT: Self = Self::from_bits(0x0100);
    pub const WRITABLE: Self = Self::from_bits(0x0200);
    pub const USER: Self = Self::from_bits(0x0400);
    pub const NO_CACHE: Self = Self::from_bits(0x0800);
    pub const WRITE_THROUGH: Self = Self::from_bits(0x1000);
    pub const NO_EXECUTE: Self = Self::from_bits(0x2000);

    /// Stamp placed on frames holding the kernel image or boot metadata.
    pub const KERNEL_OWNED: Self = Self::from_bits(
        Self::KERNEL.into_bits()
            | Self::PRESENT.into_bits()
            | Self::WRITABLE.into_bits()
            | Self::USED.into_bits(),
    );

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self::from_bits(self.into_bits() | other.into_bits())
    }

    /// Whether every bit of `other` is also set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.into_bits() & other.into_bits() == other.into_bits()
    }

    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.into_bits() & other.into_bits() != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.into_bits() == 0
    }
}

impl BitOr for PageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for PageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_constants_match_accessors() {
        assert!(PageFlags::FREE.free());
        assert!(PageFlags::USED.used());
        assert!(PageFlags::RESERVED.reserved());
        assert!(PageFlags::KERNEL.kernel());
        assert!(PageFlags::PRESENT.present());
        assert!(PageFlags::WRITABLE.writable());
        assert!(PageFlags::USER.user());
        assert!(PageFlags::NO_CACHE.no_cache());
        assert!(PageFlags::WRITE_THROUGH.write_through());
        assert!(PageFlags::NO_EXECUTE.no_execute());
        assert!(PageFlags::EMPTY.is_empty());
    }

    #[test]
    fn builder_produces_same_bits() {
        let built = PageFlags::new()
            .with_kernel(true)
            .with_present(true)
            .with_writable(true)
            .with_used(true);
        assert_eq!(built, PageFlags::KERNEL_OWNED);
        assert_eq!(built.into_bits(), 0x030A);
    }

    #[test]
    fn union_and_contains() {
        let mut flags = PageFlags::PRESENT | PageFlags::WRITABLE;
        assert!(flags.contains(PageFlags::PRESENT));
        assert!(!flags.contains(PageFlags::PRESENT | PageFlags::USER));
        assert!(flags.intersects(PageFlags::PRESENT | PageFlags::USER));

        flags |= PageFlags::USER;
        assert!(flags.contains(PageFlags::PRESENT | PageFlags::USER));
        assert_eq!(flags.into_bits(), 0x0700);
    }
}
