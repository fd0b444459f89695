//! # Kernel Boot Information
//!
//! Records handed over from the loader stage. They cross a binary boundary, so
//! they are `#[repr(C)]` and only use fixed-size integers.

/// Size in bytes of one raw E820 record in the boot buffer.
pub const E820_ENTRY_SIZE: usize = 20;

/// Size in bytes of the entry count preceding the records.
pub const E820_HEADER_SIZE: usize = 4;

/// E820 region type reported for usable RAM.
pub const E820_TYPE_RAM: u32 = 1;

/// One firmware memory map record exactly as the BIOS `int 15h, e820h` call
/// wrote it: five little-endian `u32` words, no padding.
#[repr(C, packed)]
#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct RawE820Entry {
    /// Low 32 bits of the region base address.
    pub base_low: u32,
    /// High 32 bits of the region base address.
    pub base_high: u32,
    /// Low 32 bits of the region length in bytes.
    pub length_low: u32,
    /// High 32 bits of the region length in bytes.
    pub length_high: u32,
    /// Region type; `1` is usable RAM.
    pub kind: u32,
}

impl RawE820Entry {
    /// Build a record from a 64-bit base/length pair.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(base: u64, length: u64, kind: u32) -> Self {
        Self {
            base_low: base as u32,
            base_high: (base >> 32) as u32,
            length_low: length as u32,
            length_high: (length >> 32) as u32,
            kind,
        }
    }

    /// Decode a record from its little-endian wire form.
    #[must_use]
    pub const fn from_le_bytes(bytes: &[u8; E820_ENTRY_SIZE]) -> Self {
        const fn word(bytes: &[u8; E820_ENTRY_SIZE], at: usize) -> u32 {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        }

        Self {
            base_low: word(bytes, 0),
            base_high: word(bytes, 4),
            length_low: word(bytes, 8),
            length_high: word(bytes, 12),
            kind: word(bytes, 16),
        }
    }

    /// Encode into the little-endian wire form.
    #[must_use]
    pub fn to_le_bytes(self) -> [u8; E820_ENTRY_SIZE] {
        let mut out = [0u8; E820_ENTRY_SIZE];
        let words = [
            self.base_low,
            self.base_high,
            self.length_low,
            self.length_high,
            self.kind,
        ];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Full 64-bit base address.
    #[must_use]
    pub const fn base(&self) -> u64 {
        ((self.base_high as u64) << 32) | self.base_low as u64
    }

    /// Full 64-bit length in bytes.
    #[must_use]
    pub const fn length(&self) -> u64 {
        ((self.length_high as u64) << 32) | self.length_low as u64
    }
}

impl core::fmt::Debug for RawE820Entry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let kind = self.kind;
        f.debug_struct("RawE820Entry")
            .field("base", &format_args!("{:#018x}", self.base()))
            .field("length", &format_args!("{:#018x}", self.length()))
            .field("kind", &kind)
            .finish()
    }
}

/// Linear addresses of the kernel image sections, as provided by the linker
/// symbols `_text`, `_etext`, `_edata` and `_end`.
///
/// The memory manager treats these as opaque; it only needs `end_krnl` to
/// know where its own metadata may start.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct KernelImage {
    /// Start of the code section.
    pub start_code: u64,
    /// End of the code section.
    pub end_code: u64,
    /// End of the initialized data section.
    pub end_data: u64,
    /// End of the whole image, including BSS.
    pub end_krnl: u64,
}

impl KernelImage {
    /// Whether the boundaries are ordered as the linker script lays them out.
    #[must_use]
    pub const fn is_well_ordered(&self) -> bool {
        self.start_code <= self.end_code
            && self.end_code <= self.end_data
            && self.end_data <= self.end_krnl
    }
}

const _: () = {
    assert!(size_of::<RawE820Entry>() == E820_ENTRY_SIZE);
    assert!(align_of::<RawE820Entry>() == 1);
};
