//! # Kernel Layout and Boot Handoff
//!
//! This crate holds the constants and `#[repr(C)]` records that the loader
//! stage and the kernel must agree on. It is the single source of truth for
//! where things are before any memory manager exists.
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! * **Direct map**: every physical address `pa` is visible at `HHDM_BASE + pa`
//! * **Boot memory map buffer**: fixed location of the E820 map written by the
//!   real-mode stage
//! * **Kernel placement**: physical load address of the image
//!
//! ### Boot Records ([`boot`])
//! * **`RawE820Entry`**: the packed 20-byte firmware memory map record
//! * **`KernelImage`**: linker-provided section boundaries of the kernel image
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Real-mode area, BIOS data      │
//! 0x0000_7E00 ├─────────────────────────────────┤ BOOT_MEMORY_MAP_PHYS
//!             │  u32 count + E820 records       │
//!             ├─────────────────────────────────┤
//!             │  ...                            │
//! PHYS_LOAD   ├─────────────────────────────────┤ 0x0010_0000 (1 MiB)
//!             │  Kernel image (text/data/bss)   │
//!             ├─────────────────────────────────┤ end of image (4 KiB aligned)
//!             │  Frame bitmap                   │
//!             │  Page frame table               │
//!             │  Zone table                     │
//!             ├─────────────────────────────────┤ end of boot metadata
//!             │  Managed RAM                    │
//!             └─────────────────────────────────┘
//! ```
//!
//! All constants are `const` and checked with compile-time assertions.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
