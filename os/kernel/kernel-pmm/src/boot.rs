//! # Boot Entry
//!
//! Glue between the loader handoff and [`PhysicalMemoryManager`]. This is the
//! only place that turns a [`FatalError`] into a halt.
//!
//! ```rust,ignore
//! use kernel_pmm::{HhdmPhysMapper, PageFlags, ZoneType, boot};
//!
//! let image = boot::kernel_image_from_linker_symbols();
//! let mut pmm = unsafe { boot::init_memory_or_halt(&HhdmPhysMapper, image) };
//! let pfn = pmm
//!     .alloc_pages(ZoneType::Normal, 1, PageFlags::PRESENT | PageFlags::WRITABLE)
//!     .unwrap_or_else(|err| match err.fatal() {
//!         Some(fatal) => boot::halt(&fatal),
//!         None => todo!("handle {err}"),
//!     });
//! ```

use crate::e820::E820Table;
use crate::error::FatalError;
use crate::manager::PhysicalMemoryManager;
use crate::mapper::PhysMapper;
use kernel_console::fatal;
use kernel_info::boot::KernelImage;
use kernel_info::memory::BOOT_MEMORY_MAP_PHYS;
use kernel_memory_addresses::PhysicalAddress;
use log::info;

/// Read the boot memory map and build the manager.
///
/// # Safety
/// * The boot buffer at [`BOOT_MEMORY_MAP_PHYS`] must be mapped through
///   `mapper` and hold a valid memory map.
/// * Same requirements on `image` and the memory behind it as
///   [`PhysicalMemoryManager::new`], with the memory given up for good.
///
/// # Errors
/// Any [`FatalError`] raised while building the manager.
pub unsafe fn init_memory<M>(
    mapper: &M,
    image: KernelImage,
) -> Result<PhysicalMemoryManager<'static>, FatalError>
where
    M: PhysMapper + ?Sized,
{
    info!("Start init memory...");

    let buffer = mapper.phys_to_virt(PhysicalAddress::new(BOOT_MEMORY_MAP_PHYS));
    // SAFETY: the caller guarantees the buffer is mapped and valid.
    let memory_map = unsafe { E820Table::from_boot_buffer(buffer.as_ptr()) };
    // SAFETY: forwarded from the caller.
    let pmm = unsafe { PhysicalMemoryManager::new(memory_map, image, mapper) }?;

    info!("Memory initialized");
    Ok(pmm)
}

/// [`init_memory`], halting on failure.
///
/// # Safety
/// See [`init_memory`].
pub unsafe fn init_memory_or_halt<M>(mapper: &M, image: KernelImage) -> PhysicalMemoryManager<'static>
where
    M: PhysMapper + ?Sized,
{
    // SAFETY: forwarded from the caller.
    match unsafe { init_memory(mapper, image) } {
        Ok(pmm) => pmm,
        Err(err) => halt(&err),
    }
}

/// Report `err` on the fatal log target and stop this CPU for good.
pub fn halt(err: &FatalError) -> ! {
    fatal!("Memory manager corrupted: {err}");
    loop {
        park();
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[inline]
fn park() {
    // SAFETY: the kernel runs at CPL0.
    unsafe {
        core::arch::asm!("cli", "hlt", options(nomem, nostack));
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
#[inline]
fn park() {
    core::hint::spin_loop();
}

/// Kernel image boundaries from the linker script symbols `_text`, `_etext`,
/// `_edata` and `_end`.
#[cfg(target_os = "none")]
#[must_use]
pub fn kernel_image_from_linker_symbols() -> KernelImage {
    unsafe extern "C" {
        static _text: u8;
        static _etext: u8;
        static _edata: u8;
        static _end: u8;
    }

    KernelImage {
        start_code: (&raw const _text) as u64,
        end_code: (&raw const _etext) as u64,
        end_data: (&raw const _edata) as u64,
        end_krnl: (&raw const _end) as u64,
    }
}
