use crate::error::{AllocError, FreeError};
use crate::flags::PageFlags;
use crate::frame::Pfn;
use crate::manager::PhysicalMemoryManager;
use crate::zone::ZoneType;
use kernel_sync::{SpinLock, SpinLockGuard};

/// Exclusive access to a [`LockedPmm`].
pub type PmmGuard<'a, 'm> = SpinLockGuard<'a, PhysicalMemoryManager<'m>>;

/// [`PhysicalMemoryManager`] behind a [`SpinLock`].
///
/// The bitmap search, the commit of the found bits and the counter updates of
/// one allocation all happen under the lock.
#[derive(Debug)]
pub struct LockedPmm<'m>(SpinLock<PhysicalMemoryManager<'m>>);

impl<'m> LockedPmm<'m> {
    #[must_use]
    pub const fn new(pmm: PhysicalMemoryManager<'m>) -> Self {
        Self(SpinLock::new(pmm))
    }

    #[inline]
    #[must_use]
    pub fn try_lock(&self) -> Option<PmmGuard<'_, 'm>> {
        self.0.try_lock()
    }

    #[inline]
    pub fn lock(&self) -> PmmGuard<'_, 'm> {
        self.0.lock()
    }

    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut PhysicalMemoryManager<'m>) -> R) -> R {
        self.0.with_lock(f)
    }

    /// [`PhysicalMemoryManager::alloc_pages`] under the lock.
    ///
    /// # Errors
    /// See [`PhysicalMemoryManager::alloc_pages`].
    pub fn alloc_pages(
        &self,
        zone_type: ZoneType,
        nr_pages: usize,
        flags: PageFlags,
    ) -> Result<Pfn, AllocError> {
        self.with_lock(|pmm| pmm.alloc_pages(zone_type, nr_pages, flags))
    }

    /// [`PhysicalMemoryManager::free_pages`] under the lock.
    ///
    /// # Errors
    /// See [`PhysicalMemoryManager::free_pages`].
    pub fn free_pages(&self, pfn: Pfn, nr_pages: usize) -> Result<(), FreeError> {
        self.with_lock(|pmm| pmm.free_pages(pfn, nr_pages))
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut PhysicalMemoryManager<'m> {
        self.0.get_mut()
    }

    #[must_use]
    pub fn into_inner(self) -> PhysicalMemoryManager<'m> {
        self.0.into_inner()
    }
}
