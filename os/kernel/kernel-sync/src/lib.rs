//! # Kernel synchronization primitives
//!
//! A test-and-test-and-set [`SpinLock`] for state shared between CPUs before
//! any scheduler exists. Waiters busy-wait; interrupts are left alone, so a
//! lock must not be taken from an interrupt handler that may preempt its
//! holder.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
