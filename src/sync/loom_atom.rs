//! Keluarga atomic untuk model checking dengan loom
//!
//! Hanya dikompilasi dengan `RUSTFLAGS="--cfg loom"`. Futex diganti
//! `loom::thread::yield_now` (spurious wakeup, pemanggil re-check), dan
//! tangga spin dimatikan supaya ruang state tetap kecil.

use std::sync::atomic::Ordering;
use std::time::Instant;

use loom::sync::atomic::{AtomicU32, AtomicU64};

use super::futex::FutexResult;
use super::{Atom, AtomicLike, FutexLike};

#[derive(Debug, Clone, Copy, Default)]
pub struct LoomAtom;

impl Atom for LoomAtom {
    type U32 = AtomicU32;
    type U64 = AtomicU64;

    const MIN_SPINS: u32 = 0;
    const MAX_SPINS: u32 = 0;
    const MAX_YIELDS: u32 = 0;

    fn pause() {
        loom::hint::spin_loop();
    }

    fn yield_now() {
        loom::thread::yield_now();
    }
}

macro_rules! impl_loom_atomic {
    ($atomic:ty, $int:ty) => {
        impl AtomicLike<$int> for $atomic {
            fn new(value: $int) -> Self {
                <$atomic>::new(value)
            }

            fn load(&self, order: Ordering) -> $int {
                <$atomic>::load(self, order)
            }

            fn store(&self, value: $int, order: Ordering) {
                <$atomic>::store(self, value, order)
            }

            fn swap(&self, value: $int, order: Ordering) -> $int {
                <$atomic>::swap(self, value, order)
            }

            fn compare_exchange(
                &self,
                current: $int,
                new: $int,
                success: Ordering,
                failure: Ordering,
            ) -> Result<$int, $int> {
                <$atomic>::compare_exchange(self, current, new, success, failure)
            }

            fn compare_exchange_weak(
                &self,
                current: $int,
                new: $int,
                success: Ordering,
                failure: Ordering,
            ) -> Result<$int, $int> {
                <$atomic>::compare_exchange_weak(self, current, new, success, failure)
            }

            fn fetch_add(&self, value: $int, order: Ordering) -> $int {
                <$atomic>::fetch_add(self, value, order)
            }

            fn fetch_or(&self, value: $int, order: Ordering) -> $int {
                <$atomic>::fetch_or(self, value, order)
            }

            fn fetch_and(&self, value: $int, order: Ordering) -> $int {
                <$atomic>::fetch_and(self, value, order)
            }
        }
    };
}

impl_loom_atomic!(AtomicU32, u32);
impl_loom_atomic!(AtomicU64, u64);

impl FutexLike for AtomicU32 {
    fn futex_wait(&self, expected: u32, wait_mask: u32, _deadline: Option<Instant>) -> FutexResult {
        assert!(wait_mask != 0, "futex wait mask must not be empty");
        if <Self as AtomicLike<u32>>::load(self, Ordering::SeqCst) != expected {
            return FutexResult::ValueChanged;
        }
        loom::thread::yield_now();
        FutexResult::Awoken
    }

    fn futex_wake(&self, _count: u32, wake_mask: u32) -> usize {
        assert!(wake_mask != 0, "futex wake mask must not be empty");
        0
    }
}
