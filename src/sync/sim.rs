//! Simulasi interleaving untuk testing
//!
//! `SimAtom` membungkus atomic std dan, sebelum setiap operasi, secara acak
//! melakukan spin pendek atau `yield_now`. Generator per-thread di-seed dari
//! seed global, jadi sebuah run bisa diulang dengan seed yang sama (urutan
//! OS scheduler tetap tidak deterministik, tapi titik gangguannya sama).
//!
//! Futex selalu memakai emulasi supaya jalur wait/wake ikut teruji di
//! semua platform.

use std::cell::Cell;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use super::futex::{emulated, FutexResult};
use super::{Atom, AtomicLike, FutexLike};

const DEFAULT_SEED: u64 = 0x4849_524D_4553_5F53;

static SEED: AtomicU64 = AtomicU64::new(DEFAULT_SEED);
static THREAD_COUNTER: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static RNG: Cell<u64> = Cell::new(thread_seed());
}

fn thread_seed() -> u64 {
    let n = THREAD_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut hash = SEED.load(Ordering::Relaxed) ^ n.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    for _ in 0..4 {
        hash = hash.wrapping_mul(6364136223846793005).wrapping_add(1);
    }
    hash
}

/// Titik gangguan: dipanggil sebelum setiap operasi atomic simulasi.
#[inline]
fn interleave() {
    RNG.with(|rng| {
        let x = rng
            .get()
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        rng.set(x);

        let r = x >> 33;
        match r % 16 {
            0 => thread::yield_now(),
            1 | 2 => {
                for _ in 0..(r >> 4) % 64 {
                    std::hint::spin_loop();
                }
            }
            _ => {}
        }
    });
}

/// Keluarga atomic simulasi (test double).
///
/// Tangga spin dibuat sangat pendek supaya jalur futex sering terpakai.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimAtom;

impl SimAtom {
    /// Set seed global. Berlaku untuk thread yang dibuat setelah pemanggilan.
    pub fn set_seed(seed: u64) {
        SEED.store(seed, Ordering::Relaxed);
    }
}

impl Atom for SimAtom {
    type U32 = SimAtomicU32;
    type U64 = SimAtomicU64;

    const MIN_SPINS: u32 = 2;
    const MAX_SPINS: u32 = 32;
    const MAX_YIELDS: u32 = 2;

    #[inline]
    fn pause() {
        interleave();
        std::hint::spin_loop();
    }
}

macro_rules! sim_atomic {
    ($name:ident, $atomic:ty, $int:ty) => {
        /// Atomic simulasi, lihat [`SimAtom`].
        #[derive(Debug, Default)]
        #[repr(transparent)]
        pub struct $name {
            inner: $atomic,
        }

        impl AtomicLike<$int> for $name {
            fn new(value: $int) -> Self {
                Self {
                    inner: <$atomic>::new(value),
                }
            }

            fn load(&self, order: Ordering) -> $int {
                interleave();
                self.inner.load(order)
            }

            fn store(&self, value: $int, order: Ordering) {
                interleave();
                self.inner.store(value, order)
            }

            fn swap(&self, value: $int, order: Ordering) -> $int {
                interleave();
                self.inner.swap(value, order)
            }

            fn compare_exchange(
                &self,
                current: $int,
                new: $int,
                success: Ordering,
                failure: Ordering,
            ) -> Result<$int, $int> {
                interleave();
                self.inner.compare_exchange(current, new, success, failure)
            }

            fn compare_exchange_weak(
                &self,
                current: $int,
                new: $int,
                success: Ordering,
                failure: Ordering,
            ) -> Result<$int, $int> {
                interleave();
                self.inner.compare_exchange_weak(current, new, success, failure)
            }

            fn fetch_add(&self, value: $int, order: Ordering) -> $int {
                interleave();
                self.inner.fetch_add(value, order)
            }

            fn fetch_or(&self, value: $int, order: Ordering) -> $int {
                interleave();
                self.inner.fetch_or(value, order)
            }

            fn fetch_and(&self, value: $int, order: Ordering) -> $int {
                interleave();
                self.inner.fetch_and(value, order)
            }
        }
    };
}

sim_atomic!(SimAtomicU32, AtomicU32, u32);
sim_atomic!(SimAtomicU64, AtomicU64, u64);

impl FutexLike for SimAtomicU32 {
    fn futex_wait(&self, expected: u32, wait_mask: u32, deadline: Option<Instant>) -> FutexResult {
        assert!(wait_mask != 0, "futex wait mask must not be empty");
        interleave();
        let addr = self as *const Self as usize;
        emulated::wait(
            addr,
            || self.inner.load(Ordering::SeqCst),
            expected,
            wait_mask,
            deadline,
        )
    }

    fn futex_wake(&self, count: u32, wake_mask: u32) -> usize {
        assert!(wake_mask != 0, "futex wake mask must not be empty");
        interleave();
        emulated::wake(self as *const Self as usize, count, wake_mask)
    }
}
