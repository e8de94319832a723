//! Sync Layer: Abstraksi Atomic + Futex
//!
//! Semua primitive di crate ini generic terhadap keluarga atomic ([`Atom`]),
//! sehingga implementasi atomic asli bisa diganti dengan test double yang
//! menyuntikkan interleaving buatan ([`SimAtom`]) atau dengan loom.
//!
//! Prinsip desain:
//! - Hot path hanya memakai atomic, tidak ada Mutex
//! - Blocking hanya lewat futex (asli di Linux, emulasi di platform lain)
//! - Spurious wakeup selalu diperbolehkan, pemanggil wajib re-check

pub mod futex;
pub mod sim;

#[cfg(loom)]
pub mod loom_atom;

use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

pub use futex::FutexResult;
#[cfg(loom)]
pub use loom_atom::LoomAtom;
pub use sim::SimAtom;

/// Operasi atomic minimal yang dibutuhkan primitive di crate ini.
///
/// Signature mengikuti `std::sync::atomic` supaya implementasi untuk tipe
/// std cukup berupa delegasi.
pub trait AtomicLike<T: Copy>: Send + Sync {
    fn new(value: T) -> Self
    where
        Self: Sized;
    fn load(&self, order: Ordering) -> T;
    fn store(&self, value: T, order: Ordering);
    fn swap(&self, value: T, order: Ordering) -> T;
    fn compare_exchange(
        &self,
        current: T,
        new: T,
        success: Ordering,
        failure: Ordering,
    ) -> Result<T, T>;
    fn compare_exchange_weak(
        &self,
        current: T,
        new: T,
        success: Ordering,
        failure: Ordering,
    ) -> Result<T, T>;
    fn fetch_add(&self, value: T, order: Ordering) -> T;
    fn fetch_or(&self, value: T, order: Ordering) -> T;
    fn fetch_and(&self, value: T, order: Ordering) -> T;
}

/// Word 32-bit yang bisa dipakai sebagai futex.
///
/// `wait_mask` dan `wake_mask` adalah bitset channel: wake hanya
/// membangunkan waiter yang mask-nya beririsan.
pub trait FutexLike: AtomicLike<u32> {
    /// Tidur selama word masih bernilai `expected`.
    ///
    /// Boleh kembali lebih awal (spurious); pemanggil wajib membaca ulang word.
    fn futex_wait(&self, expected: u32, wait_mask: u32, deadline: Option<Instant>) -> FutexResult;

    /// Bangunkan maksimal `count` waiter yang mask-nya beririsan dengan `wake_mask`.
    fn futex_wake(&self, count: u32, wake_mask: u32) -> usize;
}

/// Keluarga atomic yang dipakai sebuah primitive.
///
/// Padanan dari parameter template `Atom<T>`: satu tipe marker memilih
/// atomic 32-bit (futex word) dan 64-bit (ticket counter) sekaligus,
/// plus tangga spin yang cocok untuk lingkungan tersebut.
pub trait Atom: Send + Sync + 'static {
    type U32: FutexLike;
    type U64: AtomicLike<u64>;

    /// Batas bawah spin cutoff adaptif.
    const MIN_SPINS: u32 = 200;
    /// Batas atas spin sebelum turun ke yield/futex.
    const MAX_SPINS: u32 = 20_000;
    /// Jumlah `yield_now` setelah spin habis, sebelum parkir di futex.
    const MAX_YIELDS: u32 = 4;

    #[inline(always)]
    fn pause() {
        std::hint::spin_loop();
    }

    #[inline(always)]
    fn yield_now() {
        std::thread::yield_now();
    }
}

/// Keluarga atomic default: `std::sync::atomic` + futex OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdAtom;

impl Atom for StdAtom {
    type U32 = AtomicU32;
    type U64 = AtomicU64;
}

macro_rules! impl_atomic_like {
    ($atomic:ty, $int:ty) => {
        impl AtomicLike<$int> for $atomic {
            #[inline(always)]
            fn new(value: $int) -> Self {
                <$atomic>::new(value)
            }

            #[inline(always)]
            fn load(&self, order: Ordering) -> $int {
                <$atomic>::load(self, order)
            }

            #[inline(always)]
            fn store(&self, value: $int, order: Ordering) {
                <$atomic>::store(self, value, order)
            }

            #[inline(always)]
            fn swap(&self, value: $int, order: Ordering) -> $int {
                <$atomic>::swap(self, value, order)
            }

            #[inline(always)]
            fn compare_exchange(
                &self,
                current: $int,
                new: $int,
                success: Ordering,
                failure: Ordering,
            ) -> Result<$int, $int> {
                <$atomic>::compare_exchange(self, current, new, success, failure)
            }

            #[inline(always)]
            fn compare_exchange_weak(
                &self,
                current: $int,
                new: $int,
                success: Ordering,
                failure: Ordering,
            ) -> Result<$int, $int> {
                <$atomic>::compare_exchange_weak(self, current, new, success, failure)
            }

            #[inline(always)]
            fn fetch_add(&self, value: $int, order: Ordering) -> $int {
                <$atomic>::fetch_add(self, value, order)
            }

            #[inline(always)]
            fn fetch_or(&self, value: $int, order: Ordering) -> $int {
                <$atomic>::fetch_or(self, value, order)
            }

            #[inline(always)]
            fn fetch_and(&self, value: $int, order: Ordering) -> $int {
                <$atomic>::fetch_and(self, value, order)
            }
        }
    };
}

impl_atomic_like!(AtomicU32, u32);
impl_atomic_like!(AtomicU64, u64);

impl FutexLike for AtomicU32 {
    #[inline]
    fn futex_wait(&self, expected: u32, wait_mask: u32, deadline: Option<Instant>) -> FutexResult {
        futex::wait(self, expected, wait_mask, deadline)
    }

    #[inline]
    fn futex_wake(&self, count: u32, wake_mask: u32) -> usize {
        futex::wake(self, count, wake_mask)
    }
}

/// Padding untuk cache line isolation (64 bytes pada x86-64)
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct CacheLinePadded<T> {
    value: T,
}

impl<T> CacheLinePadded<T> {
    pub const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> Deref for CacheLinePadded<T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        &self.value
    }
}
