//! MicroLock: lock eksklusif 2 bit per slot di dalam word futex
//!
//! Satu byte lane dari word 32-bit menampung 4 slot independen. Untuk slot
//! `s`, bit `2s` = held dan bit `2s + 1` = ada waiter yang tidur. Byte lain
//! dari word yang sama boleh dipakai pemilik word untuk apa saja; lock hanya
//! mengubah bit slot-nya sendiri (kecuali `init`, yang membersihkan lane-nya).
//!
//! Waiter tidur di futex dengan mask = held bit, sehingga `unlock` hanya
//! membangunkan waiter slot yang sama.

use std::fmt;
use std::sync::atomic::Ordering;
use std::time::Instant;

use crate::config::SpinPolicy;
use crate::sync::{Atom, AtomicLike, FutexLike, FutexResult, StdAtom};

/// Jumlah slot per byte lane
pub const SLOTS_PER_LANE: u32 = 4;

/// Urutan byte dalam word host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    pub const NATIVE: Endian = if cfg!(target_endian = "little") {
        Endian::Little
    } else {
        Endian::Big
    };
}

/// Posisi bit sebuah byte lane di dalam word 32-bit.
///
/// `byte_offset` adalah offset byte di memori (seperti `bytes()[i]`), jadi
/// shift-nya bergantung pada endianness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitLayout {
    base_shift: u32,
}

impl BitLayout {
    /// # Panics
    /// Panic jika `byte_offset >= 4`
    pub const fn new(byte_offset: u32, endian: Endian) -> Self {
        assert!(byte_offset < 4, "micro lock byte offset out of range");
        let base_shift = match endian {
            Endian::Little => 8 * byte_offset,
            Endian::Big => 8 * (3 - byte_offset),
        };
        Self { base_shift }
    }

    pub const fn native(byte_offset: u32) -> Self {
        Self::new(byte_offset, Endian::NATIVE)
    }

    #[inline(always)]
    pub fn held_bit(&self, slot: u32) -> u32 {
        assert!(slot < SLOTS_PER_LANE, "micro lock slot {slot} out of range");
        1 << (self.base_shift + 2 * slot)
    }

    #[inline(always)]
    pub fn wait_bit(&self, slot: u32) -> u32 {
        self.held_bit(slot) << 1
    }

    #[inline(always)]
    pub fn slot_mask(&self, slot: u32) -> u32 {
        self.held_bit(slot) | self.wait_bit(slot)
    }

    #[inline(always)]
    pub fn lane_mask(&self) -> u32 {
        0xFF << self.base_shift
    }
}

/// Word 32-bit yang menampung sampai 4 lane MicroLock.
pub struct MicroLockWord<A: Atom = StdAtom> {
    word: A::U32,
}

impl<A: Atom> MicroLockWord<A> {
    pub fn new() -> Self {
        Self::with_value(0)
    }

    /// Word dengan isi awal; byte lain bebas dipakai pemilik.
    pub fn with_value(value: u32) -> Self {
        Self {
            word: A::U32::new(value),
        }
    }

    /// Lock view pada byte lane `byte_offset` dengan [`SpinPolicy`] default
    pub fn lock_at(&self, byte_offset: u32) -> MicroLock<'_, A> {
        self.lock_at_with(byte_offset, SpinPolicy::default())
    }

    pub fn lock_at_with(&self, byte_offset: u32, policy: SpinPolicy) -> MicroLock<'_, A> {
        MicroLock {
            word: &self.word,
            layout: BitLayout::native(byte_offset),
            policy,
        }
    }

    #[inline]
    pub fn load(&self) -> u32 {
        self.word.load(Ordering::Acquire)
    }

    /// Isi word dalam urutan byte memori
    #[inline]
    pub fn bytes(&self) -> [u8; 4] {
        self.load().to_ne_bytes()
    }

    /// Akses langsung ke atomic, untuk pemilik byte non-lock
    #[inline]
    pub fn atomic(&self) -> &A::U32 {
        &self.word
    }
}

impl<A: Atom> Default for MicroLockWord<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Atom> fmt::Debug for MicroLockWord<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MicroLockWord({:#010x})", self.word.load(Ordering::Relaxed))
    }
}

/// View lock pada satu byte lane.
pub struct MicroLock<'a, A: Atom = StdAtom> {
    word: &'a A::U32,
    layout: BitLayout,
    policy: SpinPolicy,
}

impl<A: Atom> Clone for MicroLock<'_, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: Atom> Copy for MicroLock<'_, A> {}

impl<'a, A: Atom> MicroLock<'a, A> {
    pub fn layout(&self) -> BitLayout {
        self.layout
    }

    /// Bersihkan seluruh lane (semua slot unlocked, tanpa waiter).
    ///
    /// Hanya boleh dipanggil saat tidak ada thread yang memakai lane ini.
    pub fn init(&self) {
        self.word.fetch_and(!self.layout.lane_mask(), Ordering::Release);
    }

    /// Bersihkan satu slot
    pub fn init_slot(&self, slot: u32) {
        self.word
            .fetch_and(!self.layout.slot_mask(slot), Ordering::Release);
    }

    #[inline]
    pub fn is_locked(&self, slot: u32) -> bool {
        self.word.load(Ordering::Acquire) & self.layout.held_bit(slot) != 0
    }

    /// Ambil lock tanpa blocking.
    ///
    /// Gagal hanya jika held bit benar-benar terpasang; CAS yang gagal
    /// karena bit lain berubah akan diulang.
    #[inline]
    pub fn try_lock(&self, slot: u32) -> bool {
        let held = self.layout.held_bit(slot);
        let mut old = self.word.load(Ordering::Relaxed);
        loop {
            if old & held != 0 {
                return false;
            }
            match self.word.compare_exchange_weak(
                old,
                old | held,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => old = actual,
            }
        }
    }

    /// Ambil lock, blok sampai berhasil.
    #[inline]
    pub fn lock(&self, slot: u32) {
        let held = self.layout.held_bit(slot);
        let old = self.word.load(Ordering::Relaxed);
        if old & held == 0
            && self
                .word
                .compare_exchange_weak(old, old | held, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
        {
            return;
        }
        let acquired = self.lock_slow_path(slot, None);
        debug_assert!(acquired);
    }

    /// Ambil lock, menyerah setelah `deadline`.
    pub fn try_lock_until(&self, slot: u32, deadline: Instant) -> bool {
        if self.try_lock(slot) {
            return true;
        }
        self.lock_slow_path(slot, Some(deadline))
    }

    /// Lepas lock. Membangunkan satu waiter jika wait bit terpasang.
    pub fn unlock(&self, slot: u32) {
        let held = self.layout.held_bit(slot);
        let wait = self.layout.wait_bit(slot);
        let mut old = self.word.load(Ordering::Relaxed);
        loop {
            debug_assert!(old & held != 0, "unlocking micro lock slot {slot} that is not held");
            match self.word.compare_exchange_weak(
                old,
                old & !(held | wait),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => old = actual,
            }
        }

        if old & wait != 0 {
            self.word.futex_wake(1, held);
        }
    }

    /// RAII guard: lock sekarang, unlock saat drop
    pub fn guard(&self, slot: u32) -> MicroLockGuard<'a, A> {
        self.lock(slot);
        MicroLockGuard { lock: *self, slot }
    }

    pub fn try_guard(&self, slot: u32) -> Option<MicroLockGuard<'a, A>> {
        if self.try_lock(slot) {
            Some(MicroLockGuard { lock: *self, slot })
        } else {
            None
        }
    }

    /// Spin → yield → futex. Returns `false` hanya jika deadline habis.
    fn lock_slow_path(&self, slot: u32, deadline: Option<Instant>) -> bool {
        let held = self.layout.held_bit(slot);
        let wait = self.layout.wait_bit(slot);
        let spin_limit = self.policy.max_spins;
        let yield_limit = spin_limit.saturating_add(self.policy.max_yields);

        let mut spins: u32 = 0;
        // Setelah pernah tidur, kita tidak tahu apakah masih ada waiter lain,
        // jadi wait bit ikut dipasang saat akhirnya mendapat lock
        let mut need_wait_bit = 0;
        let mut old = self.word.load(Ordering::Relaxed);

        loop {
            if old & held == 0 {
                match self.word.compare_exchange_weak(
                    old,
                    old | held | need_wait_bit,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return true,
                    Err(actual) => {
                        old = actual;
                        continue;
                    }
                }
            }

            spins = spins.saturating_add(1);
            if spins > yield_limit {
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        return false;
                    }
                }

                let new = old | wait;
                if new != old {
                    if let Err(actual) = self.word.compare_exchange_weak(
                        old,
                        new,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        old = actual;
                        continue;
                    }
                }

                if self.word.futex_wait(new, held, deadline) == FutexResult::TimedOut {
                    tracing::trace!(slot, "micro lock wait timed out");
                    return false;
                }
                need_wait_bit = wait;
            } else if spins > spin_limit {
                A::yield_now();
            } else {
                A::pause();
            }

            old = self.word.load(Ordering::Relaxed);
        }
    }
}

impl<A: Atom> fmt::Debug for MicroLock<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicroLock")
            .field("layout", &self.layout)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Guard yang melepas slot saat drop
#[must_use = "lock dilepas segera jika guard tidak disimpan"]
pub struct MicroLockGuard<'a, A: Atom = StdAtom> {
    lock: MicroLock<'a, A>,
    slot: u32,
}

impl<A: Atom> MicroLockGuard<'_, A> {
    pub fn slot(&self) -> u32 {
        self.slot
    }
}

impl<A: Atom> Drop for MicroLockGuard<'_, A> {
    fn drop(&mut self) {
        self.lock.unlock(self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_bit_layout_little_endian() {
        let layout = BitLayout::new(0, Endian::Little);
        assert_eq!(layout.held_bit(0), 0b01);
        assert_eq!(layout.wait_bit(0), 0b10);
        assert_eq!(layout.slot_mask(3), 0b1100_0000);
        assert_eq!(layout.lane_mask(), 0xFF);

        let layout = BitLayout::new(1, Endian::Little);
        assert_eq!(layout.held_bit(3), 1 << 14);
        assert_eq!(layout.lane_mask(), 0xFF00);
    }

    #[test]
    fn test_bit_layout_big_endian() {
        let layout = BitLayout::new(0, Endian::Big);
        assert_eq!(layout.held_bit(0), 1 << 24);
        assert_eq!(layout.lane_mask(), 0xFF00_0000);

        let layout = BitLayout::new(3, Endian::Big);
        assert_eq!(layout.held_bit(1), 1 << 2);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_slot_out_of_range() {
        BitLayout::native(0).held_bit(4);
    }

    #[test]
    fn test_lock_marks_own_byte() {
        let word: MicroLockWord = MicroLockWord::new();
        let lock = word.lock_at(2);

        lock.lock(1);
        assert_eq!(word.bytes(), [0, 0, 0b0100, 0]);
        assert!(lock.is_locked(1));
        assert!(!lock.is_locked(0));

        lock.unlock(1);
        assert_eq!(word.bytes(), [0; 4]);
    }

    #[test]
    fn test_try_lock_and_independent_slots() {
        let word: MicroLockWord = MicroLockWord::new();
        let lock = word.lock_at(0);

        assert!(lock.try_lock(0));
        assert!(!lock.try_lock(0));
        assert!(lock.try_lock(1));
        assert!(lock.try_lock(3));

        lock.unlock(0);
        assert!(lock.try_lock(0));
    }

    #[test]
    fn test_init_clears_only_own_lane() {
        let word: MicroLockWord =
            MicroLockWord::with_value(u32::from_ne_bytes([0xAA, 0xFF, 0xBB, 0xCC]));
        let lock = word.lock_at(1);
        lock.init();
        assert_eq!(word.bytes(), [0xAA, 0x00, 0xBB, 0xCC]);

        lock.lock(2);
        lock.init_slot(2);
        assert!(!lock.is_locked(2));
        assert_eq!(word.bytes(), [0xAA, 0x00, 0xBB, 0xCC]);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let word: MicroLockWord = MicroLockWord::new();
        let lock = word.lock_at(3);
        {
            let guard = lock.guard(0);
            assert_eq!(guard.slot(), 0);
            assert!(lock.try_guard(0).is_none());
        }
        assert!(!lock.is_locked(0));
        assert!(lock.try_guard(0).is_some());
        assert!(!lock.is_locked(0));
    }

    #[test]
    fn test_try_lock_until_times_out() {
        let word: MicroLockWord = MicroLockWord::new();
        let lock = word.lock_at_with(0, SpinPolicy::no_spin());
        lock.lock(0);

        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(!lock.try_lock_until(0, deadline));
        assert!(Instant::now() >= deadline);
        // Wait bit tertinggal, unlock tetap membersihkan keduanya
        lock.unlock(0);
        assert_eq!(word.load(), 0);
        assert!(lock.try_lock_until(0, Instant::now() + Duration::from_millis(20)));
    }
}
