//! Turn Sequencer: counter per-slot yang bisa ditunggu
//!
//! Satu word 32-bit menyimpan `turn << 6 | max_waiter_delta`:
//! - 26 bit atas: turn yang sedang berjalan (belum di-complete)
//! - 6 bit bawah: seberapa jauh di depan waiter terjauh yang sedang tidur
//!
//! Menunggu turn memakai tangga spin → yield → futex. Futex channel untuk
//! turn `t` adalah bit `t mod 32`, jadi `complete_turn` hanya membangunkan
//! waiter turn berikutnya (plus alias tiap 32 turn, yang akan re-check).
//!
//! Waiter delta di-saturasi di 63. Waiter yang lebih jauh dari itu tetap
//! dibangunkan: selama delta tersimpan masih > 0, `complete_turn` memakai
//! setiap channel minimal sekali per 32 turn, jadi waiter ikut bangun lewat
//! alias channel, lalu mendaftar ulang dengan delta yang baru.

use std::fmt;
use std::sync::atomic::Ordering;
use std::time::Instant;

use crate::sync::{Atom, AtomicLike, FutexLike, StdAtom};

const TURN_SHIFT: u32 = 6;
const WAITERS_MASK: u32 = (1 << TURN_SHIFT) - 1;

/// Hasil dari [`TurnSequencer::try_wait_for_turn`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryWaitResult {
    /// Turn yang diminta sekarang aktif
    Success,
    /// Turn yang diminta sudah lewat
    Past,
    /// Deadline habis sebelum turn tiba
    TimedOut,
}

/// Counter turn yang bisa ditunggu, satu per slot.
///
/// Turn bersifat 26-bit: `turn` yang lebih besar di-truncate, dan
/// perbandingan "sudah lewat" memakai aritmetika wrap-safe.
pub struct TurnSequencer<A: Atom = StdAtom> {
    state: A::U32,
}

impl<A: Atom> TurnSequencer<A> {
    pub fn new(first_turn: u32) -> Self {
        Self {
            state: A::U32::new(encode(first_turn << TURN_SHIFT, 0)),
        }
    }

    /// Returns `true` jika `turn` sedang aktif. Tidak pernah blocking.
    #[inline]
    pub fn is_turn(&self, turn: u32) -> bool {
        let state = self.state.load(Ordering::Acquire);
        decode_current_sturn(state) == turn << TURN_SHIFT
    }

    /// Turn yang sedang berjalan (26-bit).
    #[inline]
    pub fn current_turn(&self) -> u32 {
        decode_current_sturn(self.state.load(Ordering::Acquire)) >> TURN_SHIFT
    }

    /// Blok sampai `turn` aktif.
    ///
    /// Menunggu turn yang sudah lewat adalah kesalahan pemanggil.
    pub fn wait_for_turn(&self, turn: u32, spin_cutoff: &A::U32, update_spin_cutoff: bool) {
        let result = self.try_wait_for_turn(turn, spin_cutoff, update_spin_cutoff, None);
        debug_assert_eq!(
            result,
            TryWaitResult::Success,
            "waited for turn {turn} which already passed"
        );
    }

    /// Tunggu sampai `turn` aktif, turn sudah lewat, atau deadline habis.
    ///
    /// `spin_cutoff` adalah batas spin adaptif milik pemanggil. Nilai 0 berarti
    /// belum dikalibrasi; kalibrasi pertama disimpan langsung, berikutnya
    /// digeser 1/8 jalan ke target (hanya jika `update_spin_cutoff`).
    pub fn try_wait_for_turn(
        &self,
        turn: u32,
        spin_cutoff: &A::U32,
        update_spin_cutoff: bool,
        deadline: Option<Instant>,
    ) -> TryWaitResult {
        let prev_thresh = spin_cutoff.load(Ordering::Relaxed);
        let effective_spin_cutoff = if update_spin_cutoff || prev_thresh == 0 {
            A::MAX_SPINS
        } else {
            prev_thresh
        };
        let yield_cutoff = effective_spin_cutoff.saturating_add(A::MAX_YIELDS);

        let sturn = turn << TURN_SHIFT;
        let mut tries: u32 = 0;

        loop {
            let state = self.state.load(Ordering::Acquire);
            let current_sturn = decode_current_sturn(state);
            if current_sturn == sturn {
                break;
            }

            // Versi wrap-safe dari (current_sturn >= sturn)
            if sturn.wrapping_sub(current_sturn) >= u32::MAX / 2 {
                return TryWaitResult::Past;
            }

            if tries < effective_spin_cutoff {
                A::pause();
                tries += 1;
                continue;
            }

            if tries < yield_cutoff {
                A::yield_now();
                tries += 1;
                continue;
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return TryWaitResult::TimedOut;
                }
            }

            // Catat diri sebagai waiter sebelum tidur
            let current_max_waiter_delta = decode_max_waiters_delta(state);
            let our_waiter_delta = sturn.wrapping_sub(current_sturn) >> TURN_SHIFT;
            let new_state = if our_waiter_delta <= current_max_waiter_delta {
                state
            } else {
                let new_state = encode(current_sturn, our_waiter_delta);
                if state != new_state
                    && self
                        .state
                        .compare_exchange(state, new_state, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                {
                    continue;
                }
                new_state
            };

            let result = self
                .state
                .futex_wait(new_state, futex_channel(turn), deadline);
            if result == crate::sync::FutexResult::TimedOut {
                tracing::trace!(turn, "turn wait timed out");
                return TryWaitResult::TimedOut;
            }
            tries = tries.saturating_add(1);
        }

        if update_spin_cutoff || prev_thresh == 0 {
            let target = if tries >= A::MAX_SPINS {
                A::MIN_SPINS
            } else {
                tries.saturating_mul(2).clamp(A::MIN_SPINS, A::MAX_SPINS)
            };

            if prev_thresh == 0 {
                spin_cutoff.store(target, Ordering::Relaxed);
            } else {
                let moved = prev_thresh as i64 + (target as i64 - prev_thresh as i64) / 8;
                let _ = spin_cutoff.compare_exchange_weak(
                    prev_thresh,
                    moved as u32,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                );
            }
        }

        TryWaitResult::Success
    }

    /// Selesaikan `turn` (harus turn yang sedang aktif) dan aktifkan `turn + 1`.
    pub fn complete_turn(&self, turn: u32) {
        let mut state = self.state.load(Ordering::Acquire);
        loop {
            debug_assert_eq!(
                decode_current_sturn(state),
                turn << TURN_SHIFT,
                "completing turn {turn} out of order"
            );
            let max_waiter_delta = decode_max_waiters_delta(state);
            let new_state = encode(
                turn.wrapping_add(1) << TURN_SHIFT,
                max_waiter_delta.saturating_sub(1),
            );

            match self
                .state
                .compare_exchange(state, new_state, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    if max_waiter_delta != 0 {
                        self.state
                            .futex_wake(u32::MAX, futex_channel(turn.wrapping_add(1)));
                    }
                    return;
                }
                Err(actual) => state = actual,
            }
        }
    }
}

impl<A: Atom> fmt::Debug for TurnSequencer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.load(Ordering::Relaxed);
        f.debug_struct("TurnSequencer")
            .field("turn", &(decode_current_sturn(state) >> TURN_SHIFT))
            .field("max_waiter_delta", &decode_max_waiters_delta(state))
            .finish()
    }
}

#[inline(always)]
fn futex_channel(turn: u32) -> u32 {
    1 << (turn & 31)
}

#[inline(always)]
fn decode_current_sturn(state: u32) -> u32 {
    state & !WAITERS_MASK
}

#[inline(always)]
fn decode_max_waiters_delta(state: u32) -> u32 {
    state & WAITERS_MASK
}

#[inline(always)]
fn encode(current_sturn: u32, max_waiter_delta: u32) -> u32 {
    current_sturn | max_waiter_delta.min(WAITERS_MASK)
}
