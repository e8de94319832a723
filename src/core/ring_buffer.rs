//! Lock-Free Multi-Writer Ring Buffer dengan Turn Sequencer
//!
//! Writer tidak pernah menunggu reader: setiap write mengambil ticket baru,
//! dan slot fisik `ticket % capacity` ditimpa tanpa peduli apakah nilai lama
//! sudah dibaca. Reader memegang [`Cursor`] dan mendeteksi sendiri jika
//! slot yang dituju sudah ditimpa (stale).
//!
//! Encoding dua fase per slot, untuk turn `t = ticket / capacity`:
//! - sequencer `2t`     → slot siap ditulis
//! - sequencer `2t + 1` → write sedang berjalan
//! - sequencer `2t + 2` → write selesai, nilai bisa dibaca
//!
//! Tidak ada Mutex, tidak ada alokasi setelah inisialisasi.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{fence, Ordering};
use std::time::Instant;

use super::turn_sequencer::{TryWaitResult, TurnSequencer};
use crate::sync::{Atom, AtomicLike, CacheLinePadded, StdAtom};

/// Posisi baca dalam stream logis tak terbatas.
///
/// Cursor tidak memiliki data; ia hanya membawa ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor {
    ticket: u64,
}

impl Cursor {
    pub(crate) const fn new(ticket: u64) -> Self {
        Self { ticket }
    }

    #[inline]
    pub const fn ticket(&self) -> u64 {
        self.ticket
    }

    /// Maju `steps` ticket, saturasi di `u64::MAX`.
    ///
    /// Returns `false` jika cursor tidak bergerak.
    pub fn move_forward(&mut self, steps: u64) -> bool {
        let prev = self.ticket;
        self.ticket = self.ticket.saturating_add(steps);
        prev != self.ticket
    }

    /// Mundur `steps` ticket, saturasi di 0.
    ///
    /// Returns `false` jika cursor tidak bergerak.
    pub fn move_backward(&mut self, steps: u64) -> bool {
        let prev = self.ticket;
        self.ticket = self.ticket.saturating_sub(steps);
        prev != self.ticket
    }
}

/// Satu slot fisik: payload + sequencer.
#[repr(C, align(64))] // Cache line alignment untuk menghindari false sharing
pub struct RingBufferSlot<T, A: Atom = StdAtom> {
    sequencer: TurnSequencer<A>,
    data: UnsafeCell<MaybeUninit<T>>,
}

// SAFETY: akses ke `data` diatur oleh sequencer:
// - hanya pemilik turn `2t` yang menulis (eksklusif antar writer)
// - reader hanya menyalin bit lalu memvalidasi ulang turn (seqlock);
//   salinan yang bertabrakan dengan write selalu dibuang
unsafe impl<T: Send, A: Atom> Sync for RingBufferSlot<T, A> {}

impl<T: Copy, A: Atom> RingBufferSlot<T, A> {
    fn new() -> Self {
        Self {
            sequencer: TurnSequencer::new(0),
            data: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Tulis `value` untuk `turn`. Blok hanya jika writer turn sebelumnya
    /// pada slot ini belum selesai.
    pub fn write(&self, turn: u32, value: T) {
        let cutoff = A::U32::new(0);
        let begin = turn.wrapping_mul(2);

        self.sequencer.wait_for_turn(begin, &cutoff, false);
        // Ganjil: write sedang berjalan, reader akan menolak salinannya
        self.sequencer.complete_turn(begin);
        fence(Ordering::Release);

        // SAFETY: kita pemilik eksklusif turn ini, pointer berasal dari UnsafeCell
        unsafe {
            ptr::write_volatile(self.data.get(), MaybeUninit::new(value));
        }

        self.sequencer.complete_turn(begin.wrapping_add(1));
    }

    /// Baca nilai turn `turn` tanpa blocking.
    ///
    /// `None` jika belum ditulis atau sudah ditimpa.
    pub fn try_read(&self, turn: u32) -> Option<T> {
        let desired = turn.wrapping_add(1).wrapping_mul(2);
        if !self.sequencer.is_turn(desired) {
            return None;
        }
        self.copy_and_validate(desired)
    }

    /// Tunggu sampai write turn `turn` selesai, lalu baca.
    ///
    /// Wait yang berhasil tidak menjamin read berhasil: writer berikutnya
    /// bisa menimpa slot di antara keduanya.
    pub fn wait_and_try_read(&self, turn: u32, deadline: Option<Instant>) -> Option<T> {
        let desired = turn.wrapping_add(1).wrapping_mul(2);
        let cutoff = A::U32::new(0);
        match self
            .sequencer
            .try_wait_for_turn(desired, &cutoff, false, deadline)
        {
            TryWaitResult::Success => self.copy_and_validate(desired),
            TryWaitResult::Past | TryWaitResult::TimedOut => None,
        }
    }

    #[inline]
    fn copy_and_validate(&self, desired: u32) -> Option<T> {
        // SAFETY: salinan bitwise ke MaybeUninit, belum di-assume_init.
        // Jika write bertabrakan, validasi di bawah gagal dan salinan dibuang.
        let copy = unsafe { ptr::read_volatile(self.data.get()) };
        fence(Ordering::Acquire);

        if self.sequencer.is_turn(desired) {
            // SAFETY: turn `desired` hanya tercapai setelah write lengkap,
            // dan tidak ada write baru yang mulai selama penyalinan
            Some(unsafe { copy.assume_init() })
        } else {
            None
        }
    }
}

/// Lock-Free Ring Buffer: banyak writer, banyak reader, writer tidak pernah
/// menunggu reader.
pub struct LockFreeRingBuffer<T, A: Atom = StdAtom> {
    // Ticket berikutnya yang akan dikeluarkan
    ticket: CacheLinePadded<A::U64>,
    capacity: u32,
    // Pre-allocated di heap - tidak ada alokasi setelah init
    slots: Box<[RingBufferSlot<T, A>]>,
}

impl<T: Copy, A: Atom> LockFreeRingBuffer<T, A> {
    /// # Panics
    /// Panic jika `capacity == 0`
    pub fn new(capacity: u32) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be positive");

        let slots: Vec<RingBufferSlot<T, A>> =
            (0..capacity).map(|_| RingBufferSlot::new()).collect();

        tracing::debug!(capacity, "lock-free ring buffer created");

        Self {
            ticket: CacheLinePadded::new(A::U64::new(0)),
            capacity,
            slots: slots.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Tulis nilai ke posisi berikutnya. Lock-free terhadap reader.
    #[inline]
    pub fn write(&self, value: T) {
        let ticket = self.ticket.fetch_add(1, Ordering::AcqRel);
        self.slot(ticket).write(self.turn(ticket), value);
    }

    /// Tulis lalu kembalikan cursor yang menunjuk ke nilai tersebut.
    #[inline]
    pub fn write_and_get_cursor(&self, value: T) -> Cursor {
        let ticket = self.ticket.fetch_add(1, Ordering::AcqRel);
        self.slot(ticket).write(self.turn(ticket), value);
        Cursor::new(ticket)
    }

    /// Baca nilai di `cursor` tanpa blocking.
    ///
    /// Returns `None` jika belum ditulis atau sudah ditimpa.
    #[inline]
    pub fn try_read(&self, cursor: &Cursor) -> Option<T> {
        let value = self.slot(cursor.ticket).try_read(self.turn(cursor.ticket))?;
        self.within_window(cursor).then_some(value)
    }

    /// Tunggu sampai nilai di `cursor` ditulis, lalu baca.
    ///
    /// Returns `None` jika slot sudah ditimpa (sebelum atau sesudah menunggu).
    #[inline]
    pub fn wait_and_try_read(&self, cursor: &Cursor) -> Option<T> {
        let value = self
            .slot(cursor.ticket)
            .wait_and_try_read(self.turn(cursor.ticket), None)?;
        self.within_window(cursor).then_some(value)
    }

    /// Seperti [`wait_and_try_read`](Self::wait_and_try_read), dengan deadline.
    #[inline]
    pub fn wait_and_try_read_until(&self, cursor: &Cursor, deadline: Instant) -> Option<T> {
        let value = self
            .slot(cursor.ticket)
            .wait_and_try_read(self.turn(cursor.ticket), Some(deadline))?;
        self.within_window(cursor).then_some(value)
    }

    /// Cursor ke ticket yang akan dikeluarkan berikutnya (belum bisa dibaca).
    #[inline]
    pub fn current_head(&self) -> Cursor {
        Cursor::new(self.ticket.load(Ordering::Acquire))
    }

    /// Cursor ke nilai tertua yang kemungkinan masih bisa dibaca.
    ///
    /// `skip_fraction = 0.0` menunjuk ke `capacity` write terakhir,
    /// `1.0` ke write terakhir saja.
    ///
    /// # Panics
    /// Panic jika `skip_fraction` di luar `[0, 1]`
    pub fn current_tail(&self, skip_fraction: f64) -> Cursor {
        assert!(
            (0.0..=1.0).contains(&skip_fraction),
            "skip fraction {skip_fraction} out of [0, 1]"
        );

        let ticket = self.ticket.load(Ordering::Acquire);
        let back_step = ((1.0 - skip_fraction) * f64::from(self.capacity)).round() as u64;
        // Selalu mundur minimal satu langkah ke sesuatu yang bisa dibaca,
        // tapi tidak lebih jauh dari jumlah write yang pernah terjadi
        let back_step = back_step.max(1).min(ticket);
        Cursor::new(ticket - back_step)
    }

    /// Turn sequencer hanya 26-bit, jadi turn slot berulang tiap 2^25 putaran.
    /// Setelah validasi slot, cursor harus tetap berada di `capacity` ticket
    /// terakhir; head dibaca sesudah salinan, dan writer mengambil ticket
    /// sebelum menimpa, jadi cek ini hanya bisa terlalu ketat, tidak longgar.
    #[inline]
    fn within_window(&self, cursor: &Cursor) -> bool {
        let head = self.ticket.load(Ordering::Acquire);
        cursor.ticket < head && head - cursor.ticket <= u64::from(self.capacity)
    }

    #[inline(always)]
    fn slot(&self, ticket: u64) -> &RingBufferSlot<T, A> {
        &self.slots[(ticket % u64::from(self.capacity)) as usize]
    }

    #[inline(always)]
    fn turn(&self, ticket: u64) -> u32 {
        (ticket / u64::from(self.capacity)) as u32
    }
}

impl<T, A: Atom> fmt::Debug for LockFreeRingBuffer<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockFreeRingBuffer")
            .field("capacity", &self.capacity)
            .field("head", &self.ticket.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_last_capacity_values_readable() {
        let rb: LockFreeRingBuffer<u64> = LockFreeRingBuffer::new(4);
        for i in 0..8 {
            rb.write(i);
        }

        let mut cursor = rb.current_head();
        assert_eq!(cursor.ticket(), 8);
        assert!(cursor.move_backward(4));

        for expected in 4..8 {
            assert_eq!(rb.try_read(&cursor), Some(expected));
            cursor.move_forward(1);
        }
        // Head sendiri belum ditulis
        assert_eq!(rb.try_read(&cursor), None);
    }

    #[test]
    fn test_fixed_cursor_goes_stale() {
        let rb: LockFreeRingBuffer<u32> = LockFreeRingBuffer::new(4);
        let mut cursor = rb.current_head();
        assert!(cursor.move_forward(1));

        for i in 0..4 {
            rb.write(i);
        }
        assert_eq!(rb.try_read(&cursor), Some(1));

        // Ticket 4 menimpa slot 0, ticket 1 masih aman
        rb.write(4);
        assert_eq!(rb.try_read(&cursor), Some(1));

        // Ticket 5 menimpa slot 1
        rb.write(5);
        assert_eq!(rb.try_read(&cursor), None);
        assert_eq!(rb.wait_and_try_read(&cursor), None);
    }

    #[test]
    fn test_cursor_on_aliased_turn_is_rejected() {
        let rb: LockFreeRingBuffer<u64> = LockFreeRingBuffer::new(1);
        rb.write(7);
        assert_eq!(rb.try_read(&Cursor::new(0)), Some(7));

        // Turn 2^25 jatuh ke state sequencer yang sama dengan turn 0
        let ahead = Cursor::new(1 << 25);
        assert_eq!(rb.try_read(&ahead), None);
        let deadline = Instant::now() + Duration::from_millis(10);
        assert_eq!(rb.wait_and_try_read_until(&ahead, deadline), None);
        assert_eq!(rb.wait_and_try_read(&ahead), None);
    }

    #[test]
    fn test_unwritten_read() {
        let rb: LockFreeRingBuffer<u64> = LockFreeRingBuffer::new(8);
        assert_eq!(rb.try_read(&rb.current_head()), None);

        let deadline = Instant::now() + Duration::from_millis(10);
        assert_eq!(rb.wait_and_try_read_until(&rb.current_head(), deadline), None);
    }

    #[test]
    fn test_write_and_get_cursor() {
        let rb: LockFreeRingBuffer<(u32, u32)> = LockFreeRingBuffer::new(2);
        let first = rb.write_and_get_cursor((1, 2));
        let second = rb.write_and_get_cursor((3, 4));
        assert!(first < second);
        assert_eq!(rb.try_read(&first), Some((1, 2)));
        assert_eq!(rb.try_read(&second), Some((3, 4)));
    }

    #[test]
    fn test_current_tail_clamps() {
        let rb: LockFreeRingBuffer<u64> = LockFreeRingBuffer::new(4);
        assert_eq!(rb.current_tail(0.0).ticket(), 0);

        rb.write(0);
        rb.write(1);
        assert_eq!(rb.current_tail(0.0).ticket(), 0);
        assert_eq!(rb.current_tail(1.0).ticket(), 1);

        for i in 2..10 {
            rb.write(i);
        }
        assert_eq!(rb.current_tail(0.0).ticket(), 6);
        assert_eq!(rb.current_tail(0.5).ticket(), 8);
        assert_eq!(rb.current_tail(1.0).ticket(), 9);
        assert_eq!(rb.try_read(&rb.current_tail(0.0)), Some(6));
    }

    #[test]
    #[should_panic(expected = "skip fraction")]
    fn test_current_tail_rejects_out_of_range() {
        let rb: LockFreeRingBuffer<u64> = LockFreeRingBuffer::new(4);
        rb.current_tail(1.5);
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn test_zero_capacity() {
        let _rb: LockFreeRingBuffer<u64> = LockFreeRingBuffer::new(0);
    }

    #[test]
    fn test_wait_and_try_read_blocks_until_written() {
        let rb: Arc<LockFreeRingBuffer<u64>> = Arc::new(LockFreeRingBuffer::new(16));
        let cursor = rb.current_head();
        let reader_rb = Arc::clone(&rb);

        let reader = thread::spawn(move || reader_rb.wait_and_try_read(&cursor));

        thread::sleep(Duration::from_millis(20));
        rb.write(42);
        assert_eq!(reader.join().unwrap(), Some(42));
    }

    #[test]
    fn test_cursor_saturation() {
        let mut cursor = Cursor::new(2);
        assert!(cursor.move_backward(5));
        assert_eq!(cursor.ticket(), 0);
        assert!(!cursor.move_backward(1));

        let mut cursor = Cursor::new(u64::MAX - 1);
        assert!(cursor.move_forward(10));
        assert_eq!(cursor.ticket(), u64::MAX);
        assert!(!cursor.move_forward(1));
    }

    proptest! {
        #[test]
        fn prop_move_backward_saturates(start in any::<u64>(), steps in any::<u64>()) {
            let mut cursor = Cursor::new(start);
            let moved = cursor.move_backward(steps);
            prop_assert_eq!(cursor.ticket(), start.saturating_sub(steps));
            prop_assert_eq!(moved, start != 0 && steps != 0);
        }

        #[test]
        fn prop_move_forward_saturates(start in any::<u64>(), steps in any::<u64>()) {
            let mut cursor = Cursor::new(start);
            let moved = cursor.move_forward(steps);
            prop_assert_eq!(cursor.ticket(), start.saturating_add(steps));
            prop_assert_eq!(moved, start != u64::MAX && steps != 0);
        }

        #[test]
        fn prop_readable_window(capacity in 1u32..32, writes in 0u64..200) {
            let rb: LockFreeRingBuffer<u64> = LockFreeRingBuffer::new(capacity);
            for i in 0..writes {
                rb.write(i * 3);
            }

            let oldest = writes.saturating_sub(u64::from(capacity));
            for ticket in 0..writes {
                let read = rb.try_read(&Cursor::new(ticket));
                if ticket >= oldest {
                    prop_assert_eq!(read, Some(ticket * 3));
                } else {
                    prop_assert_eq!(read, None);
                }
            }
        }
    }
}
