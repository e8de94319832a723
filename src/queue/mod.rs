//! Bounded Ticket Queue: antrian MPMC berkapasitas tetap berbasis ticket
//!
//! Setiap enqueue dan dequeue mengambil ticket dari counter masing-masing.
//! Ticket `t` selalu memakai slot `idx(t)` pada turn `t / capacity`; di
//! dalam slot, sequencer bergantian antara enqueue (`2 * turn`) dan
//! dequeue (`2 * turn + 1`). Ticket berurutan disebar ke slot yang berjauhan
//! dengan stride prima supaya producer/consumer yang berdekatan tidak
//! berebut cache line.
//!
//! Queue ini tidak lock-free: operasi yang sudah mendapat ticket bisa
//! menunggu operasi lain yang ticket-nya lebih tua pada slot yang sama.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::{self, MaybeUninit};
use std::sync::atomic::Ordering;
use std::time::Instant;

use crate::core::{TryWaitResult, TurnSequencer};
use crate::error::QueueFull;
use crate::sync::{Atom, AtomicLike, CacheLinePadded, StdAtom};

/// Setiap 128 ticket, waiter spin lebih lama untuk mengkalibrasi ulang cutoff
const ADAPTATION_FREQ: u64 = 128;

const SMALL_PRIMES: [usize; 9] = [2, 3, 5, 7, 11, 13, 17, 19, 23];

/// Slot berisi maksimal satu item.
struct Slot<T, A: Atom> {
    // Genap = kosong (menunggu enqueue), ganjil = berisi (menunggu dequeue)
    sequencer: TurnSequencer<A>,
    contents: UnsafeCell<MaybeUninit<T>>,
}

impl<T, A: Atom> Slot<T, A> {
    fn new() -> Self {
        Self {
            sequencer: TurnSequencer::new(0),
            contents: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    fn enqueue(&self, turn: u32, spin_cutoff: &A::U32, update_spin_cutoff: bool, value: T) {
        let enqueue_turn = turn.wrapping_mul(2);
        self.sequencer
            .wait_for_turn(enqueue_turn, spin_cutoff, update_spin_cutoff);
        // SAFETY: turn genap milik kita, slot kosong dan tidak ada yang membaca
        unsafe {
            (*self.contents.get()).write(value);
        }
        self.sequencer.complete_turn(enqueue_turn);
    }

    fn dequeue(&self, turn: u32, spin_cutoff: &A::U32, update_spin_cutoff: bool) -> T {
        let dequeue_turn = turn.wrapping_mul(2).wrapping_add(1);
        self.sequencer
            .wait_for_turn(dequeue_turn, spin_cutoff, update_spin_cutoff);
        // SAFETY: turn ganjil hanya tercapai setelah enqueue selesai menulis
        let value = unsafe { (*self.contents.get()).assume_init_read() };
        self.sequencer.complete_turn(dequeue_turn);
        value
    }

    #[inline]
    fn may_enqueue(&self, turn: u32) -> bool {
        self.sequencer.is_turn(turn.wrapping_mul(2))
    }

    #[inline]
    fn may_dequeue(&self, turn: u32) -> bool {
        self.sequencer.is_turn(turn.wrapping_mul(2).wrapping_add(1))
    }

    /// `false` hanya jika deadline habis
    fn try_wait_for_enqueue_turn_until(
        &self,
        turn: u32,
        spin_cutoff: &A::U32,
        update_spin_cutoff: bool,
        deadline: Instant,
    ) -> bool {
        self.sequencer.try_wait_for_turn(
            turn.wrapping_mul(2),
            spin_cutoff,
            update_spin_cutoff,
            Some(deadline),
        ) != TryWaitResult::TimedOut
    }

    fn try_wait_for_dequeue_turn_until(
        &self,
        turn: u32,
        spin_cutoff: &A::U32,
        update_spin_cutoff: bool,
        deadline: Instant,
    ) -> bool {
        self.sequencer.try_wait_for_turn(
            turn.wrapping_mul(2).wrapping_add(1),
            spin_cutoff,
            update_spin_cutoff,
            Some(deadline),
        ) != TryWaitResult::TimedOut
    }
}

impl<T, A: Atom> Drop for Slot<T, A> {
    fn drop(&mut self) {
        if mem::needs_drop::<T>() && self.sequencer.current_turn() & 1 == 1 {
            // SAFETY: turn ganjil = ada item yang belum di-dequeue
            unsafe { self.contents.get_mut().assume_init_drop() }
        }
    }
}

/// Antrian MPMC bounded yang blocking, dengan ticket eksplisit.
pub struct BoundedTicketQueue<T, A: Atom = StdAtom> {
    capacity: usize,
    stride: usize,
    slots: Box<[Slot<T, A>]>,
    push_ticket: CacheLinePadded<A::U64>,
    pop_ticket: CacheLinePadded<A::U64>,
    push_spin_cutoff: CacheLinePadded<A::U32>,
    pop_spin_cutoff: CacheLinePadded<A::U32>,
}

// SAFETY: setiap item ditulis tepat oleh satu pemilik ticket enqueue dan
// dibaca tepat oleh satu pemilik ticket dequeue, diurutkan oleh sequencer
unsafe impl<T: Send, A: Atom> Sync for BoundedTicketQueue<T, A> {}

impl<T, A: Atom> BoundedTicketQueue<T, A> {
    /// # Panics
    /// Panic jika `capacity == 0`
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");

        let stride = compute_stride(capacity);
        let slots: Vec<Slot<T, A>> = (0..capacity).map(|_| Slot::new()).collect();

        tracing::debug!(capacity, stride, "bounded ticket queue created");

        Self {
            capacity,
            stride,
            slots: slots.into_boxed_slice(),
            push_ticket: CacheLinePadded::new(A::U64::new(0)),
            pop_ticket: CacheLinePadded::new(A::U64::new(0)),
            push_spin_cutoff: CacheLinePadded::new(A::U32::new(0)),
            pop_spin_cutoff: CacheLinePadded::new(A::U32::new(0)),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jumlah ticket enqueue yang sudah dikeluarkan, termasuk yang masih blocking
    #[inline]
    pub fn write_count(&self) -> u64 {
        self.push_ticket.load(Ordering::Acquire)
    }

    /// Jumlah ticket dequeue yang sudah dikeluarkan, termasuk yang masih blocking
    #[inline]
    pub fn read_count(&self) -> u64 {
        self.pop_ticket.load(Ordering::Acquire)
    }

    /// `write_count - read_count`; bisa negatif jika ada reader yang menunggu.
    #[inline]
    pub fn size_guess(&self) -> i64 {
        let writes = self.write_count();
        let reads = self.read_count();
        writes.wrapping_sub(reads) as i64
    }

    /// `write_count - read_count` dari snapshot yang konsisten: salah satu
    /// counter dibaca ulang sampai tidak berubah di antara dua load.
    ///
    /// Negatif berarti ada reader yang sudah mendapat ticket dan sedang
    /// menunggu item.
    pub fn size(&self) -> i64 {
        let mut pushes = self.push_ticket.load(Ordering::Acquire);
        let mut pops = self.pop_ticket.load(Ordering::Acquire);
        loop {
            let next_pushes = self.push_ticket.load(Ordering::Acquire);
            if pushes == next_pushes {
                return pushes.wrapping_sub(pops) as i64;
            }
            pushes = next_pushes;

            let next_pops = self.pop_ticket.load(Ordering::Acquire);
            if pops == next_pops {
                return pushes.wrapping_sub(pops) as i64;
            }
            pops = next_pops;
        }
    }

    /// Tidak ada item yang bisa dibaca (termasuk saat reader sedang menunggu)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size() <= 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.size() >= self.capacity as i64
    }

    /// Enqueue, blok sampai ada tempat.
    pub fn blocking_write(&self, value: T) {
        let ticket = self.push_ticket.fetch_add(1, Ordering::AcqRel);
        self.enqueue_with_ticket(ticket, value);
    }

    /// Enqueue pada ticket eksplisit tanpa mengambil push ticket.
    ///
    /// Pemanggil bertanggung jawab atas keunikan ticket (dipakai pipeline
    /// untuk menulis output stage pada posisi yang sudah dipesan).
    pub fn blocking_write_with_ticket(&self, ticket: u64, value: T) {
        self.enqueue_with_ticket(ticket, value);
    }

    /// Enqueue hanya jika tidak perlu menunggu sama sekali.
    pub fn write(&self, value: T) -> Result<(), QueueFull<T>> {
        match self.try_obtain_ready_push_ticket() {
            Some(ticket) => {
                self.enqueue_with_ticket(ticket, value);
                Ok(())
            }
            None => Err(QueueFull(value)),
        }
    }

    /// Enqueue, menunggu tempat sampai `deadline`.
    pub fn try_write_until(&self, value: T, deadline: Instant) -> Result<(), QueueFull<T>> {
        match self.try_obtain_promised_push_ticket_until(deadline) {
            Some(ticket) => {
                self.enqueue_with_ticket(ticket, value);
                Ok(())
            }
            None => Err(QueueFull(value)),
        }
    }

    /// Enqueue jika queue tidak penuh.
    ///
    /// Berbeda dengan [`write`](Self::write), ini bisa menunggu dequeue yang
    /// sudah mendapat ticket tapi belum selesai. Setelah write berhasil,
    /// [`read_if_not_empty`](Self::read_if_not_empty) dijamin berhasil.
    pub fn write_if_not_full(&self, value: T) -> Result<(), QueueFull<T>> {
        match self.try_obtain_promised_push_ticket() {
            Ok(ticket) => {
                self.enqueue_with_ticket(ticket, value);
                Ok(())
            }
            Err(_) => Err(QueueFull(value)),
        }
    }

    /// Dequeue, blok sampai ada item.
    pub fn blocking_read(&self) -> T {
        self.blocking_read_with_ticket().1
    }

    /// Seperti [`blocking_read`](Self::blocking_read), plus ticket dequeue-nya.
    pub fn blocking_read_with_ticket(&self) -> (u64, T) {
        let ticket = self.pop_ticket.fetch_add(1, Ordering::AcqRel);
        (ticket, self.dequeue_with_ticket(ticket))
    }

    /// Dequeue hanya jika tidak perlu menunggu sama sekali.
    pub fn read(&self) -> Option<T> {
        self.read_and_get_ticket().map(|(_, value)| value)
    }

    pub fn read_and_get_ticket(&self) -> Option<(u64, T)> {
        let ticket = self.try_obtain_ready_pop_ticket()?;
        Some((ticket, self.dequeue_with_ticket(ticket)))
    }

    /// Dequeue, menunggu item sampai `deadline`.
    ///
    /// `None` jika tidak ada enqueue yang selesai sebelum deadline.
    pub fn try_read_until(&self, deadline: Instant) -> Option<T> {
        let ticket = self.try_obtain_ready_pop_ticket_until(deadline)?;
        Some(self.dequeue_with_ticket(ticket))
    }

    /// Dequeue jika queue tidak kosong; bisa menunggu enqueue yang sedang berjalan.
    pub fn read_if_not_empty(&self) -> Option<T> {
        let ticket = self.try_obtain_promised_pop_ticket()?;
        Some(self.dequeue_with_ticket(ticket))
    }

    #[inline(always)]
    fn idx(&self, ticket: u64) -> usize {
        let cap = self.capacity as u64;
        (((ticket % cap) * self.stride as u64) % cap) as usize
    }

    #[inline(always)]
    fn turn(&self, ticket: u64) -> u32 {
        (ticket / self.capacity as u64) as u32
    }

    #[inline(always)]
    fn slot(&self, ticket: u64) -> &Slot<T, A> {
        &self.slots[self.idx(ticket)]
    }

    fn enqueue_with_ticket(&self, ticket: u64, value: T) {
        self.slot(ticket).enqueue(
            self.turn(ticket),
            &self.push_spin_cutoff,
            ticket % ADAPTATION_FREQ == 0,
            value,
        );
    }

    fn dequeue_with_ticket(&self, ticket: u64) -> T {
        self.slot(ticket).dequeue(
            self.turn(ticket),
            &self.pop_spin_cutoff,
            ticket % ADAPTATION_FREQ == 0,
        )
    }

    /// Ticket push yang slot-nya sudah kosong sekarang.
    fn try_obtain_ready_push_ticket(&self) -> Option<u64> {
        let mut ticket = self.push_ticket.load(Ordering::Acquire);
        loop {
            if !self.slot(ticket).may_enqueue(self.turn(ticket)) {
                // Cek dibatasi dua load yang sama: slot memang belum siap
                let prev = ticket;
                ticket = self.push_ticket.load(Ordering::Acquire);
                if prev == ticket {
                    return None;
                }
            } else {
                match self.push_ticket.compare_exchange(
                    ticket,
                    ticket + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return Some(ticket),
                    Err(actual) => ticket = actual,
                }
            }
        }
    }

    /// Ticket push yang akan siap begitu semua pop yang sedang berjalan selesai.
    ///
    /// `Err` membawa ticket yang gagal, untuk ditunggu oleh varian `_until`.
    fn try_obtain_promised_push_ticket(&self) -> Result<u64, u64> {
        let mut num_pushes = self.push_ticket.load(Ordering::Acquire);
        loop {
            let num_pops = self.pop_ticket.load(Ordering::Acquire);
            // Negatif jika ada pop yang menunggu
            let n = num_pushes.wrapping_sub(num_pops) as i64;
            if n >= self.capacity as i64 {
                return Err(num_pushes);
            }
            match self.push_ticket.compare_exchange(
                num_pushes,
                num_pushes + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(num_pushes),
                Err(actual) => num_pushes = actual,
            }
        }
    }

    fn try_obtain_promised_push_ticket_until(&self, deadline: Instant) -> Option<u64> {
        loop {
            let ticket = match self.try_obtain_promised_push_ticket() {
                Ok(ticket) => return Some(ticket),
                Err(ticket) => ticket,
            };
            // Ticket belum dipesan: tunggu giliran slot-nya, lalu coba lagi
            let arrived = self.slot(ticket).try_wait_for_enqueue_turn_until(
                self.turn(ticket),
                &self.push_spin_cutoff,
                ticket % ADAPTATION_FREQ == 0,
                deadline,
            );
            if !arrived {
                return None;
            }
        }
    }

    fn try_obtain_ready_pop_ticket(&self) -> Option<u64> {
        let mut ticket = self.pop_ticket.load(Ordering::Acquire);
        loop {
            if !self.slot(ticket).may_dequeue(self.turn(ticket)) {
                let prev = ticket;
                ticket = self.pop_ticket.load(Ordering::Acquire);
                if prev == ticket {
                    return None;
                }
            } else {
                match self.pop_ticket.compare_exchange(
                    ticket,
                    ticket + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return Some(ticket),
                    Err(actual) => ticket = actual,
                }
            }
        }
    }

    /// Ticket pop yang push pasangannya sudah dikeluarkan (mungkin belum selesai).
    fn try_obtain_promised_pop_ticket(&self) -> Option<u64> {
        let mut num_pops = self.pop_ticket.load(Ordering::Acquire);
        loop {
            let num_pushes = self.push_ticket.load(Ordering::Acquire);
            if num_pops >= num_pushes {
                // Kosong, atau kosong dengan pop yang menunggu
                return None;
            }
            match self.pop_ticket.compare_exchange(
                num_pops,
                num_pops + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(num_pops),
                Err(actual) => num_pops = actual,
            }
        }
    }

    /// Ticket pop yang slot-nya sudah terisi, menunggu sampai `deadline`.
    ///
    /// Berbasis kesiapan slot, bukan push counter, sehingga juga bekerja
    /// untuk queue yang diisi lewat `blocking_write_with_ticket`.
    fn try_obtain_ready_pop_ticket_until(&self, deadline: Instant) -> Option<u64> {
        loop {
            let ticket = self.pop_ticket.load(Ordering::Acquire);
            if let Some(ticket) = self.try_obtain_ready_pop_ticket() {
                return Some(ticket);
            }
            // Tunggu enqueue untuk ticket ini selesai, lalu rebut lagi
            let arrived = self.slot(ticket).try_wait_for_dequeue_turn_until(
                self.turn(ticket),
                &self.pop_spin_cutoff,
                ticket % ADAPTATION_FREQ == 0,
                deadline,
            );
            if !arrived {
                return None;
            }
        }
    }
}

impl<T, A: Atom> fmt::Debug for BoundedTicketQueue<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedTicketQueue")
            .field("capacity", &self.capacity)
            .field("stride", &self.stride)
            .field("write_count", &self.write_count())
            .field("read_count", &self.read_count())
            .finish()
    }
}

/// Pilih stride prima kecil yang paling jauh memisahkan ticket berurutan.
///
/// Stride yang membagi (atau dibagi) kapasitas dilewati, karena tidak akan
/// mengunjungi semua slot.
fn compute_stride(capacity: usize) -> usize {
    let mut best_stride = 1;
    let mut best_sep = 1;
    for stride in SMALL_PRIMES {
        if stride % capacity == 0 || capacity % stride == 0 {
            continue;
        }
        let sep = stride % capacity;
        let sep = sep.min(capacity - sep);
        if sep > best_sep {
            best_stride = stride;
            best_sep = sep;
        }
    }
    best_stride
}
