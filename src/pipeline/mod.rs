//! Pipeline: rangkaian queue bertiket dengan amplifikasi output per stage
//!
//! N stage menghubungkan N+1 [`BoundedTicketQueue`]. Worker stage `s`
//! membaca dari queue `s` lewat [`Pipeline::blocking_read_stage`] dan
//! mendapat [`Ticket`] yang menunjuk posisi outputnya di queue `s + 1`.
//! Karena posisi sudah dipesan saat baca, output keluar dari pipeline dalam
//! urutan input walaupun worker selesai tidak berurutan.
//!
//! Setiap stage WAJIB menghasilkan tepat K output per input (K = faktor
//! amplifikasi stage). Kurang dari K membuat posisi downstream kosong dan
//! queue berikutnya macet selamanya; pipeline tidak bisa memulihkan ini.

mod ticket;

pub use ticket::Ticket;

use std::fmt;
use std::time::Instant;

use crate::config::PipelineConfig;
use crate::error::{ConfigError, QueueFull};
use crate::queue::BoundedTicketQueue;
use crate::sync::{Atom, StdAtom};

/// Pipeline N stage dengan elemen bertipe sama di setiap queue.
///
/// Payload yang berbeda per stage bisa dimodelkan dengan enum.
pub struct Pipeline<T, A: Atom = StdAtom> {
    queues: Vec<BoundedTicketQueue<T, A>>,
    amplifications: Vec<u64>,
    total_amplification: u64,
}

impl<T, A: Atom> Pipeline<T, A> {
    pub fn new(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let total_amplification = config.total_amplification()?;

        let queues = config
            .queue_capacities()
            .map(BoundedTicketQueue::new)
            .collect();
        let amplifications = config.stages.iter().map(|s| s.amplification).collect();

        tracing::debug!(
            stages = config.stages.len(),
            total_amplification,
            "pipeline created"
        );

        Ok(Self {
            queues,
            amplifications,
            total_amplification,
        })
    }

    /// Jumlah stage (jumlah queue dikurangi satu)
    #[inline]
    pub fn stages(&self) -> usize {
        self.amplifications.len()
    }

    #[inline]
    pub fn amplification(&self, stage: usize) -> u64 {
        self.check_stage(stage);
        self.amplifications[stage]
    }

    #[inline]
    pub fn total_amplification(&self) -> u64 {
        self.total_amplification
    }

    /// Enqueue input ke queue 0, blok sampai ada tempat.
    pub fn blocking_write(&self, value: T) {
        self.input().blocking_write(value);
    }

    /// Enqueue input ke queue 0 tanpa menunggu.
    pub fn write(&self, value: T) -> Result<(), QueueFull<T>> {
        self.input().write(value)
    }

    /// Baca input stage `stage`, blok sampai ada.
    ///
    /// # Panics
    /// Panic jika `stage >= stages()`
    pub fn blocking_read_stage(&self, stage: usize) -> (Ticket, T) {
        self.check_stage(stage);
        let (queue_ticket, value) = self.queues[stage].blocking_read_with_ticket();
        (self.make_ticket(stage, queue_ticket), value)
    }

    /// Seperti [`blocking_read_stage`](Self::blocking_read_stage), tanpa menunggu.
    pub fn read_stage(&self, stage: usize) -> Option<(Ticket, T)> {
        self.check_stage(stage);
        let (queue_ticket, value) = self.queues[stage].read_and_get_ticket()?;
        Some((self.make_ticket(stage, queue_ticket), value))
    }

    /// Tulis satu output stage ke posisi berikutnya milik `ticket`.
    ///
    /// Bisa blok jika queue downstream penuh sampai posisi tersebut.
    pub fn blocking_write_stage(&self, ticket: &mut Ticket, value: T) {
        let stage = ticket.stage();
        self.check_stage(stage);
        let position = ticket.use_once();
        self.queues[stage + 1].blocking_write_with_ticket(position, value);
    }

    /// Dequeue output akhir, blok sampai ada.
    pub fn blocking_read(&self) -> T {
        self.output().blocking_read()
    }

    pub fn read(&self) -> Option<T> {
        self.output().read()
    }

    pub fn try_read_until(&self, deadline: Instant) -> Option<T> {
        self.output().try_read_until(deadline)
    }

    /// Perkiraan elemen yang sedang diproses atau menunggu dibaca, dalam
    /// satuan output akhir. Tidak presisi saat ada writer yang sedang berjalan.
    pub fn size_guess(&self) -> i64 {
        let written = self
            .input()
            .write_count()
            .wrapping_mul(self.total_amplification);
        written.wrapping_sub(self.output().read_count()) as i64
    }

    #[inline]
    fn input(&self) -> &BoundedTicketQueue<T, A> {
        &self.queues[0]
    }

    #[inline]
    fn output(&self) -> &BoundedTicketQueue<T, A> {
        &self.queues[self.queues.len() - 1]
    }

    fn make_ticket(&self, stage: usize, queue_ticket: u64) -> Ticket {
        let k = self.amplifications[stage];
        Ticket::new(stage, queue_ticket.wrapping_mul(k), k)
    }

    fn check_stage(&self, stage: usize) {
        if stage >= self.stages() {
            tracing::error!(stage, stages = self.stages(), "pipeline stage out of range");
            panic!(
                "pipeline stage {stage} out of range ({} stages)",
                self.stages()
            );
        }
    }
}

impl<T, A: Atom> fmt::Debug for Pipeline<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("amplifications", &self.amplifications)
            .field("size_guess", &self.size_guess())
            .finish()
    }
}
