//! Ticket posisi output untuk satu input stage

use std::fmt;
use std::thread;

/// Posisi yang harus diisi output sebuah stage di queue berikutnya.
///
/// Dibuat oleh [`Pipeline::blocking_read_stage`](super::Pipeline::blocking_read_stage)
/// dengan `remaining_uses = K` (amplifikasi stage) dan posisi awal
/// `queue_ticket * K`. Setiap
/// [`Pipeline::blocking_write_stage`](super::Pipeline::blocking_write_stage)
/// memakai satu posisi.
///
/// # Panics
/// Drop dengan `remaining_uses != 0` adalah pelanggaran kontrak: posisi yang
/// tidak terisi akan membuat queue downstream macet selamanya.
#[must_use = "ticket wajib dipakai tepat K kali"]
pub struct Ticket {
    stage: usize,
    value: u64,
    remaining_uses: u64,
}

impl Ticket {
    pub(crate) fn new(stage: usize, value: u64, remaining_uses: u64) -> Self {
        Self {
            stage,
            value,
            remaining_uses,
        }
    }

    /// Stage yang membaca input ticket ini
    #[inline]
    pub fn stage(&self) -> usize {
        self.stage
    }

    #[inline]
    pub fn remaining_uses(&self) -> u64 {
        self.remaining_uses
    }

    /// Ambil posisi berikutnya: `value, value + 1, ..., value + K - 1`.
    pub(crate) fn use_once(&mut self) -> u64 {
        if self.remaining_uses == 0 {
            tracing::error!(stage = self.stage, "pipeline ticket used more times than its amplification");
            panic!("pipeline ticket for stage {} used too many times", self.stage);
        }
        self.remaining_uses -= 1;
        let position = self.value;
        self.value += 1;
        position
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("stage", &self.stage)
            .field("next_position", &self.value)
            .field("remaining_uses", &self.remaining_uses)
            .finish()
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        // Panic kedua saat unwinding akan abort tanpa pesan yang berguna
        if self.remaining_uses != 0 && !thread::panicking() {
            tracing::error!(
                stage = self.stage,
                remaining_uses = self.remaining_uses,
                "pipeline ticket dropped before producing all outputs"
            );
            panic!(
                "pipeline ticket for stage {} dropped with {} unused outputs",
                self.stage, self.remaining_uses
            );
        }
    }
}
