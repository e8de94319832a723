//! Konfigurasi: spin policy dan layout pipeline

use crate::error::ConfigError;

/// Tangga spin untuk [`MicroLock`](crate::core::MicroLock).
///
/// Setelah `max_spins` pause dan `max_yields` yield, lock tidur di futex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinPolicy {
    pub max_spins: u32,
    pub max_yields: u32,
}

impl Default for SpinPolicy {
    fn default() -> Self {
        Self {
            max_spins: 1024,
            max_yields: 0,
        }
    }
}

impl SpinPolicy {
    /// Langsung tidur di futex begitu lock terlihat dipegang
    pub const fn no_spin() -> Self {
        Self {
            max_spins: 0,
            max_yields: 0,
        }
    }
}

/// Satu stage pipeline: faktor amplifikasi dan kapasitas queue output-nya.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageConfig {
    /// Jumlah output yang wajib dihasilkan per input
    pub amplification: u64,
    /// Kapasitas queue yang menerima output stage ini
    pub capacity: usize,
}

/// Layout pipeline: queue input + satu queue output per stage.
///
/// Queue `0` adalah input, queue `i + 1` adalah output stage `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub input_capacity: usize,
    pub stages: Vec<StageConfig>,
}

impl PipelineConfig {
    pub fn new(input_capacity: usize) -> Self {
        Self {
            input_capacity,
            stages: Vec::new(),
        }
    }

    /// Tambah stage di ujung pipeline
    pub fn stage(mut self, capacity: usize, amplification: u64) -> Self {
        self.stages.push(StageConfig {
            amplification,
            capacity,
        });
        self
    }

    /// Kapasitas semua queue, urut dari input ke output akhir
    pub fn queue_capacities(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::once(self.input_capacity).chain(self.stages.iter().map(|s| s.capacity))
    }

    /// Hasil kali semua faktor amplifikasi (1 untuk pipeline tanpa stage).
    pub fn total_amplification(&self) -> Result<u64, ConfigError> {
        self.stages
            .iter()
            .enumerate()
            .try_fold(1u64, |acc, (stage, cfg)| {
                acc.checked_mul(cfg.amplification)
                    .ok_or(ConfigError::AmplificationOverflow { stage })
            })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(queue) = self.queue_capacities().position(|cap| cap == 0) {
            return Err(ConfigError::ZeroCapacity { queue });
        }

        if let Some(stage) = self.stages.iter().position(|s| s.amplification == 0) {
            return Err(ConfigError::ZeroAmplification { stage });
        }

        self.total_amplification()?;
        Ok(())
    }
}
