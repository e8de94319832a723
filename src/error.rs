//! Error types
//!
//! Pelanggaran kontrak (ticket dipakai salah, stage di luar range, kapasitas
//! nol) adalah `panic!`, bukan error. Yang ada di sini hanya kegagalan yang
//! memang bisa dipulihkan pemanggil.

use std::fmt;

use thiserror::Error;

/// Konfigurasi pipeline/queue tidak valid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("queue capacity must be positive (queue {queue})")]
    ZeroCapacity { queue: usize },

    #[error("amplification factor must be positive (stage {stage})")]
    ZeroAmplification { stage: usize },

    #[error("total amplification overflows u64 at stage {stage}")]
    AmplificationOverflow { stage: usize },
}

/// Queue penuh; nilai dikembalikan ke pemanggil.
#[derive(Clone, Copy, PartialEq, Eq, Error)]
#[error("queue is full")]
pub struct QueueFull<T>(pub T);

impl<T> QueueFull<T> {
    /// Ambil kembali nilai yang gagal ditulis
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueFull").finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_full_returns_value() {
        let err = QueueFull(String::from("payload"));
        assert_eq!(err.to_string(), "queue is full");
        assert_eq!(err.into_inner(), "payload");
    }

    #[test]
    fn test_queue_full_is_error_without_debug_payload() {
        struct Opaque;
        let err: Box<dyn std::error::Error> = Box::new(QueueFull(Opaque));
        assert_eq!(err.to_string(), "queue is full");
        assert!(err.source().is_none());
        assert_eq!(format!("{:?}", QueueFull(Opaque)), "QueueFull { .. }");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::ZeroAmplification { stage: 2 };
        assert_eq!(
            err.to_string(),
            "amplification factor must be positive (stage 2)"
        );
    }
}
