//! Giliran - Turn-Sequenced Lock-Free Primitives
//!
//! Arsitektur:
//! - `sync`: abstraksi atomic + futex, bisa diganti test double
//! - `core`: TurnSequencer, LockFreeRingBuffer, MicroLock
//! - `queue`: BoundedTicketQueue (MPMC bounded, ticketed)
//! - `pipeline`: rangkaian queue dengan amplifikasi output per stage
//!
//! Semua primitive memakai satu ide: counter turn/ticket atomic menggantikan
//! mutex, sehingga jalur tanpa kontensi selesai tanpa masuk ke OS.
//!
//! Pelanggaran kontrak (kapasitas nol, ticket salah pakai, slot/stage di luar
//! range) adalah `panic!`. Kegagalan yang wajar (stale read, queue penuh)
//! dikembalikan lewat `Option`/`Result`.

pub mod config;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod sync;

pub use crate::config::{PipelineConfig, SpinPolicy, StageConfig};
pub use crate::core::{
    BitLayout, Cursor, Endian, LockFreeRingBuffer, MicroLock, MicroLockGuard, MicroLockWord,
    TryWaitResult, TurnSequencer,
};
pub use crate::error::{ConfigError, QueueFull};
pub use crate::pipeline::{Pipeline, Ticket};
pub use crate::queue::BoundedTicketQueue;
pub use crate::sync::{Atom, SimAtom, StdAtom};
