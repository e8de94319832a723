//! Core module: primitive berbasis turn/ticket
//!
//! Prinsip desain:
//! - Lock-Free: counter atomic menggantikan Mutex, jalur tanpa kontensi tidak
//!   pernah masuk ke OS
//! - No-Allocation: semua slot pre-allocated saat init
//! - Blocking hanya lewat futex, setelah spin dan yield habis

mod micro_lock;
mod ring_buffer;
mod turn_sequencer;

pub use micro_lock::{BitLayout, Endian, MicroLock, MicroLockGuard, MicroLockWord, SLOTS_PER_LANE};
pub use ring_buffer::{Cursor, LockFreeRingBuffer, RingBufferSlot};
pub use turn_sequencer::{TryWaitResult, TurnSequencer};
