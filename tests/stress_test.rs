//! Stress Test - Multi-Writer Ring Buffer & MPMC Queue
//!
//! Banyak thread menulis bersamaan; setelah semua selesai, jumlah ticket
//! harus tepat sama dengan jumlah write (tidak ada yang hilang/dobel).
//! Versi `SimAtom` menyuntikkan pause/yield acak di setiap operasi atomic.
//!
//! Usage:
//!   cargo test --release --test stress_test -- --nocapture

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use giliran::sync::Atom;
use giliran::{BoundedTicketQueue, LockFreeRingBuffer, SimAtom, StdAtom};

const WRITERS: u64 = 8;

fn hammer_ring<A: Atom>(capacity: u32, per_writer: u64) {
    let rb: Arc<LockFreeRingBuffer<u64, A>> = Arc::new(LockFreeRingBuffer::new(capacity));

    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let rb = Arc::clone(&rb);
            thread::spawn(move || {
                for i in 0..per_writer {
                    rb.write((w << 32) | i);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let total = WRITERS * per_writer;
    assert_eq!(
        rb.current_head().ticket(),
        total,
        "capacity {capacity}: lost or duplicated tickets"
    );

    // Jendela terakhir berisi nilai unik yang benar-benar ditulis
    let mut cursor = rb.current_tail(0.0);
    let mut seen = HashSet::new();
    while cursor < rb.current_head() {
        let value = rb
            .try_read(&cursor)
            .expect("latest window must be readable once writers are done");
        assert!(value >> 32 < WRITERS);
        assert!(value & 0xFFFF_FFFF < per_writer);
        assert!(seen.insert(value), "value {value:#x} served twice");
        cursor.move_forward(1);
    }
    assert_eq!(seen.len() as u64, u64::from(capacity).min(total));
}

#[test]
fn test_ring_head_counts_every_write() {
    for capacity in [1, 10, 100, 1000] {
        hammer_ring::<StdAtom>(capacity, 5_000);
    }
}

#[test]
fn test_ring_head_counts_every_write_simulated() {
    SimAtom::set_seed(0xC0FFEE);
    for capacity in [1, 10, 100, 1000] {
        hammer_ring::<SimAtom>(capacity, 500);
    }
}

#[test]
fn test_ring_stale_reader_never_served_old_data() {
    let rb: Arc<LockFreeRingBuffer<u64>> = Arc::new(LockFreeRingBuffer::new(16));
    let done = Arc::new(AtomicBool::new(false));

    // Writer menulis ticket-nya sendiri sebagai nilai, jadi setiap read yang
    // sukses harus mengembalikan tepat ticket cursor
    let writer = {
        let rb = Arc::clone(&rb);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                let ticket = rb.current_head().ticket();
                // Satu writer: ticket berikutnya pasti `ticket`
                let cursor = rb.write_and_get_cursor(ticket);
                assert_eq!(cursor.ticket(), ticket);
            }
        })
    };

    let deadline = Instant::now() + Duration::from_millis(300);
    let mut stale = 0u64;
    let mut served = 0u64;
    while Instant::now() < deadline {
        let mut cursor = rb.current_head();
        if cursor.ticket() < 64 {
            continue;
        }
        cursor.move_backward(64);
        // Cursor tertinggal > capacity: selalu stale
        match rb.try_read(&cursor) {
            Some(value) => {
                assert_eq!(value, cursor.ticket());
                served += 1;
            }
            None => stale += 1,
        }

        let recent = rb.current_tail(1.0);
        if let Some(value) = rb.try_read(&recent) {
            assert_eq!(value, recent.ticket());
        }
    }

    done.store(true, Ordering::Release);
    writer.join().unwrap();
    assert!(stale > 0);
    assert_eq!(served, 0, "reader more than capacity behind was served data");
}

#[test]
fn test_ring_reader_behind_full_turn_wrap_is_stale() {
    // Capacity 1: satu putaran turn per write, jadi 2^25 write memutar
    // sequencer slot kembali ke state yang sama dengan write pertama
    let rb: LockFreeRingBuffer<u64> = LockFreeRingBuffer::new(1);
    let first = rb.write_and_get_cursor(0);
    for i in 1..=(1u64 << 25) {
        rb.write(i);
    }

    assert_eq!(rb.current_head().ticket(), (1 << 25) + 1);
    assert_eq!(rb.try_read(&first), None);
    let deadline = Instant::now() + Duration::from_millis(10);
    assert_eq!(rb.wait_and_try_read_until(&first, deadline), None);
    assert_eq!(rb.try_read(&rb.current_tail(1.0)), Some(1 << 25));
}

fn hammer_queue<A: Atom>(capacity: usize, per_producer: u64) {
    let q: Arc<BoundedTicketQueue<u64, A>> = Arc::new(BoundedTicketQueue::new(capacity));
    let producers = 4u64;
    let consumers = 4u64;

    let writers: Vec<_> = (0..producers)
        .map(|p| {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..per_producer {
                    let value = p * per_producer + i;
                    match i % 3 {
                        0 => q.blocking_write(value),
                        1 => {
                            let deadline = Instant::now() + Duration::from_secs(30);
                            q.try_write_until(value, deadline).unwrap();
                        }
                        _ => {
                            let mut value = value;
                            while let Err(full) = q.write(value) {
                                value = full.into_inner();
                                thread::yield_now();
                            }
                        }
                    }
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..consumers)
        .map(|c| {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                let mut sum = 0u64;
                for i in 0..(producers * per_producer / consumers) {
                    sum += if (i + c) % 2 == 0 {
                        q.blocking_read()
                    } else {
                        loop {
                            if let Some(v) = q.read() {
                                break v;
                            }
                            thread::yield_now();
                        }
                    };
                }
                sum
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }
    let total: u64 = readers.into_iter().map(|r| r.join().unwrap()).sum();

    let n = producers * per_producer;
    assert_eq!(total, n * (n - 1) / 2, "capacity {capacity}");
    assert_eq!(q.write_count(), n);
    assert_eq!(q.read_count(), n);
    assert!(q.is_empty());
}

#[test]
fn test_queue_sum_conservation() {
    for capacity in [1, 10, 100, 1000] {
        hammer_queue::<StdAtom>(capacity, 3_000);
    }
}

#[test]
fn test_queue_sum_conservation_simulated() {
    SimAtom::set_seed(42);
    for capacity in [1, 10, 100] {
        hammer_queue::<SimAtom>(capacity, 300);
    }
}
