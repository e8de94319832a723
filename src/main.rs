//! Giliran - stress & benchmark driver
//!
//! Menjalankan setiap primitive di bawah kontensi multi-thread, memverifikasi
//! invariant-nya (tidak ada ticket hilang, urutan pipeline terjaga, lock
//! eksklusif), lalu melaporkan latency dan throughput.
//!
//! Usage:
//!   cargo run --release -- all --threads 8 --ops 2000000
//!   RUST_LOG=debug cargo run --release -- pipeline --amplification 4

use std::cell::UnsafeCell;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use giliran::{BoundedTicketQueue, LockFreeRingBuffer, MicroLockWord, Pipeline, PipelineConfig};

type DriverResult = Result<(), Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(name = "giliran")]
#[command(about = "Stress and benchmark driver for turn-sequenced lock-free primitives")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Jumlah thread worker per peran (writer, reader, stage worker)
    #[arg(long, global = true, default_value_t = 4, value_parser = clap::value_parser!(u64).range(1..))]
    threads: u64,

    /// Total operasi per benchmark
    #[arg(long, global = true, default_value_t = 1_000_000)]
    ops: u64,

    /// Kapasitas ring buffer / queue
    #[arg(long, global = true, default_value_t = 1024, value_parser = clap::value_parser!(u32).range(1..))]
    capacity: u32,

    /// Faktor amplifikasi stage pipeline
    #[arg(long, global = true, default_value_t = 2)]
    amplification: u64,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Multi-writer ring buffer dengan satu reader yang mengikuti head
    Ring,
    /// MPMC bounded ticket queue
    Queue,
    /// Pipeline satu stage dengan amplifikasi
    Pipeline,
    /// Kontensi MicroLock pada satu word
    MicroLock,
    /// Semua benchmark di atas
    All,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        tracing::error!(error = %e, "benchmark failed");
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> DriverResult {
    println!("🚀 Giliran - Turn-Sequenced Lock-Free Primitives");
    println!("================================================\n");

    tracing::info!(
        threads = cli.threads,
        ops = cli.ops,
        capacity = cli.capacity,
        amplification = cli.amplification,
        command = ?cli.command,
        "starting"
    );

    let all = cli.command == Command::All;
    if all || cli.command == Command::Ring {
        benchmark_ring_buffer(cli)?;
    }
    if all || cli.command == Command::Queue {
        benchmark_queue(cli)?;
    }
    if all || cli.command == Command::Pipeline {
        benchmark_pipeline(cli)?;
    }
    if all || cli.command == Command::MicroLock {
        benchmark_micro_lock(cli)?;
    }

    println!("\n✅ All benchmarks complete!");
    Ok(())
}

fn benchmark_ring_buffer(cli: &Cli) -> DriverResult {
    println!("📊 Ring Buffer Benchmark (Multi-Writer, Turn-Sequenced)");
    println!("--------------------------------------------------------");

    let rb: Arc<LockFreeRingBuffer<u64>> = Arc::new(LockFreeRingBuffer::new(cli.capacity));
    let done = Arc::new(AtomicBool::new(false));
    let per_writer = cli.ops / cli.threads;
    let total = per_writer * cli.threads;

    // Reader mengikuti head dan menghitung read sukses vs stale
    let reader = {
        let rb = Arc::clone(&rb);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut cursor = rb.current_tail(0.0);
            let (mut hits, mut misses) = (0u64, 0u64);
            while !done.load(Ordering::Acquire) {
                if cursor >= rb.current_head() {
                    std::hint::spin_loop();
                    continue;
                }
                match rb.try_read(&cursor) {
                    Some(_) => {
                        hits += 1;
                        cursor.move_forward(1);
                    }
                    None => {
                        misses += 1;
                        // Tertinggal: lompat ke jendela yang masih bisa dibaca
                        cursor = rb.current_tail(0.5);
                    }
                }
            }
            (hits, misses)
        })
    };

    let start = Instant::now();
    let writers: Vec<_> = (0..cli.threads)
        .map(|w| {
            let rb = Arc::clone(&rb);
            thread::spawn(move || {
                for i in 0..per_writer {
                    rb.write(w * per_writer + i);
                }
            })
        })
        .collect();
    for w in writers {
        w.join().map_err(|_| "ring writer panicked")?;
    }
    let write_duration = start.elapsed();

    done.store(true, Ordering::Release);
    let (hits, misses) = reader.join().map_err(|_| "ring reader panicked")?;

    let head = rb.current_head().ticket();
    if head != total {
        return Err(format!("ring head is {head}, expected {total} writes").into());
    }

    print_latency("Write", total, write_duration);
    println!("  Reader hits:  {} (stale skips: {})\n", hits, misses);
    Ok(())
}

fn benchmark_queue(cli: &Cli) -> DriverResult {
    println!("📊 Bounded Ticket Queue Benchmark (MPMC)");
    println!("----------------------------------------");

    let q: Arc<BoundedTicketQueue<u64>> =
        Arc::new(BoundedTicketQueue::new(cli.capacity as usize));
    let per_thread = cli.ops / cli.threads;
    let total = per_thread * cli.threads;

    let start = Instant::now();
    let producers: Vec<_> = (0..cli.threads)
        .map(|p| {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..per_thread {
                    q.blocking_write(p * per_thread + i);
                }
            })
        })
        .collect();
    let consumers: Vec<_> = (0..cli.threads)
        .map(|_| {
            let q = Arc::clone(&q);
            thread::spawn(move || (0..per_thread).map(|_| q.blocking_read()).sum::<u64>())
        })
        .collect();

    for p in producers {
        p.join().map_err(|_| "queue producer panicked")?;
    }
    let mut sum = 0u64;
    for c in consumers {
        sum += c.join().map_err(|_| "queue consumer panicked")?;
    }
    let duration = start.elapsed();

    let expected = total.saturating_sub(1) * total / 2;
    if sum != expected {
        return Err(format!("queue sum is {sum}, expected {expected}").into());
    }

    print_latency("Transfer", total, duration);
    println!();
    Ok(())
}

fn benchmark_pipeline(cli: &Cli) -> DriverResult {
    println!("📊 Pipeline Benchmark (1 stage, amplification {})", cli.amplification);
    println!("------------------------------------------------");

    let capacity = cli.capacity as usize;
    let config = PipelineConfig::new(capacity).stage(capacity, cli.amplification);
    let pipeline: Arc<Pipeline<u64>> = Arc::new(Pipeline::new(&config)?);
    let k = pipeline.amplification(0);
    let inputs = cli.ops / k.max(1);

    let start = Instant::now();
    let producer = {
        let pipeline = Arc::clone(&pipeline);
        thread::spawn(move || {
            for i in 0..inputs {
                pipeline.blocking_write(i);
            }
        })
    };

    let workers: Vec<_> = (0..cli.threads)
        .map(|w| {
            let pipeline = Arc::clone(&pipeline);
            let share = inputs / cli.threads + u64::from(w < inputs % cli.threads);
            thread::spawn(move || {
                for _ in 0..share {
                    let (mut ticket, value) = pipeline.blocking_read_stage(0);
                    for j in 0..k {
                        pipeline.blocking_write_stage(&mut ticket, value * k + j);
                    }
                }
            })
        })
        .collect();

    // Output harus keluar dalam urutan input walau worker selesai acak
    let mut out_of_order = 0u64;
    for expected in 0..inputs * k {
        if pipeline.blocking_read() != expected {
            out_of_order += 1;
        }
    }
    let duration = start.elapsed();

    producer.join().map_err(|_| "pipeline producer panicked")?;
    for w in workers {
        w.join().map_err(|_| "pipeline worker panicked")?;
    }

    if out_of_order != 0 {
        return Err(format!("{out_of_order} pipeline outputs out of order").into());
    }
    if pipeline.size_guess() != 0 {
        return Err(format!("pipeline size guess is {}", pipeline.size_guess()).into());
    }

    print_latency("Output", inputs * k, duration);
    println!();
    Ok(())
}

/// Counter per slot, dilindungi MicroLock slot yang sama
struct LockedCounters {
    word: MicroLockWord,
    counters: [UnsafeCell<u64>; 4],
}

// SAFETY: counter[i] hanya diakses saat memegang slot i
unsafe impl Sync for LockedCounters {}

fn benchmark_micro_lock(cli: &Cli) -> DriverResult {
    println!("📊 MicroLock Benchmark (4 slots, 1 word)");
    println!("----------------------------------------");

    let shared = Arc::new(LockedCounters {
        word: MicroLockWord::new(),
        counters: Default::default(),
    });
    let per_thread = cli.ops / cli.threads;

    let start = Instant::now();
    let handles: Vec<_> = (0..cli.threads)
        .map(|t| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                let slot = (t % 4) as u32;
                let lock = shared.word.lock_at(0);
                for _ in 0..per_thread {
                    let _guard = lock.guard(slot);
                    // SAFETY: slot dipegang
                    unsafe { *shared.counters[slot as usize].get() += 1 };
                }
            })
        })
        .collect();
    for h in handles {
        h.join().map_err(|_| "micro lock worker panicked")?;
    }
    let duration = start.elapsed();

    for slot in 0..4u64 {
        let holders = (0..cli.threads).filter(|t| t % 4 == slot).count() as u64;
        // SAFETY: semua worker sudah di-join
        let count = unsafe { *shared.counters[slot as usize].get() };
        if count != holders * per_thread {
            return Err(format!(
                "slot {slot} counted {count}, expected {}",
                holders * per_thread
            )
            .into());
        }
    }
    if shared.word.load() != 0 {
        return Err(format!("lock word not clean: {:#x}", shared.word.load()).into());
    }

    print_latency("Lock+unlock", per_thread * cli.threads, duration);
    println!();
    Ok(())
}

fn print_latency(label: &str, ops: u64, duration: Duration) {
    let ns = duration.as_nanos() as f64 / ops.max(1) as f64;
    println!("  Operations: {}", ops);
    println!("  {} latency: {:.2} ns/op ({:.3} μs/op)", label, ns, ns / 1000.0);
    println!(
        "  Throughput:   {:.2} M ops/sec",
        ops as f64 / duration.as_secs_f64() / 1_000_000.0
    );
}

