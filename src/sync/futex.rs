//! Futex: blocking pada nilai sebuah word 32-bit
//!
//! - Linux/Android: syscall `futex` langsung (FUTEX_WAIT_BITSET / FUTEX_WAKE_BITSET)
//! - Platform lain: emulasi dengan tabel bucket + park/unpark thread
//!
//! Deadline selalu absolut (`Instant`). Di Linux deadline dikonversi ke
//! CLOCK_MONOTONIC absolut, sama dengan clock yang dipakai `Instant`.

use std::sync::atomic::AtomicU32;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
use std::sync::atomic::Ordering;
use std::time::Instant;

/// Hasil dari `futex_wait`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutexResult {
    /// Dibangunkan oleh wake (atau spurious wakeup)
    Awoken,
    /// Nilai word sudah berbeda dari `expected` saat akan tidur
    ValueChanged,
    /// Deadline terlewati
    TimedOut,
    /// Diinterupsi signal
    Interrupted,
}

/// Tidur selama `word == expected`, sampai dibangunkan lewat channel `wait_mask`.
///
/// # Panics
/// Panic jika `wait_mask == 0` (kernel akan menolak dengan EINVAL).
#[inline]
pub fn wait(
    word: &AtomicU32,
    expected: u32,
    wait_mask: u32,
    deadline: Option<Instant>,
) -> FutexResult {
    assert!(wait_mask != 0, "futex wait mask must not be empty");
    imp::wait(word, expected, wait_mask, deadline)
}

/// Bangunkan maksimal `count` waiter pada `word` yang mask-nya beririsan dengan `wake_mask`.
///
/// Returns jumlah waiter yang dibangunkan.
#[inline]
pub fn wake(word: &AtomicU32, count: u32, wake_mask: u32) -> usize {
    assert!(wake_mask != 0, "futex wake mask must not be empty");
    imp::wake(word, count, wake_mask)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod imp {
    use super::FutexResult;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;
    use std::{io, ptr};

    pub(super) fn wait(
        word: &AtomicU32,
        expected: u32,
        wait_mask: u32,
        deadline: Option<Instant>,
    ) -> FutexResult {
        let timeout = match deadline {
            Some(deadline) => match abs_monotonic(deadline) {
                Some(ts) => Some(ts),
                None => return FutexResult::TimedOut,
            },
            None => None,
        };
        let timeout_ptr = timeout
            .as_ref()
            .map_or(ptr::null(), |ts| ts as *const libc::timespec);

        // SAFETY: word adalah AtomicU32 valid selama syscall berlangsung,
        // kernel hanya membandingkan nilainya dan memakai alamatnya sebagai key
        let ret = unsafe {
            libc::syscall(
                libc::SYS_futex,
                word as *const AtomicU32 as *const u32,
                libc::FUTEX_WAIT_BITSET | libc::FUTEX_PRIVATE_FLAG,
                expected,
                timeout_ptr,
                ptr::null::<u32>(),
                wait_mask,
            )
        };

        if ret == 0 {
            return FutexResult::Awoken;
        }

        match io::Error::last_os_error().raw_os_error() {
            Some(libc::ETIMEDOUT) => FutexResult::TimedOut,
            Some(libc::EINTR) => FutexResult::Interrupted,
            // EAGAIN: nilai sudah berubah sebelum kita sempat tidur
            _ => FutexResult::ValueChanged,
        }
    }

    pub(super) fn wake(word: &AtomicU32, count: u32, wake_mask: u32) -> usize {
        let count = count.min(i32::MAX as u32) as libc::c_int;

        // SAFETY: sama seperti wait, alamat word hanya dipakai sebagai key
        let ret = unsafe {
            libc::syscall(
                libc::SYS_futex,
                word as *const AtomicU32 as *const u32,
                libc::FUTEX_WAKE_BITSET | libc::FUTEX_PRIVATE_FLAG,
                count,
                ptr::null::<libc::timespec>(),
                ptr::null::<u32>(),
                wake_mask,
            )
        };

        if ret < 0 {
            0
        } else {
            ret as usize
        }
    }

    /// Konversi deadline ke CLOCK_MONOTONIC absolut.
    ///
    /// Returns `None` jika deadline sudah lewat.
    fn abs_monotonic(deadline: Instant) -> Option<libc::timespec> {
        let remaining = deadline.checked_duration_since(Instant::now())?;
        if remaining.is_zero() {
            return None;
        }

        // SAFETY: timespec adalah POD, semua-nol adalah nilai valid
        let mut now: libc::timespec = unsafe { std::mem::zeroed() };
        // SAFETY: pointer ke timespec lokal yang valid
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now) };
        debug_assert_eq!(rc, 0);

        let secs = libc::time_t::try_from(remaining.as_secs()).unwrap_or(libc::time_t::MAX);
        let mut tv_sec = now.tv_sec.saturating_add(secs);
        let mut tv_nsec = now.tv_nsec + remaining.subsec_nanos() as libc::c_long;
        if tv_nsec >= 1_000_000_000 {
            tv_sec = tv_sec.saturating_add(1);
            tv_nsec -= 1_000_000_000;
        }

        let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
        ts.tv_sec = tv_sec;
        ts.tv_nsec = tv_nsec;
        Some(ts)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
mod imp {
    use super::{emulated, FutexResult, Ordering};
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    pub(super) fn wait(
        word: &AtomicU32,
        expected: u32,
        wait_mask: u32,
        deadline: Option<Instant>,
    ) -> FutexResult {
        let addr = word as *const AtomicU32 as usize;
        emulated::wait(addr, || word.load(Ordering::SeqCst), expected, wait_mask, deadline)
    }

    pub(super) fn wake(word: &AtomicU32, count: u32, wake_mask: u32) -> usize {
        emulated::wake(word as *const AtomicU32 as usize, count, wake_mask)
    }
}

/// Futex emulasi: tabel bucket ber-hash alamat, tiap bucket berisi antrian waiter.
///
/// Pengecekan nilai dilakukan di bawah lock bucket, sehingga wake yang
/// terjadi setelah nilai berubah tidak mungkin hilang.
pub mod emulated {
    use super::FutexResult;
    use parking_lot::{const_mutex, Mutex};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread::{self, Thread};
    use std::time::Instant;

    const BUCKET_BITS: u32 = 6;
    const BUCKET_COUNT: usize = 1 << BUCKET_BITS;

    struct Waiter {
        addr: usize,
        mask: u32,
        thread: Thread,
        woken: AtomicBool,
    }

    struct Bucket {
        waiters: Mutex<Vec<Arc<Waiter>>>,
    }

    #[allow(clippy::declare_interior_mutable_const)]
    const EMPTY_BUCKET: Bucket = Bucket {
        waiters: const_mutex(Vec::new()),
    };

    static BUCKETS: [Bucket; BUCKET_COUNT] = [EMPTY_BUCKET; BUCKET_COUNT];

    #[inline(always)]
    fn bucket_for(addr: usize) -> &'static Bucket {
        // Fibonacci hashing, ambil bit teratas
        let hash = (addr as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) >> (64 - BUCKET_BITS);
        &BUCKETS[hash as usize]
    }

    /// Tidur selama `load() == expected`.
    ///
    /// `addr` adalah key antrian; `load` dipanggil di bawah lock bucket.
    pub fn wait(
        addr: usize,
        load: impl FnOnce() -> u32,
        expected: u32,
        wait_mask: u32,
        deadline: Option<Instant>,
    ) -> FutexResult {
        let bucket = bucket_for(addr);
        let waiter = Arc::new(Waiter {
            addr,
            mask: wait_mask,
            thread: thread::current(),
            woken: AtomicBool::new(false),
        });

        {
            let mut waiters = bucket.waiters.lock();
            if load() != expected {
                return FutexResult::ValueChanged;
            }
            waiters.push(Arc::clone(&waiter));
        }

        loop {
            if waiter.woken.load(Ordering::Acquire) {
                return FutexResult::Awoken;
            }

            match deadline {
                None => thread::park(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let mut waiters = bucket.waiters.lock();
                        if let Some(pos) = waiters.iter().position(|w| Arc::ptr_eq(w, &waiter)) {
                            waiters.swap_remove(pos);
                            return FutexResult::TimedOut;
                        }
                        // Waker sudah mengeluarkan kita dari antrian (woken diset di bawah lock)
                        return FutexResult::Awoken;
                    }
                    thread::park_timeout(deadline - now);
                }
            }
        }
    }

    /// Bangunkan maksimal `count` waiter pada `addr` dengan mask beririsan.
    pub fn wake(addr: usize, count: u32, wake_mask: u32) -> usize {
        let bucket = bucket_for(addr);
        let mut woken = Vec::new();

        {
            let mut waiters = bucket.waiters.lock();
            let mut i = 0;
            while i < waiters.len() && woken.len() < count as usize {
                let w = &waiters[i];
                if w.addr == addr && (w.mask & wake_mask) != 0 {
                    let w = waiters.remove(i);
                    w.woken.store(true, Ordering::Release);
                    woken.push(w);
                } else {
                    i += 1;
                }
            }
        }

        for w in &woken {
            w.thread.unpark();
        }
        woken.len()
    }
}
