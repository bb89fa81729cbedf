//! Shared-memory result block for the fork backend.
//!
//! [`SharedRegion`] is an anonymous `MAP_SHARED` mapping: after `fork` the
//! parent and every child address the same physical pages, so writes made by a
//! child are visible to the parent. [`SharedAccumulator`] places the letter
//! counts and the sum in such a region next to a pthread mutex configured
//! `PTHREAD_PROCESS_SHARED`. The mutex is only valid while the region is
//! mapped; the accumulator owns both and tears them down together.

use std::io;
use std::mem::{self, MaybeUninit};
use std::ptr::{self, NonNull};

use crate::accumulator::AggregateResult;
use crate::error::StatError;
use crate::shared_types::{LetterCounts, LETTER_COUNT};
use crate::slice::PartialResult;

/// A `T` living in an anonymous shared mapping that survives `fork`.
pub(crate) struct SharedRegion<T: Copy> {
    ptr: NonNull<T>,
}

impl<T: Copy> SharedRegion<T> {
    pub(crate) fn new(value: T) -> io::Result<Self> {
        let len = mem::size_of::<T>();
        // SAFETY: fresh anonymous mapping, no existing memory is touched.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(addr.cast::<T>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
        // SAFETY: the mapping is page aligned and at least size_of::<T>() long.
        unsafe { ptr.as_ptr().write(value) };
        Ok(Self { ptr })
    }

    pub(crate) fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }
}

impl<T: Copy> Drop for SharedRegion<T> {
    fn drop(&mut self) {
        // SAFETY: ptr/len are exactly what mmap returned in `new`.
        let rc = unsafe { libc::munmap(self.ptr.as_ptr().cast(), mem::size_of::<T>()) };
        if rc != 0 {
            warn!("munmap of shared region failed: {}", io::Error::last_os_error());
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
struct SharedBlock {
    mutex: libc::pthread_mutex_t,
    counts: LetterCounts,
    sum: f64,
    merged_units: u64,
}

/// Cross-process accumulator. Build it before forking, hand `&self` to every
/// child, and read it back with [`SharedAccumulator::into_result`] once all
/// children have been reaped.
pub(crate) struct SharedAccumulator {
    region: SharedRegion<SharedBlock>,
}

fn check(call: &'static str, rc: libc::c_int) -> Result<(), StatError> {
    if rc == 0 {
        Ok(())
    } else {
        Err(StatError::LockSetup { call, errno: rc })
    }
}

#[cfg(target_os = "linux")]
fn make_robust(attr: *mut libc::pthread_mutexattr_t) -> Result<(), StatError> {
    // SAFETY: attr was initialised by pthread_mutexattr_init.
    check("pthread_mutexattr_setrobust", unsafe {
        libc::pthread_mutexattr_setrobust(attr, libc::PTHREAD_MUTEX_ROBUST)
    })
}

#[cfg(not(target_os = "linux"))]
fn make_robust(_attr: *mut libc::pthread_mutexattr_t) -> Result<(), StatError> {
    Ok(())
}

#[cfg(target_os = "linux")]
fn owner_died(rc: libc::c_int) -> bool {
    rc == libc::EOWNERDEAD
}

#[cfg(not(target_os = "linux"))]
fn owner_died(_rc: libc::c_int) -> bool {
    false
}

impl SharedAccumulator {
    pub(crate) fn new() -> Result<Self, StatError> {
        let region = SharedRegion::new(SharedBlock {
            mutex: libc::PTHREAD_MUTEX_INITIALIZER,
            counts: [0; LETTER_COUNT],
            sum: 0.0,
            merged_units: 0,
        })
        .map_err(StatError::SharedMemory)?;

        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        // SAFETY: attr is initialised before use and destroyed on every path
        // after a successful init.
        unsafe {
            check("pthread_mutexattr_init", libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;
            let configured = check(
                "pthread_mutexattr_setpshared",
                libc::pthread_mutexattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED),
            )
            .and_then(|_| make_robust(attr.as_mut_ptr()))
            .and_then(|_| {
                let mutex = ptr::addr_of_mut!((*region.as_ptr()).mutex);
                check("pthread_mutex_init", libc::pthread_mutex_init(mutex, attr.as_ptr()))
            });
            libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
            configured?;
        }
        debug!("initialised process-shared result block");
        Ok(Self { region })
    }

    fn mutex(&self) -> *mut libc::pthread_mutex_t {
        // SAFETY: the region is mapped for as long as self exists.
        unsafe { ptr::addr_of_mut!((*self.region.as_ptr()).mutex) }
    }

    /// Adds `partial` to the shared totals under the process-shared lock.
    ///
    /// Runs inside forked children: it must not allocate, log or panic. On a
    /// lock failure the counters are left untouched and the errno is returned.
    pub(crate) fn merge(&self, partial: &PartialResult) -> Result<(), io::Error> {
        let mutex = self.mutex();
        // SAFETY: mutex was initialised in `new` and lives in the shared region.
        let rc = unsafe { libc::pthread_mutex_lock(mutex) };
        if rc != 0 {
            if owner_died(rc) {
                // we now own a lock whose previous holder may have left a
                // half-applied merge behind; release it without writing
                unsafe { libc::pthread_mutex_unlock(mutex) };
            }
            return Err(io::Error::from_raw_os_error(rc));
        }

        // SAFETY: exclusive access to the block while the lock is held.
        unsafe {
            let block = self.region.as_ptr();
            let counts = &mut *ptr::addr_of_mut!((*block).counts);
            for (total, part) in counts.iter_mut().zip(partial.counts.iter()) {
                *total += part;
            }
            (*block).sum += partial.sum;
            (*block).merged_units += 1;
            libc::pthread_mutex_unlock(mutex);
        }
        Ok(())
    }

    /// Reads the totals and releases the shared block.
    ///
    /// Only call this after every child has been waited for.
    pub(crate) fn into_result(self) -> AggregateResult {
        let mutex = self.mutex();
        // SAFETY: see `merge`.
        let rc = unsafe { libc::pthread_mutex_lock(mutex) };
        let locked = rc == 0 || owner_died(rc);
        if !locked {
            warn!(
                "result lock unusable ({}), reading totals unlocked",
                io::Error::from_raw_os_error(rc)
            );
        } else if rc != 0 {
            warn!("a worker died holding the result lock, totals may be inconsistent");
        }

        // SAFETY: no child is alive, so nothing else writes the block.
        let result = unsafe {
            let block = self.region.as_ptr();
            AggregateResult {
                counts: (*block).counts,
                sum: (*block).sum,
                merged_units: (*block).merged_units as usize,
            }
        };
        if locked {
            unsafe { libc::pthread_mutex_unlock(mutex) };
        }
        result
    }

    /// Forks a child that takes the lock and exits while still holding it.
    #[cfg(all(test, target_os = "linux"))]
    pub(crate) fn abandon_lock_in_child(&self) {
        match unsafe { libc::fork() } {
            -1 => panic!("fork failed: {}", io::Error::last_os_error()),
            0 => unsafe {
                libc::pthread_mutex_lock(self.mutex());
                libc::_exit(0)
            },
            pid => {
                let mut status = 0;
                assert_eq!(unsafe { libc::waitpid(pid, &mut status, 0) }, pid);
            }
        }
    }
}

impl Drop for SharedAccumulator {
    fn drop(&mut self) {
        // SAFETY: the mutex is unlocked and no other process uses it any more.
        unsafe { libc::pthread_mutex_destroy(self.mutex()) };
    }
}
