//! Named, process-shared POSIX counting semaphores.
//!
//! A named semaphore lives in the kernel (or `/dev/shm/sem.*` on Linux) until it
//! is unlinked, independent of the processes that opened it. `sem_open` with
//! `O_CREAT` is an atomic create-or-open, so the initial value only applies to
//! whichever process creates it first.

use crate::error::ChannelError;
use std::ffi::CString;
use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: String,
}

// SAFETY: sem_t operations are thread-safe by POSIX; the handle is only closed in Drop.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

/// Absolute wake-up time for a bounded wait.
///
/// `sem_timedwait` measures against `CLOCK_REALTIME`, so the deadline is fixed
/// once and shared by every wait of a multi-step operation.
#[derive(Clone, Copy)]
pub struct Deadline {
    at: libc::timespec,
    timeout: Duration,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let abs = now.saturating_add(timeout);
        // SAFETY: timespec is plain data; zero is a valid value on every target.
        let mut at: libc::timespec = unsafe { std::mem::zeroed() };
        at.tv_sec = abs.as_secs() as libc::time_t;
        at.tv_nsec = abs.subsec_nanos() as libc::c_long;
        Self { at, timeout }
    }

    /// The relative timeout this deadline was built from.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Posts the semaphore when dropped. Used for the binary exclusion gate.
pub struct SemaphoreGuard<'a> {
    sem: &'a NamedSemaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.sem.post() {
            tracing::error!(sem = %self.sem.name, error = %e, "failed to release gate");
        }
    }
}

impl NamedSemaphore {
    /// Open `name`, creating it with `initial` if it does not exist yet.
    pub fn open(name: &str, initial: u32) -> Result<Self, ChannelError> {
        let c_name = c_name(name).map_err(|source| ChannelError::Semaphore {
            name: name.to_string(),
            source,
        })?;
        // SAFETY: c_name is NUL terminated; mode and value are passed as c_uint per the variadic ABI.
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT,
                0o666 as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(ChannelError::Semaphore {
                name: name.to_string(),
                source: io::Error::last_os_error(),
            });
        }
        tracing::debug!(sem = name, initial, "opened semaphore");
        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    /// Remove `name` from the system. Existing handles stay usable; a missing
    /// semaphore is not an error.
    pub fn unlink(name: &str) -> Result<(), ChannelError> {
        let unlink_err = |source| ChannelError::Unlink {
            name: name.to_string(),
            source,
        };
        let c_name = c_name(name).map_err(unlink_err)?;
        // SAFETY: c_name is NUL terminated.
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::NotFound {
            Ok(())
        } else {
            Err(unlink_err(err))
        }
    }

    /// Blocks until the count is positive, then decrements it.
    pub fn wait(&self) -> Result<(), ChannelError> {
        loop {
            // SAFETY: self.sem is a live handle from sem_open.
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(self.wait_err(err));
            }
        }
    }

    /// Decrements the count if it is positive. Never blocks.
    pub fn try_wait(&self) -> Result<bool, ChannelError> {
        loop {
            // SAFETY: self.sem is a live handle from sem_open.
            if unsafe { libc::sem_trywait(self.sem) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(self.wait_err(err)),
            }
        }
    }

    /// Like [`wait`](Self::wait) but gives up at `deadline`. Returns `false` on timeout.
    pub fn wait_until(&self, deadline: &Deadline) -> Result<bool, ChannelError> {
        loop {
            // SAFETY: self.sem is a live handle; deadline.at is a valid timespec.
            if unsafe { libc::sem_timedwait(self.sem, &deadline.at) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(self.wait_err(err)),
            }
        }
    }

    pub fn post(&self) -> Result<(), ChannelError> {
        // SAFETY: self.sem is a live handle from sem_open.
        if unsafe { libc::sem_post(self.sem) } == 0 {
            Ok(())
        } else {
            Err(ChannelError::Post {
                name: self.name.clone(),
                source: io::Error::last_os_error(),
            })
        }
    }

    /// Current count. Only a snapshot: other processes may change it at any time.
    pub fn value(&self) -> Result<u32, ChannelError> {
        let mut v: libc::c_int = 0;
        // SAFETY: self.sem is a live handle; v is a valid out-pointer.
        if unsafe { libc::sem_getvalue(self.sem, &mut v) } != 0 {
            return Err(self.wait_err(io::Error::last_os_error()));
        }
        // Linux reports 0 when waiters are blocked; other systems may report -waiters.
        Ok(v.max(0) as u32)
    }

    /// Acquire as a binary gate, released when the guard drops.
    pub fn acquire(&self) -> Result<SemaphoreGuard<'_>, ChannelError> {
        self.wait()?;
        Ok(SemaphoreGuard { sem: self })
    }

    /// Bounded [`acquire`](Self::acquire); `None` on timeout.
    pub fn acquire_until(
        &self,
        deadline: &Deadline,
    ) -> Result<Option<SemaphoreGuard<'_>>, ChannelError> {
        Ok(self
            .wait_until(deadline)?
            .then(|| SemaphoreGuard { sem: self }))
    }

    fn wait_err(&self, source: io::Error) -> ChannelError {
        ChannelError::Wait {
            name: self.name.clone(),
            source,
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: handle came from sem_open and is closed exactly once.
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

fn c_name(name: &str) -> io::Result<CString> {
    if !name.starts_with('/') || name[1..].is_empty() || name[1..].contains('/') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("semaphore name {name:?} must be '/' followed by a non-empty name"),
        ));
    }
    CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    fn unique_name(tag: &str) -> String {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        format!(
            "/parley_sem_test_{}_{}_{tag}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        )
    }

    #[test]
    fn counts_down_and_up() {
        let name = unique_name("count");
        let sem = NamedSemaphore::open(&name, 2).unwrap();
        assert_eq!(sem.value().unwrap(), 2);
        assert!(sem.try_wait().unwrap());
        assert!(sem.try_wait().unwrap());
        assert!(!sem.try_wait().unwrap());
        sem.post().unwrap();
        assert_eq!(sem.value().unwrap(), 1);
        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn reopen_keeps_existing_count() {
        let name = unique_name("reopen");
        let a = NamedSemaphore::open(&name, 0).unwrap();
        a.post().unwrap();
        let b = NamedSemaphore::open(&name, 10).unwrap();
        assert_eq!(b.value().unwrap(), 1);
        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn timed_wait_expires() {
        let name = unique_name("timeout");
        let sem = NamedSemaphore::open(&name, 0).unwrap();
        let start = Instant::now();
        let got = sem
            .wait_until(&Deadline::after(Duration::from_millis(50)))
            .unwrap();
        assert!(!got);
        assert!(start.elapsed() >= Duration::from_millis(40));
        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn post_wakes_blocked_waiter() {
        let name = unique_name("wake");
        let sem = Arc::new(NamedSemaphore::open(&name, 0).unwrap());
        let waiter = {
            let sem = sem.clone();
            thread::spawn(move || sem.wait())
        };
        thread::sleep(Duration::from_millis(20));
        sem.post().unwrap();
        waiter.join().unwrap().unwrap();
        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn guard_releases_on_drop() {
        let name = unique_name("guard");
        let sem = NamedSemaphore::open(&name, 1).unwrap();
        {
            let _g = sem.acquire().unwrap();
            assert_eq!(sem.value().unwrap(), 0);
        }
        assert_eq!(sem.value().unwrap(), 1);
        NamedSemaphore::unlink(&name).unwrap();
    }

    #[test]
    fn rejects_bad_names() {
        assert!(NamedSemaphore::open("no_slash", 0).is_err());
        assert!(NamedSemaphore::open("/", 0).is_err());
        assert!(NamedSemaphore::open("/a/b", 0).is_err());
    }

    #[test]
    fn unlink_missing_is_ok() {
        NamedSemaphore::unlink(&unique_name("missing")).unwrap();
    }
}
