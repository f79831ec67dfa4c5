//! Exclusive lock on a namespace directory.
//!
//! Two processes writing the same namespace would interleave WAL records, so
//! opening a persistent namespace takes a non-blocking exclusive lock on
//! `<dir>/.lock`. The holder's pid is written into the file so a failed
//! acquire can say who holds it.
//!
//! The lock is released when the `FileLock` is dropped (the OS drops the lock
//! with the descriptor).

use std::fs::{self, File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Result as IoResult, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = ".lock";

/// Exclusive lock held for the lifetime of a persistent namespace.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire the lock for `dir`, failing fast if another process holds it.
    ///
    /// # Errors
    /// - `ErrorKind::WouldBlock` if the namespace is locked elsewhere
    /// - any I/O error creating or writing the lock file
    pub fn acquire(dir: &Path) -> IoResult<Self> {
        let path = dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if let Err(err) = try_lock(&file) {
            if err.kind() == ErrorKind::WouldBlock {
                let holder = Self::holder_pid(dir)
                    .map_or_else(|| "unknown pid".to_string(), |pid| format!("pid {pid}"));
                return Err(IoError::new(
                    ErrorKind::WouldBlock,
                    format!("namespace {} is locked by another process ({holder})", dir.display()),
                ));
            }
            return Err(err);
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    /// Pid recorded by the current (or last) holder of the lock in `dir`.
    #[must_use]
    pub fn holder_pid(dir: &Path) -> Option<u32> {
        fs::read_to_string(dir.join(LOCK_FILE))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// Returns the path to the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn try_lock(file: &File) -> IoResult<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and valid for this call.
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result != 0 {
        let errno = IoError::last_os_error();
        if errno.raw_os_error() == Some(libc::EWOULDBLOCK) {
            return Err(IoError::new(ErrorKind::WouldBlock, errno));
        }
        return Err(errno);
    }
    Ok(())
}

#[cfg(windows)]
fn try_lock(file: &File) -> IoResult<()> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };

    let handle = file.as_raw_handle() as HANDLE;
    // SAFETY: the handle is owned by `file`; OVERLAPPED is plain data and
    // zero-initialised as LockFileEx requires for offset 0.
    let result = unsafe {
        let mut overlapped = std::mem::zeroed::<windows_sys::Win32::System::IO::OVERLAPPED>();
        LockFileEx(
            handle,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            1,
            0,
            &mut overlapped,
        )
    };
    if result == 0 {
        let err = IoError::last_os_error();
        if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
            return Err(IoError::new(ErrorKind::WouldBlock, err));
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn try_lock(_file: &File) -> IoResult<()> {
    tracing::warn!("file locking not supported on this platform; proceeding without lock");
    Ok(())
}
