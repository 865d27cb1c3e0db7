//! Single-instance lock.
//!
//! An advisory exclusive lock on a token-named file in the system temp
//! directory. At most one process holding the token runs at a time;
//! the lock is released by the OS when the process exits, so a crashed
//! instance never wedges the next one.

use fs2::FileExt;
use std::fs::{File, OpenOptions};

pub const INSTANCE_LOCK_TOKEN: &str = "8a6f4ab6-68d7-4a09-9e89-0e651f573b69";

/// Held for the process lifetime; dropping releases the lock.
pub struct InstanceLock {
    _file: File,
}

/// Try to take the lock. `None` means another instance holds it (or the
/// lock file could not be created, which is treated as contention).
pub fn acquire(token: &str) -> Option<InstanceLock> {
    let path = std::env::temp_dir().join(token);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .ok()?;
    file.try_lock_exclusive().ok()?;
    Some(InstanceLock { _file: file })
}
