//! Artifact locking (interface only, spec §1/§5/§6).
//!
//! Real file locking (flock/`O_EXCL`/lockdir) for shared object caches is an
//! external-collaborator concern this crate does not implement — the trait
//! boundary exists so a real implementation can be swapped in later without
//! touching the engine. [`NullLock`] is what `ctcore`'s own cache store uses
//! today: it always succeeds immediately.

use std::path::Path;

use crate::error::PreprocessError;

/// Environment variable naming the poll interval (seconds) between lock
/// acquisition attempts.
pub const CT_LOCK_SLEEP_INTERVAL: &str = "CT_LOCK_SLEEP_INTERVAL";
/// Environment variable naming how long to wait (seconds) before logging a
/// "still waiting for lock" warning.
pub const CT_LOCK_WARN_INTERVAL: &str = "CT_LOCK_WARN_INTERVAL";
/// Environment variable naming the total acquisition timeout (seconds).
pub const CT_LOCK_TIMEOUT: &str = "CT_LOCK_TIMEOUT";
/// Environment variable enabling verbose lock-wait logging when set to `1`.
pub const CT_LOCK_VERBOSE: &str = "CT_LOCK_VERBOSE";

/// Held while an artifact lock is active; releases on drop.
pub trait LockGuard {}

/// A no-op guard returned by [`NullLock`].
pub struct NullLockGuard;

impl LockGuard for NullLockGuard {}

/// A pluggable artifact-locking strategy for shared cache directories.
pub trait ArtifactLock {
    /// Acquire a lock on `path`, blocking per the implementation's policy.
    ///
    /// # Errors
    /// Returns a [`PreprocessError`] if the lock cannot be acquired.
    fn acquire(&self, path: &Path) -> Result<Box<dyn LockGuard>, PreprocessError>;
}

/// An `ArtifactLock` that always succeeds without actually locking anything.
/// Safe only for single-process use — this is `ctcore`'s own default.
pub struct NullLock;

impl ArtifactLock for NullLock {
    fn acquire(&self, _path: &Path) -> Result<Box<dyn LockGuard>, PreprocessError> {
        Ok(Box::new(NullLockGuard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_lock_always_succeeds() {
        let lock = NullLock;
        assert!(lock.acquire(Path::new("/tmp/whatever")).is_ok());
    }
}
