//! Side channel for entries a scan declines to act on.

use serde::Serialize;
use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
};

/// Why an entry was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Symlinks are never followed or stored during a scan
    Symlink,
    /// Sockets, FIFOs, device nodes
    SpecialFile,
    /// The entry is the archive being written
    ArchiveDestination,
    /// The name is not valid UTF-8 and cannot be addressed by a relative path
    NonUtf8Name,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Symlink => "symlink",
            Self::SpecialFile => "special_file",
            Self::ArchiveDestination => "archive_destination",
            Self::NonUtf8Name => "non_utf8_name",
        })
    }
}

/// A skipped entry, identified by its path relative to the workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipNotice {
    pub entry: String,
    pub reason: SkipReason,
}

/// Receives skip notices. Implementations must not fail; a panic inside
/// `on_skip` is caught and logged by the caller.
pub trait SkipObserver: Send + Sync {
    fn on_skip(&self, notice: &SkipNotice);
}

impl<F> SkipObserver for F
where
    F: Fn(&SkipNotice) + Send + Sync,
{
    fn on_skip(&self, notice: &SkipNotice) {
        self(notice);
    }
}

/// Default observer: one structured `warn!` per skipped entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSkipObserver;

impl SkipObserver for TracingSkipObserver {
    fn on_skip(&self, notice: &SkipNotice) {
        tracing::warn!(entry = %notice.entry, reason = %notice.reason, "Skipped entry");
    }
}

/// Delivers a notice, containing any panic raised by the observer.
pub(crate) fn notify(observer: &dyn SkipObserver, notice: &SkipNotice) {
    if catch_unwind(AssertUnwindSafe(|| observer.on_skip(notice))).is_err() {
        tracing::error!(entry = %notice.entry, "Skip observer panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_observer_receives_notice() {
        let seen = Mutex::new(Vec::new());
        let observer = |notice: &SkipNotice| {
            if let Ok(mut guard) = seen.lock() {
                guard.push(notice.clone());
            }
        };
        let notice = SkipNotice {
            entry: "a/link".to_string(),
            reason: SkipReason::Symlink,
        };
        notify(&observer, &notice);
        assert_eq!(seen.lock().unwrap().as_slice(), [notice]);
    }

    struct PanickingObserver;

    impl SkipObserver for PanickingObserver {
        fn on_skip(&self, _notice: &SkipNotice) {
            panic!("observer failure");
        }
    }

    #[test]
    fn test_panicking_observer_is_contained() {
        notify(
            &PanickingObserver,
            &SkipNotice {
                entry: "x".to_string(),
                reason: SkipReason::SpecialFile,
            },
        );
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_tracing_observer_logs() {
        TracingSkipObserver.on_skip(&SkipNotice {
            entry: "docs/link".to_string(),
            reason: SkipReason::Symlink,
        });
        assert!(logs_contain("Skipped entry"));
        assert!(logs_contain("docs/link"));
    }
}
