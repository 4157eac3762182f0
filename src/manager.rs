use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::repository::SegmentRepository;

/// Runtime sizing derived from the host.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemProfile {
    pub logical_cores: usize,
    pub worker_threads: usize,
    pub strict_durability: bool, // true = fsync every append, false = OS buffer
}

impl SystemProfile {
    pub fn detect() -> Self {
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::for_cores(cores)
    }

    pub fn for_cores(cores: usize) -> Self {
        // Single core: keep one compute and one I/O worker, skip fsync.
        if cores <= 1 {
            warn!(cores, "constrained host, appends are not fsynced");
            return Self {
                logical_cores: cores,
                worker_threads: 2,
                strict_durability: false,
            };
        }

        Self {
            logical_cores: cores,
            worker_threads: cores,
            strict_durability: true,
        }
    }
}

/// Compact the segment repository every `interval`.
pub fn start_compaction_thread(repository: Arc<SegmentRepository>, interval: Duration) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        info!(interval_secs = interval.as_secs(), "compaction thread started");
        loop {
            thread::sleep(interval);

            match repository.compact() {
                Ok(stats) => info!(moved = stats.moved, dropped = stats.dropped, "segment compacted"),
                Err(e) => error!(error = %e, "compaction failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles() {
        let single = SystemProfile::for_cores(1);
        assert_eq!(single.worker_threads, 2);
        assert!(!single.strict_durability);

        let server = SystemProfile::for_cores(16);
        assert_eq!(server.worker_threads, 16);
        assert!(server.strict_durability);
    }

    #[test]
    fn test_detect_has_workers() {
        let profile = SystemProfile::detect();
        assert!(profile.logical_cores >= 1);
        assert!(profile.worker_threads >= 1);
    }
}
