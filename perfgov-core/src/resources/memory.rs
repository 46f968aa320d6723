//! Process memory sampling.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sysinfo::{get_current_pid, Pid, System};
use tracing::warn;

use super::MemorySample;

/// Source of memory usage samples
pub trait MemoryProbe: Send + Sync {
    fn sample(&self) -> MemorySample;
}

/// Samples the current process through `sysinfo`
///
/// Keeps one `System` around so each sample refreshes only this process.
pub struct ProcessMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl std::fmt::Debug for ProcessMemoryProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessMemoryProbe")
            .field("pid", &self.pid)
            .finish()
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        let pid = match get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Cannot determine current pid, memory samples will be zero: {}", e);
                None
            }
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn sample(&self) -> MemorySample {
        let Some(pid) = self.pid else {
            return MemorySample::default();
        };

        let mut system = self.system.lock();
        system.refresh_process(pid);
        system
            .process(pid)
            .map(|process| MemorySample {
                rss_bytes: process.memory(),
                virtual_bytes: process.virtual_memory(),
            })
            .unwrap_or_default()
    }
}

/// Probe reporting a settable resident size
#[derive(Debug, Default)]
pub struct FixedMemoryProbe {
    rss_bytes: AtomicU64,
}

impl FixedMemoryProbe {
    pub fn new(rss_bytes: u64) -> Self {
        Self {
            rss_bytes: AtomicU64::new(rss_bytes),
        }
    }

    pub fn set(&self, rss_bytes: u64) {
        self.rss_bytes.store(rss_bytes, Ordering::Relaxed);
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn sample(&self) -> MemorySample {
        let rss_bytes = self.rss_bytes.load(Ordering::Relaxed);
        MemorySample {
            rss_bytes,
            virtual_bytes: rss_bytes,
        }
    }
}
