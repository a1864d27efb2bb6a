//! Host heap introspection.
//!
//! The memory manager asks a [`HeapProbe`] for heap figures. A probe that
//! cannot answer returns `None`, which callers report as zeros.

/// Heap usage figures in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct HeapStats {
    pub used_heap_size: u64,
    pub total_heap_size: u64,
    pub heap_size_limit: u64,
}

impl HeapStats {
    /// Used/total ratio, 0.0 when the total is unknown
    pub fn utilization(&self) -> f64 {
        if self.total_heap_size == 0 {
            0.0
        } else {
            self.used_heap_size as f64 / self.total_heap_size as f64
        }
    }
}

/// Source of heap usage figures
pub trait HeapProbe: Send + Sync {
    /// Current heap figures, or `None` if the host offers no introspection
    fn heap_stats(&self) -> Option<HeapStats>;
}

/// Probe for hosts without heap introspection
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHeapProbe;

impl HeapProbe for NoHeapProbe {
    fn heap_stats(&self) -> Option<HeapStats> {
        None
    }
}

/// Probe backed by the process resident set size and physical RAM.
///
/// Only Linux is supported; other platforms answer `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessHeapProbe;

impl HeapProbe for ProcessHeapProbe {
    fn heap_stats(&self) -> Option<HeapStats> {
        let used = current_rss_bytes()?;
        let total = physical_ram_bytes()?;
        Some(HeapStats {
            used_heap_size: used,
            total_heap_size: total,
            heap_size_limit: total,
        })
    }
}

impl<P: HeapProbe + ?Sized> HeapProbe for std::sync::Arc<P> {
    fn heap_stats(&self) -> Option<HeapStats> {
        (**self).heap_stats()
    }
}

#[cfg(target_os = "linux")]
fn physical_ram_bytes() -> Option<u64> {
    let mut info = std::mem::MaybeUninit::<libc::sysinfo>::uninit();
    // SAFETY: sysinfo only writes into the provided struct.
    let rc = unsafe { libc::sysinfo(info.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: rc == 0 means the struct was fully initialised.
    let info = unsafe { info.assume_init() };
    Some((info.totalram as u64).saturating_mul(info.mem_unit as u64))
}

#[cfg(target_os = "linux")]
fn current_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let mut fields = statm.split_whitespace();
    let _size_pages = fields.next()?;
    let rss_pages = fields.next()?.parse::<u64>().ok()?;
    // SAFETY: sysconf has no memory-safety preconditions.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(rss_pages.saturating_mul(page_size as u64))
}

#[cfg(not(target_os = "linux"))]
fn physical_ram_bytes() -> Option<u64> {
    None
}

#[cfg(not(target_os = "linux"))]
fn current_rss_bytes() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_probe_reports_nothing() {
        assert_eq!(NoHeapProbe.heap_stats(), None);
    }

    #[test]
    fn test_utilization() {
        let stats = HeapStats {
            used_heap_size: 90,
            total_heap_size: 100,
            heap_size_limit: 200,
        };
        assert!((stats.utilization() - 0.9).abs() < f64::EPSILON);
        assert_eq!(HeapStats::default().utilization(), 0.0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_process_probe_reports_nonzero_on_linux() {
        let stats = ProcessHeapProbe.heap_stats().expect("linux exposes /proc");
        assert!(stats.used_heap_size > 0);
        assert!(stats.total_heap_size >= stats.used_heap_size);
    }
}
