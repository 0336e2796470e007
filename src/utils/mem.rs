// Process memory probe for worker recycling decisions

/// Resident set size of the current process in MB, if the platform exposes
/// it. Returns `None` on platforms without /proc; callers treat that as
/// "cannot measure" and skip the memory-ceiling check.
pub fn resident_memory_mb() -> Option<u64> {
    // statm reports sizes in pages; the second field is resident pages.
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = 4096u64;
    Some(rss_pages * page_size / (1024 * 1024))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn test_probe_reports_on_linux() {
        let rss = resident_memory_mb();
        assert!(rss.is_some());
    }
}
