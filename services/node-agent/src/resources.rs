//! Host and app resource telemetry.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::units::human_readable_binary_unit;
use crate::engine::ContainerStats;

/// Point-in-time resource usage of one service container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResource {
    pub name: String,
    #[serde(flatten)]
    pub stats: ContainerStats,
}

/// Host resources, raw and formatted.
#[derive(Debug, Clone, Serialize)]
pub struct HostResources {
    pub cpu_cores: i32,
    pub total_memory_bytes: i64,
    pub available_memory_bytes: i64,
    pub total_disk_bytes: i64,
    pub free_disk_bytes: i64,
    pub mem_total: String,
    pub mem_free: String,
    pub disk_total: String,
    pub disk_free: String,
}

impl HostResources {
    /// Measure the host; disk figures are for the filesystem holding `data_dir`.
    pub fn measure(data_dir: &Path) -> Self {
        let cpu_cores = get_cpu_count();
        let (total_memory, available_memory) = get_memory_info();
        let (total_disk, free_disk) = get_disk_info(data_dir);

        Self {
            cpu_cores,
            total_memory_bytes: total_memory,
            available_memory_bytes: available_memory,
            total_disk_bytes: total_disk,
            free_disk_bytes: free_disk,
            mem_total: human_readable_binary_unit(total_memory as f64),
            mem_free: human_readable_binary_unit(available_memory as f64),
            disk_total: human_readable_binary_unit(total_disk as f64),
            disk_free: human_readable_binary_unit(free_disk as f64),
        }
    }
}

/// Host facts reported as read-only device properties.
pub struct HostFacts {
    pub os: String,
    pub platform: String,
    pub processor: String,
    pub cpu: String,
    pub mem: String,
    pub disk: String,
}

impl HostFacts {
    pub fn detect(data_dir: &Path) -> Self {
        let resources = HostResources::measure(data_dir);
        Self {
            os: std::env::consts::OS.to_string(),
            platform: std::env::consts::FAMILY.to_string(),
            processor: std::env::consts::ARCH.to_string(),
            cpu: resources.cpu_cores.to_string(),
            mem: resources.mem_total,
            disk: resources.disk_total,
        }
    }
}

fn get_cpu_count() -> i32 {
    #[cfg(unix)]
    {
        let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if count > 0 {
            return count as i32;
        }
    }

    std::thread::available_parallelism()
        .map(|p| p.get() as i32)
        .unwrap_or(1)
}

#[cfg(target_os = "linux")]
fn get_memory_info() -> (i64, i64) {
    if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
        return parse_meminfo(&meminfo);
    }

    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let total_pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    let avail_pages = unsafe { libc::sysconf(libc::_SC_AVPHYS_PAGES) };

    if page_size > 0 && total_pages > 0 {
        let total = (page_size * total_pages) as i64;
        let avail = if avail_pages > 0 {
            (page_size * avail_pages) as i64
        } else {
            total
        };
        return (total, avail);
    }

    (0, 0)
}

#[cfg(not(target_os = "linux"))]
fn get_memory_info() -> (i64, i64) {
    #[cfg(unix)]
    {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let total_pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };

        if page_size > 0 && total_pages > 0 {
            let total = (page_size * total_pages) as i64;
            return (total, total / 2);
        }
    }

    (0, 0)
}

#[cfg(target_os = "linux")]
fn parse_meminfo(content: &str) -> (i64, i64) {
    let mut total: i64 = 0;
    let mut available: i64 = 0;
    let mut free: i64 = 0;
    let mut buffers: i64 = 0;
    let mut cached: i64 = 0;

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 2 {
            const KB_TO_BYTES: i64 = 1024;
            let value: i64 = parts[1].parse().unwrap_or(0) * KB_TO_BYTES;
            match parts[0] {
                "MemTotal:" => total = value,
                "MemAvailable:" => available = value,
                "MemFree:" => free = value,
                "Buffers:" => buffers = value,
                "Cached:" => cached = value,
                _ => {}
            }
        }
    }

    if available == 0 {
        available = free + buffers + cached;
    }

    (total, available)
}

/// `(total, free)` bytes of the filesystem holding `path`; zeros if unknown.
#[cfg(unix)]
fn get_disk_info(path: &Path) -> (i64, i64) {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return (0, 0);
    };

    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return (0, 0);
    }

    let block = stat.f_frsize as i64;
    (
        stat.f_blocks as i64 * block,
        stat.f_bavail as i64 * block,
    )
}

#[cfg(not(unix))]
fn get_disk_info(_path: &Path) -> (i64, i64) {
    (0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measure_resources() {
        let dir = tempfile::tempdir().unwrap();
        let resources = HostResources::measure(dir.path());
        assert!(resources.cpu_cores > 0);
        assert!(resources.total_memory_bytes > 0);
        assert!(resources.available_memory_bytes <= resources.total_memory_bytes);
        assert!(resources.free_disk_bytes <= resources.total_disk_bytes);
    }

    #[cfg(unix)]
    #[test]
    fn test_disk_info_missing_path() {
        assert_eq!(get_disk_info(Path::new("/definitely/not/here")), (0, 0));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_parse_meminfo() {
        let sample = r#"MemTotal:       16384000 kB
MemFree:         1234567 kB
MemAvailable:    8000000 kB
Buffers:          123456 kB
Cached:          2345678 kB
"#;
        let (total, available) = parse_meminfo(sample);
        assert_eq!(total, 16384000 * 1024);
        assert_eq!(available, 8000000 * 1024);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_parse_meminfo_no_available() {
        let sample = r#"MemTotal:       16384000 kB
MemFree:         1000000 kB
Buffers:          500000 kB
Cached:          2000000 kB
"#;
        let (total, available) = parse_meminfo(sample);
        assert_eq!(total, 16384000 * 1024);
        assert_eq!(available, (1000000 + 500000 + 2000000) * 1024);
    }

    #[test]
    fn test_service_resource_flattens_stats() {
        let resource = ServiceResource {
            name: "web".to_string(),
            stats: ContainerStats {
                cpu: "1.000%".to_string(),
                mem: "1.000MiB".to_string(),
                mem_limit: "2.000MiB".to_string(),
                mem_percent: "50.000%".to_string(),
                net_input: "0.000B".to_string(),
                net_output: "0.000B".to_string(),
                block_input: "0.000B".to_string(),
                block_output: "0.000B".to_string(),
            },
        };
        let json = serde_json::to_value(&resource).unwrap();
        assert_eq!(json["name"], "web");
        assert_eq!(json["mem_percent"], "50.000%");
    }
}
