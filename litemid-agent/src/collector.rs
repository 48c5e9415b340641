//! System metrics collection
//!
//! Builds one immutable point-in-time snapshot per call. CPU, memory, OS and
//! runtime problems abort the whole collection; an unreadable disk volume or
//! a failed connection enumeration is skipped, never fatal.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use if_addrs::IfAddr;
use serde::Serialize;
use std::collections::BTreeMap;
use sysinfo::{Disks, Networks, System};
use tracing::debug;

/// Network connections included in a snapshot are capped to this many.
const MAX_CONNECTIONS: usize = 20;

/// Complete point-in-time system snapshot.
#[derive(Debug, Serialize)]
pub struct SystemMetrics {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub os: OsInfo,
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub disk: Vec<DiskMetrics>,
    pub network: NetworkMetrics,
    pub runtime: RuntimeMetrics,
}

#[derive(Debug, Serialize)]
pub struct OsInfo {
    pub platform: String,
    pub platform_version: String,
    pub architecture: String,
    pub kernel_version: String,
}

#[derive(Debug, Serialize)]
pub struct CpuMetrics {
    pub model_name: String,
    pub cores: usize,
    pub logical_cores: usize,
    pub usage_percent: f32,
    pub load_average: [f64; 3],
    pub frequency_mhz: u64,
}

/// Memory figures in bytes.
#[derive(Debug, Serialize)]
pub struct MemoryMetrics {
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub used_percent: f32,
    pub swap_total: u64,
    pub swap_used: u64,
    pub swap_percent: f32,
}

#[derive(Debug, Serialize)]
pub struct DiskMetrics {
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub used_percent: f32,
}

#[derive(Debug, Serialize)]
pub struct NetworkMetrics {
    pub interfaces: Vec<NetworkInterface>,
    /// Passed through as the enumeration layer reports them, first 20 only.
    pub connections: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct NetworkInterface {
    pub name: String,
    pub hardware_addr: String,
    pub addresses: Vec<String>,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub errors_in: u64,
    pub errors_out: u64,
}

#[derive(Debug, Serialize)]
pub struct RuntimeMetrics {
    pub agent_version: String,
    pub os: String,
    pub arch: String,
    pub num_cpus: usize,
}

/// Collect a fresh snapshot.
pub async fn collect() -> Result<SystemMetrics> {
    debug!("collecting system metrics");

    let mut sys = System::new_all();
    sys.refresh_all();
    // Second CPU refresh after a short pause gives a usable usage reading.
    tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
    sys.refresh_cpu_usage();

    let hostname = read_hostname();
    let os = OsInfo::collect();
    let cpu = CpuMetrics::collect(&sys).context("failed to read CPU info")?;
    let memory = MemoryMetrics::collect(&sys);
    let disk = DiskMetrics::collect();
    let network = NetworkMetrics::collect();
    let runtime = RuntimeMetrics::collect(&sys);

    Ok(SystemMetrics {
        timestamp: Utc::now(),
        hostname,
        os,
        cpu,
        memory,
        disk,
        network,
        runtime,
    })
}

fn read_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().to_string(),
        // sysinfo as fallback; both empty means "unknown"
        Err(_) => System::host_name().unwrap_or_default(),
    }
}

impl OsInfo {
    fn collect() -> Self {
        Self {
            platform: System::name().unwrap_or_else(|| "unknown".to_string()),
            platform_version: System::os_version().unwrap_or_else(|| "unknown".to_string()),
            architecture: std::env::consts::ARCH.to_string(),
            kernel_version: System::kernel_version().unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

impl CpuMetrics {
    fn collect(sys: &System) -> Result<Self> {
        let cpus = sys.cpus();
        if cpus.is_empty() {
            bail!("no CPU reported by the system");
        }

        let load = System::load_average();

        Ok(Self {
            model_name: cpus[0].brand().to_string(),
            cores: sys.physical_core_count().unwrap_or(cpus.len()),
            logical_cores: cpus.len(),
            usage_percent: sys.global_cpu_info().cpu_usage(),
            load_average: [load.one, load.five, load.fifteen],
            frequency_mhz: cpus[0].frequency(),
        })
    }
}

impl MemoryMetrics {
    fn collect(sys: &System) -> Self {
        let total = sys.total_memory();
        let available = sys.available_memory();
        let used = sys.used_memory();
        let swap_total = sys.total_swap();
        let swap_used = sys.used_swap();

        Self {
            total,
            available,
            used,
            used_percent: percent(used, total),
            swap_total,
            swap_used,
            swap_percent: percent(swap_used, swap_total),
        }
    }
}

fn percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        (used as f32 / total as f32) * 100.0
    }
}

impl DiskMetrics {
    fn collect() -> Vec<Self> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .iter()
            .filter_map(|disk| {
                Self::from_parts(
                    disk.name().to_string_lossy().to_string(),
                    disk.mount_point().to_string_lossy().to_string(),
                    disk.file_system().to_string_lossy().to_string(),
                    disk.total_space(),
                    disk.available_space(),
                )
            })
            .collect()
    }

    /// A volume whose usage cannot be read reports zero total space; such
    /// entries are dropped without failing the collection.
    fn from_parts(
        device: String,
        mountpoint: String,
        fstype: String,
        total: u64,
        free: u64,
    ) -> Option<Self> {
        if total == 0 {
            debug!("skipping unreadable volume {mountpoint}");
            return None;
        }
        let used = total.saturating_sub(free);
        Some(Self {
            device,
            mountpoint,
            fstype,
            total,
            free,
            used,
            used_percent: percent(used, total),
        })
    }
}

impl NetworkMetrics {
    fn collect() -> Self {
        let networks = Networks::new_with_refreshed_list();

        // Structured addresses straight from the interface enumeration, no
        // string scraping. Loopback interfaces are dropped.
        let mut addresses: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for interface in if_addrs::get_if_addrs().unwrap_or_default() {
            if interface.is_loopback() {
                continue;
            }
            let ip = match interface.addr {
                IfAddr::V4(ref v4) => v4.ip.to_string(),
                IfAddr::V6(ref v6) => v6.ip.to_string(),
            };
            addresses.entry(interface.name).or_default().push(ip);
        }

        let interfaces = addresses
            .into_iter()
            .map(|(name, addrs)| {
                // Traffic counters come from sysinfo when it knows the
                // interface; interfaces it does not list keep zeroed counters.
                let data = networks
                    .iter()
                    .find(|(known, _)| known.as_str() == name)
                    .map(|(_, data)| data);

                NetworkInterface {
                    hardware_addr: data
                        .map(|d| d.mac_address().to_string())
                        .unwrap_or_default(),
                    addresses: addrs,
                    bytes_sent: data.map_or(0, |d| d.total_transmitted()),
                    bytes_recv: data.map_or(0, |d| d.total_received()),
                    packets_sent: data.map_or(0, |d| d.total_packets_transmitted()),
                    packets_recv: data.map_or(0, |d| d.total_packets_received()),
                    errors_in: data.map_or(0, |d| d.total_errors_on_received()),
                    errors_out: data.map_or(0, |d| d.total_errors_on_transmitted()),
                    name,
                }
            })
            .collect();

        // Best effort: a failed enumeration yields an empty list.
        let connections = lumination::connections::connections()
            .unwrap_or_default()
            .into_iter()
            .take(MAX_CONNECTIONS)
            .filter_map(|conn| serde_json::to_value(conn).ok())
            .collect();

        Self {
            interfaces,
            connections,
        }
    }
}

impl RuntimeMetrics {
    fn collect(sys: &System) -> Self {
        Self {
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            num_cpus: sys.cpus().len(),
        }
    }
}
