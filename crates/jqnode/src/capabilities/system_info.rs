//! system.info capability.
//!
//! Best-effort host inventory: CPU, memory, computer name, GPU names,
//! non-loopback addresses, and disk capacities. Every field is optional
//! on the wire; values the platform cannot provide are simply omitted.
//! GB figures are rounded to two decimals, disk capacity to the nearest
//! integer GB.

use super::{CODE_SYSTEM_INFO_FAILED, CapabilityError, CapabilityResult};
use serde_json::{Map, Value, json};
use std::net::IpAddr;
use sysinfo::{Disks, Networks, System};
use tracing::info;

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

pub async fn collect() -> CapabilityResult {
    info!("system.info collect start");

    let mut system = System::new_all();
    system.refresh_all();

    let mut out = Map::new();

    if let Some(cpu_name) = cpu_name(&system) {
        out.insert("cpuName".to_string(), json!(cpu_name));
    }
    if let Some(cores) = system.physical_core_count() {
        if cores > 0 {
            out.insert("cpuCores".to_string(), json!(cores));
        }
    }
    let threads = system.cpus().len();
    if threads > 0 {
        out.insert("cpuThreads".to_string(), json!(threads));
    }
    if let Some(computer_name) = computer_name() {
        out.insert("computerName".to_string(), json!(computer_name));
    }

    let mut memory = Map::new();
    if system.total_memory() > 0 {
        memory.insert(
            "totalGB".to_string(),
            json!(round_two_decimals(system.total_memory() as f64 / BYTES_PER_GIB)),
        );
        memory.insert(
            "usedGB".to_string(),
            json!(round_two_decimals(system.used_memory() as f64 / BYTES_PER_GIB)),
        );
    }
    out.insert("memory".to_string(), Value::Object(memory));

    out.insert("gpuNames".to_string(), json!(gpu_names().await));

    let (ipv4, ipv6) = collect_addresses();
    out.insert(
        "ip".to_string(),
        json!({ "ipv4": ipv4, "ipv6": ipv6 }),
    );

    let disks: Vec<Value> = Disks::new_with_refreshed_list()
        .iter()
        .map(|disk| {
            json!({
                "name": disk.name().to_string_lossy(),
                "capacityGB": (disk.total_space() as f64 / BYTES_PER_GIB).round() as u64,
            })
        })
        .collect();
    out.insert("disks".to_string(), Value::Array(disks));

    if out.is_empty() {
        return Err(CapabilityError::with_code(
            CODE_SYSTEM_INFO_FAILED,
            "failed to collect system info",
        ));
    }

    info!(
        cpu_name = out.get("cpuName").and_then(|v| v.as_str()).unwrap_or(""),
        computer_name = out.get("computerName").and_then(|v| v.as_str()).unwrap_or(""),
        "system.info collect done"
    );
    Ok(Value::Object(out))
}

fn cpu_name(system: &System) -> Option<String> {
    let brand = system
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty());
    brand.or_else(|| {
        let arch = std::env::consts::ARCH.trim();
        if arch.is_empty() {
            None
        } else {
            Some(arch.to_string())
        }
    })
}

fn computer_name() -> Option<String> {
    System::host_name()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| {
            ["COMPUTERNAME", "HOSTNAME"]
                .iter()
                .filter_map(|variable| std::env::var(variable).ok())
                .map(|name| name.trim().to_string())
                .find(|name| !name.is_empty())
        })
}

/// Non-loopback addresses across all interfaces. IPv6 additionally drops
/// link-local (fe80::/10) addresses.
fn collect_addresses() -> (Vec<String>, Vec<String>) {
    let mut ipv4 = Vec::new();
    let mut ipv6 = Vec::new();

    for (_name, data) in Networks::new_with_refreshed_list().iter() {
        for network in data.ip_networks() {
            match network.addr {
                IpAddr::V4(address) => {
                    if address.is_loopback() {
                        continue;
                    }
                    let text = address.to_string();
                    if !ipv4.contains(&text) {
                        ipv4.push(text);
                    }
                }
                IpAddr::V6(address) => {
                    if address.is_loopback() || is_link_local_v6(&address) {
                        continue;
                    }
                    let text = address.to_string();
                    if !ipv6.contains(&text) {
                        ipv6.push(text);
                    }
                }
            }
        }
    }

    (ipv4, ipv6)
}

fn is_link_local_v6(address: &std::net::Ipv6Addr) -> bool {
    address.segments()[0] & 0xffc0 == 0xfe80
}

fn round_two_decimals(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(windows)]
async fn gpu_names() -> Vec<String> {
    use super::proc::{ProcessBudget, run_with_budget};
    use std::time::Duration;
    use tokio::process::Command;

    let mut command = Command::new("wmic");
    command
        .arg("path")
        .arg("win32_VideoController")
        .arg("get")
        .arg("Name");
    let outcome = match run_with_budget(
        command,
        None,
        ProcessBudget {
            run: Duration::from_secs(3),
            kill_wait: Duration::from_secs(3),
        },
    )
    .await
    {
        Ok(outcome) if !outcome.timed_out && outcome.exit_code == 0 => outcome,
        _ => return Vec::new(),
    };

    let text = String::from_utf8_lossy(&outcome.stdout).replace('\r', "");
    text.lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(not(windows))]
async fn gpu_names() -> Vec<String> {
    Vec::new()
}
