use crate::command::{CommandRunner, Invocation};
use crate::config::Paths;
use crate::constants::ROUTE_PROBE_ADDRESS;
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;

const MIN_CPUS: usize = 2;
const MIN_MEMORY_KIB: u64 = 4 * 1024 * 1024;

/// A required program that could not be found on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingTool(pub String);

impl Display for MissingTool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What we know about the machine we are running on. Every field is best-effort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    /// `ID` from os-release, e.g. `ubuntu`, `rhel`.
    pub os_family: Option<String>,
    pub cpus: Option<usize>,
    pub memory_kib: Option<u64>,
}

impl HostInfo {
    /// Log a warning for every resource below the recommended single-node minimum.
    pub fn warn_if_undersized(&self) {
        if let Some(cpus) = self.cpus.filter(|cpus| *cpus < MIN_CPUS) {
            warn!(
                "Host has {} CPU(s), at least {} are recommended",
                cpus, MIN_CPUS
            );
        }
        if let Some(memory) = self.memory_kib.filter(|memory| *memory < MIN_MEMORY_KIB) {
            warn!(
                "Host has {} MiB of memory, at least {} MiB are recommended",
                memory / 1024,
                MIN_MEMORY_KIB / 1024
            );
        }
    }
}

/// Inspects the local host: addresses, resources and installed programs.
#[derive(Clone)]
pub struct HostProbe {
    runner: Arc<dyn CommandRunner>,
    os_release: PathBuf,
    meminfo: PathBuf,
    host_ip_override: Option<IpAddr>,
}

impl HostProbe {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        paths: &Paths,
        host_ip_override: Option<IpAddr>,
    ) -> Self {
        Self {
            runner,
            os_release: paths.os_release.clone(),
            meminfo: paths.meminfo.clone(),
            host_ip_override,
        }
    }

    /// Find the address other machines should use to reach this host. Returns `None` when
    /// nothing resolves; the caller decides whether that is fatal.
    pub async fn detect_host_ip(&self) -> Option<IpAddr> {
        if let Some(ip) = self.host_ip_override {
            debug!("Using host ip override {}", ip);
            return Some(ip);
        }

        let route = Invocation::new("ip").args(["-4", "route", "get", ROUTE_PROBE_ADDRESS]);
        match self.runner.run_checked(&route).await {
            Ok(output) => {
                if let Some(ip) = parse_route_source(&output.stdout) {
                    debug!("Host ip {} found from route lookup", ip);
                    return Some(ip);
                }
            }
            Err(e) => debug!("Route lookup failed: {}", e),
        }

        let addresses = Invocation::new("ip").args(["-4", "-o", "addr", "show", "scope", "global"]);
        match self.runner.run_checked(&addresses).await {
            Ok(output) => {
                let ip = parse_first_address(&output.stdout);
                if let Some(ip) = ip {
                    debug!("Host ip {} found from interface addresses", ip);
                }
                ip
            }
            Err(e) => {
                debug!("Interface address lookup failed: {}", e);
                None
            }
        }
    }

    /// `true` when `tool` can be found by the shell.
    pub async fn has_tool(&self, tool: &str) -> bool {
        let lookup = Invocation::new("sh").args(["-c", "command -v \"$1\"", "sh", tool]);
        match self.runner.run(&lookup).await {
            Ok(output) => output.success(),
            Err(e) => {
                debug!("Unable to look up '{}': {}", tool, e);
                false
            }
        }
    }

    /// Check every tool in `required` and return all of the missing ones.
    pub async fn check_prerequisites(&self, required: &[&str]) -> Vec<MissingTool> {
        let mut missing = Vec::new();
        for tool in required {
            if !self.has_tool(tool).await {
                missing.push(MissingTool(tool.to_string()));
            }
        }
        missing
    }

    /// Use `tool` when it is on `PATH`, otherwise `fallback` when that file exists.
    pub async fn resolve_tool(&self, tool: &str, fallback: &std::path::Path) -> String {
        if !self.has_tool(tool).await && fallback.is_file() {
            debug!("'{}' not on PATH, using '{}'", tool, fallback.display());
            return fallback.display().to_string();
        }
        tool.to_string()
    }

    pub fn host_info(&self) -> HostInfo {
        let os_family = std::fs::read_to_string(&self.os_release)
            .ok()
            .and_then(|contents| parse_os_release_id(&contents));
        let memory_kib = std::fs::read_to_string(&self.meminfo)
            .ok()
            .and_then(|contents| parse_mem_total(&contents));
        let cpus = std::thread::available_parallelism()
            .ok()
            .map(|cpus| cpus.get());
        let info = HostInfo {
            os_family,
            cpus,
            memory_kib,
        };
        info!(
            "Host: os '{}', {} CPU(s), {} MiB memory",
            info.os_family.as_deref().unwrap_or("unknown"),
            info.cpus.map(|c| c.to_string()).unwrap_or_else(|| "?".into()),
            info.memory_kib
                .map(|m| (m / 1024).to_string())
                .unwrap_or_else(|| "?".into())
        );
        info
    }
}

/// `1.1.1.1 via 10.0.0.1 dev eth0 src 10.0.0.5 uid 0` -> `10.0.0.5`
fn parse_route_source(output: &str) -> Option<IpAddr> {
    let mut tokens = output.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "src" {
            return tokens.next().and_then(|ip| ip.parse().ok());
        }
    }
    None
}

/// `2: eth0    inet 10.0.0.5/24 brd ...` -> the first non-loopback address.
fn parse_first_address(output: &str) -> Option<IpAddr> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            tokens.find(|token| *token == "inet")?;
            let cidr = tokens.next()?;
            cidr.split('/').next()?.parse::<Ipv4Addr>().ok()
        })
        .find(|ip| !ip.is_loopback())
        .map(IpAddr::V4)
}

fn parse_os_release_id(contents: &str) -> Option<String> {
    contents
        .lines()
        .filter_map(|line| line.trim().strip_prefix("ID="))
        .map(|value| value.trim_matches('"').to_string())
        .find(|value| !value.is_empty())
}

fn parse_mem_total(contents: &str) -> Option<u64> {
    contents
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kib| kib.parse().ok())
}
