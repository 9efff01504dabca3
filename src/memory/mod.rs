// SPDX-License-Identifier: PMPL-1.0-or-later

//! Live process inventory from procfs.
//!
//! Processes that vanish between listing and reading are skipped. Details a
//! process hides from us (another user's fd table, say) degrade to empty
//! values rather than dropping the process.

pub mod procfs;

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::network::procnet::{self, SocketEntry, SocketFamily, SocketKind};

/// One network connection held by a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub fd: u32,
    pub family: SocketFamily,
    #[serde(rename = "type")]
    pub kind: SocketKind,
    pub laddr: SocketAddr,
    pub raddr: Option<SocketAddr>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub username: Option<String>,
    pub memory_percent: f64,
    /// Average CPU use over the process lifetime.
    pub cpu_percent: f64,
    pub status: String,
    pub cmdline: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub open_files: Vec<PathBuf>,
    pub connections: Vec<ConnectionInfo>,
    pub timestamp: String,
}

/// A file mapped into a process, merged over all of its regions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub path: String,
    pub size: u64,
    pub rss: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessModules {
    pub pid: u32,
    pub process_name: String,
    pub modules: Vec<ModuleInfo>,
    pub timestamp: String,
}

/// Host constants needed to turn tick and page counts into percentages.
#[derive(Debug, Clone, Copy)]
struct HostFacts {
    clock_ticks: u64,
    page_size: u64,
    mem_total: Option<u64>,
    uptime: Option<f64>,
}

pub struct MemoryAnalyzer {
    proc_root: PathBuf,
    passwd: PathBuf,
}

impl Default for MemoryAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAnalyzer {
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            passwd: PathBuf::from("/etc/passwd"),
        }
    }

    pub fn with_proc_root(mut self, root: impl AsRef<Path>) -> Self {
        self.proc_root = root.as_ref().to_path_buf();
        self
    }

    pub fn with_passwd(mut self, passwd: impl AsRef<Path>) -> Self {
        self.passwd = passwd.as_ref().to_path_buf();
        self
    }

    fn host_facts(&self) -> HostFacts {
        // SAFETY: sysconf has no memory-safety preconditions.
        let clock_ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        // SAFETY: as above.
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        HostFacts {
            clock_ticks: if clock_ticks > 0 { clock_ticks as u64 } else { 100 },
            page_size: if page_size > 0 { page_size as u64 } else { 4096 },
            mem_total: procfs::read_mem_total(&self.proc_root),
            uptime: procfs::read_uptime(&self.proc_root),
        }
    }

    fn socket_index(&self) -> HashMap<u64, SocketEntry> {
        let mut index = HashMap::new();
        for kind in [SocketKind::Tcp, SocketKind::Udp] {
            for family in [SocketFamily::Inet, SocketFamily::Inet6] {
                match procnet::read_socket_table(&self.proc_root, kind, family) {
                    Ok(entries) => index.extend(entries.into_iter().map(|e| (e.inode, e))),
                    Err(e) => debug!("Cannot read {kind:?}/{family:?} socket table: {e}"),
                }
            }
        }
        index
    }

    /// Inventory every running process.
    pub fn analyze_running_processes(&self) -> Result<Vec<ProcessInfo>> {
        let pids = procfs::list_pids(&self.proc_root)?;
        let facts = self.host_facts();
        let users = procfs::read_passwd(&self.passwd);
        let sockets = self.socket_index();

        let processes: Vec<ProcessInfo> = pids
            .into_iter()
            .filter_map(|pid| self.process_info(pid, &facts, &users, &sockets))
            .collect();

        info!("Analyzed {} processes", processes.len());
        Ok(processes)
    }

    fn process_info(
        &self,
        pid: u32,
        facts: &HostFacts,
        users: &BTreeMap<u32, String>,
        sockets: &HashMap<u64, SocketEntry>,
    ) -> Option<ProcessInfo> {
        let stat = match procfs::read_stat(&self.proc_root, pid) {
            Ok(stat) => stat,
            Err(e) => {
                debug!("Skipping pid {pid}: {e}");
                return None;
            }
        };

        let username = procfs::read_uid(&self.proc_root, pid)
            .map(|uid| users.get(&uid).cloned().unwrap_or_else(|| uid.to_string()));

        let memory_percent = match (
            procfs::read_resident_pages(&self.proc_root, pid),
            facts.mem_total,
        ) {
            (Some(pages), Some(total)) if total > 0 => {
                (pages * facts.page_size) as f64 / total as f64 * 100.0
            }
            _ => 0.0,
        };

        let cpu_percent = facts
            .uptime
            .map(|uptime| {
                let ticks = facts.clock_ticks as f64;
                let running = uptime - stat.starttime as f64 / ticks;
                if running > 0.0 {
                    (stat.utime + stat.stime) as f64 / ticks / running * 100.0
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0);

        let mut open_files = Vec::new();
        let mut connections = Vec::new();
        for (fd, target) in procfs::read_fds(&self.proc_root, pid) {
            if let Some(inode) = procfs::socket_inode(&target) {
                if let Some(socket) = sockets.get(&inode) {
                    connections.push(ConnectionInfo {
                        fd,
                        family: socket.family,
                        kind: socket.kind,
                        laddr: socket.local,
                        raddr: socket.remote,
                        status: socket.status.to_string(),
                    });
                }
            } else if target.starts_with('/') && Path::new(&target).is_file() {
                open_files.push(PathBuf::from(target));
            }
        }

        Some(ProcessInfo {
            pid,
            name: stat.comm,
            username,
            memory_percent,
            cpu_percent,
            status: procfs::status_name(stat.state).to_string(),
            cmdline: procfs::read_cmdline(&self.proc_root, pid),
            cwd: procfs::read_cwd(&self.proc_root, pid),
            open_files,
            connections,
            timestamp: Utc::now().to_rfc3339(),
        })
    }

    /// File-backed mappings of every readable process.
    pub fn analyze_loaded_modules(&self) -> Result<Vec<ProcessModules>> {
        let pids = procfs::list_pids(&self.proc_root)?;
        let mut results = Vec::new();

        for pid in pids {
            let Ok(stat) = procfs::read_stat(&self.proc_root, pid) else {
                continue;
            };
            let mappings = match procfs::read_mappings(&self.proc_root, pid) {
                Ok(mappings) => mappings,
                Err(e) => {
                    debug!("Cannot read mappings of pid {pid}: {e}");
                    continue;
                }
            };

            let mut merged: BTreeMap<String, ModuleInfo> = BTreeMap::new();
            for mapping in mappings {
                let entry = merged.entry(mapping.path.clone()).or_insert_with(|| ModuleInfo {
                    path: mapping.path,
                    size: 0,
                    rss: 0,
                });
                entry.size += mapping.size;
                entry.rss += mapping.rss;
            }

            results.push(ProcessModules {
                pid,
                process_name: stat.comm,
                modules: merged.into_values().collect(),
                timestamp: Utc::now().to_rfc3339(),
            });
        }

        if results.is_empty() {
            warn!("No process mappings were readable");
        }
        Ok(results)
    }
}
