// SPDX-License-Identifier: PMPL-1.0-or-later

//! Per-process readers for a procfs tree.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TriageError};

/// Fields of `/proc/<pid>/stat` used by the analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcStat {
    pub comm: String,
    pub state: char,
    pub utime: u64,
    pub stime: u64,
    /// Clock ticks after boot.
    pub starttime: u64,
}

/// Parse a stat line. The command name is wrapped in parentheses and may
/// itself contain spaces or parentheses, so split at the last `)`.
pub fn parse_stat(content: &str) -> Option<ProcStat> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    let comm = content.get(open + 1..close)?.to_string();
    let fields: Vec<&str> = content.get(close + 2..)?.split_whitespace().collect();
    // state(0) ppid(1) ... utime(11) stime(12) ... starttime(19)
    if fields.len() < 20 {
        return None;
    }
    Some(ProcStat {
        comm,
        state: fields[0].chars().next()?,
        utime: fields[11].parse().ok()?,
        stime: fields[12].parse().ok()?,
        starttime: fields[19].parse().ok()?,
    })
}

pub fn status_name(state: char) -> &'static str {
    match state {
        'R' => "running",
        'S' => "sleeping",
        'D' => "disk-sleep",
        'Z' => "zombie",
        'T' => "stopped",
        't' => "tracing-stop",
        'X' | 'x' => "dead",
        'I' => "idle",
        'K' => "wake-kill",
        'W' => "waking",
        'P' => "parked",
        _ => "unknown",
    }
}

pub fn list_pids(proc_root: &Path) -> Result<Vec<u32>> {
    let mut pids: Vec<u32> = fs::read_dir(proc_root)
        .map_err(|e| {
            TriageError::file_system(format!("cannot read {}: {e}", proc_root.display()))
        })?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
        .collect();
    pids.sort_unstable();
    Ok(pids)
}

pub fn pid_dir(proc_root: &Path, pid: u32) -> PathBuf {
    proc_root.join(pid.to_string())
}

pub fn read_stat(proc_root: &Path, pid: u32) -> Result<ProcStat> {
    let content = fs::read_to_string(pid_dir(proc_root, pid).join("stat"))?;
    parse_stat(&content)
        .ok_or_else(|| TriageError::processing(format!("malformed stat for pid {pid}")))
}

/// NUL-separated arguments joined with spaces.
pub fn read_cmdline(proc_root: &Path, pid: u32) -> Vec<String> {
    fs::read(pid_dir(proc_root, pid).join("cmdline"))
        .map(|raw| {
            raw.split(|b| *b == 0)
                .filter(|arg| !arg.is_empty())
                .map(|arg| String::from_utf8_lossy(arg).into_owned())
                .collect()
        })
        .unwrap_or_default()
}

pub fn read_cwd(proc_root: &Path, pid: u32) -> Option<PathBuf> {
    fs::read_link(pid_dir(proc_root, pid).join("cwd")).ok()
}

/// Real uid from `/proc/<pid>/status`.
pub fn read_uid(proc_root: &Path, pid: u32) -> Option<u32> {
    let status = fs::read_to_string(pid_dir(proc_root, pid).join("status")).ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|uid| uid.parse().ok())
}

/// Resident pages from `/proc/<pid>/statm`.
pub fn read_resident_pages(proc_root: &Path, pid: u32) -> Option<u64> {
    let statm = fs::read_to_string(pid_dir(proc_root, pid).join("statm")).ok()?;
    statm.split_whitespace().nth(1)?.parse().ok()
}

/// Open descriptors as `(fd, link target)`. Unreadable directories give an
/// empty list.
pub fn read_fds(proc_root: &Path, pid: u32) -> Vec<(u32, String)> {
    let Ok(entries) = fs::read_dir(pid_dir(proc_root, pid).join("fd")) else {
        return Vec::new();
    };
    let mut fds: Vec<(u32, String)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let fd = entry.file_name().to_str()?.parse().ok()?;
            let target = fs::read_link(entry.path()).ok()?;
            Some((fd, target.to_string_lossy().into_owned()))
        })
        .collect();
    fds.sort_unstable();
    fds
}

/// Inode of a `socket:[N]` descriptor target.
pub fn socket_inode(target: &str) -> Option<u64> {
    target.strip_prefix("socket:[")?.strip_suffix(']')?.parse().ok()
}

pub fn read_mem_total(proc_root: &Path) -> Option<u64> {
    let meminfo = fs::read_to_string(proc_root.join("meminfo")).ok()?;
    let kb: u64 = meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))?
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    Some(kb * 1024)
}

pub fn read_uptime(proc_root: &Path) -> Option<f64> {
    let uptime = fs::read_to_string(proc_root.join("uptime")).ok()?;
    uptime.split_whitespace().next()?.parse().ok()
}

/// uid → user name from a passwd file.
pub fn read_passwd(path: &Path) -> BTreeMap<u32, String> {
    fs::read_to_string(path)
        .map(|content| {
            content
                .lines()
                .filter(|line| !line.starts_with('#'))
                .filter_map(|line| {
                    let mut fields = line.split(':');
                    let name = fields.next()?;
                    let uid = fields.nth(1)?.parse().ok()?;
                    Some((uid, name.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Size and resident bytes of one file-backed mapping region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub path: String,
    pub size: u64,
    pub rss: u64,
}

/// Parse `/proc/<pid>/smaps`, or `maps` when `detailed` is false (sizes
/// then come from the address range and `rss` is zero).
pub fn parse_mappings(content: &str, detailed: bool) -> Vec<Mapping> {
    let mut mappings: Vec<Mapping> = Vec::new();
    let mut current: Option<usize> = None;

    for line in content.lines() {
        if let Some(region) = parse_region_header(line) {
            current = None;
            if let Some((path, extent)) = region {
                mappings.push(Mapping {
                    path,
                    size: if detailed { 0 } else { extent },
                    rss: 0,
                });
                current = Some(mappings.len() - 1);
            }
            continue;
        }
        let (Some(index), true) = (current, detailed) else {
            continue;
        };
        if let Some(kb) = kb_field(line, "Size:") {
            mappings[index].size = kb * 1024;
        } else if let Some(kb) = kb_field(line, "Rss:") {
            mappings[index].rss = kb * 1024;
        }
    }
    mappings
}

/// `Some(None)` for an anonymous region header, `Some(Some(..))` for a
/// file-backed one, `None` for anything that is not a header.
fn parse_region_header(line: &str) -> Option<Option<(String, u64)>> {
    let mut fields = line.split_whitespace();
    let range = fields.next()?;
    let (start, end) = range.split_once('-')?;
    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    // perms offset dev inode
    let perms = fields.next()?;
    if perms.len() != 4 {
        return None;
    }
    let rest: Vec<&str> = fields.skip(3).collect();
    let path = rest.join(" ");
    if path.starts_with('/') {
        Some(Some((path, end.saturating_sub(start))))
    } else {
        Some(None)
    }
}

fn kb_field(line: &str, key: &str) -> Option<u64> {
    line.strip_prefix(key)?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

pub fn read_mappings(proc_root: &Path, pid: u32) -> Result<Vec<Mapping>> {
    let dir = pid_dir(proc_root, pid);
    match fs::read_to_string(dir.join("smaps")) {
        Ok(content) => Ok(parse_mappings(&content, true)),
        Err(_) => {
            let content = fs::read_to_string(dir.join("maps"))?;
            Ok(parse_mappings(&content, false))
        }
    }
}
