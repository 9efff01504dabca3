// SPDX-License-Identifier: PMPL-1.0-or-later

//! Process inventory over a fabricated procfs tree

use forensic_triage::memory::MemoryAnalyzer;
use forensic_triage::network::procnet::{SocketFamily, SocketKind};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;
use tempfile::TempDir;

const TICKS: u64 = 100;

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn stat_line(pid: u32, comm: &str, state: char, utime: u64, stime: u64, start: u64) -> String {
    format!(
        "{pid} ({comm}) {state} 1 {pid} {pid} 0 -1 4194560 100 0 0 0 {utime} {stime} 0 0 20 0 1 0 {start} 1000000 200"
    )
}

/// Host with two processes; pid 200 owns a TCP connection and an open log.
fn fake_host(root: &Path, evidence: &Path) -> std::path::PathBuf {
    let proc = root.join("proc");
    write(&proc.join("meminfo"), "MemTotal:       1000000 kB\nMemFree:  1 kB\n");
    // 1000 s of uptime
    write(&proc.join("uptime"), "1000.00 3000.00\n");
    write(
        &proc.join("net/tcp"),
        "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n   \
         0: 0A01A8C0:D2F0 0101A8C0:01BB 01 00000000:00000000 00:00000000 00000000  1000        0 5555 1 0000000000000000 20 4 30 10 -1\n",
    );

    // pid 1: init, no readable fds
    let init = proc.join("1");
    write(&init.join("stat"), &stat_line(1, "systemd", 'S', 50, 50, 0));
    write(&init.join("status"), "Name:\tsystemd\nUid:\t0\t0\t0\t0\n");
    write(&init.join("statm"), "1000 250 100 10 0 200 0\n");
    write(&init.join("cmdline"), "/sbin/init\0splash\0");

    // pid 200: a web server started 500 s after boot
    let web = proc.join("200");
    write(
        &web.join("stat"),
        &stat_line(200, "my server", 'R', 2 * TICKS, 3 * TICKS, 500 * TICKS),
    );
    write(&web.join("status"), "Name:\tmy server\nUid:\t1000\t1000\t1000\t1000\n");
    write(&web.join("statm"), "5000 500 100 10 0 200 0\n");
    write(&web.join("cmdline"), "/usr/sbin/httpd\0-f\0/etc/httpd.conf\0");
    fs::create_dir_all(web.join("fd")).unwrap();
    let log = evidence.join("access.log");
    write(&log, "GET /\n");
    symlink(&log, web.join("fd/3")).unwrap();
    symlink("socket:[5555]", web.join("fd/4")).unwrap();
    symlink("socket:[9999]", web.join("fd/5")).unwrap();
    symlink("pipe:[1234]", web.join("fd/6")).unwrap();
    symlink(evidence, web.join("cwd")).unwrap();
    write(
        &web.join("smaps"),
        "\
00400000-00452000 r-xp 00000000 08:02 173521 /usr/sbin/httpd
Size:                328 kB
Rss:                 200 kB
00651000-00652000 r--p 00051000 08:02 173521 /usr/sbin/httpd
Size:                  4 kB
Rss:                   4 kB
7f0000000000-7f0000002000 r-xp 00000000 08:02 9 /usr/lib/libssl.so.3
Size:                  8 kB
Rss:                   8 kB
7fff0000-7fff1000 rw-p 00000000 00:00 0 [stack]
Size:                  4 kB
Rss:                   4 kB
",
    );

    // A pid directory whose process has already exited.
    fs::create_dir_all(proc.join("31337")).unwrap();
    // Non-pid entries are ignored.
    fs::create_dir_all(proc.join("sys")).unwrap();

    write(
        &root.join("passwd"),
        "root:x:0:0:root:/root:/bin/bash\nwww:x:1000:1000::/var/www:/usr/sbin/nologin\n",
    );
    proc
}

// /proc/net addresses are host-order words; the fixture is little-endian.
#[cfg(target_endian = "little")]
#[test]
fn test_process_inventory() {
    let dir = TempDir::new().unwrap();
    let evidence = dir.path().join("srv");
    fs::create_dir_all(&evidence).unwrap();
    let proc = fake_host(dir.path(), &evidence);

    let analyzer = MemoryAnalyzer::new()
        .with_proc_root(&proc)
        .with_passwd(dir.path().join("passwd"));
    let processes = analyzer.analyze_running_processes().unwrap();

    let pids: Vec<u32> = processes.iter().map(|p| p.pid).collect();
    assert_eq!(pids, vec![1, 200]);

    let init = &processes[0];
    assert_eq!(init.name, "systemd");
    assert_eq!(init.username.as_deref(), Some("root"));
    assert_eq!(init.status, "sleeping");
    assert_eq!(init.cmdline, vec!["/sbin/init", "splash"]);
    assert!(init.open_files.is_empty());
    assert!(init.cwd.is_none());

    let web = &processes[1];
    assert_eq!(web.name, "my server");
    assert_eq!(web.username.as_deref(), Some("www"));
    assert_eq!(web.status, "running");
    assert_eq!(web.cwd.as_deref(), Some(evidence.as_path()));
    assert_eq!(web.open_files, vec![evidence.join("access.log")]);

    // Only the socket found in the tables is reported.
    assert_eq!(web.connections.len(), 1);
    let conn = &web.connections[0];
    assert_eq!(conn.fd, 4);
    assert_eq!(conn.kind, SocketKind::Tcp);
    assert_eq!(conn.family, SocketFamily::Inet);
    assert_eq!(conn.laddr.to_string(), "192.168.1.10:54000");
    assert_eq!(conn.raddr.map(|a| a.to_string()).as_deref(), Some("192.168.1.1:443"));
    assert_eq!(conn.status, "ESTABLISHED");

    // 5 CPU seconds over 500 s of runtime, with the host's real tick rate.
    assert!(web.cpu_percent > 0.0);
    assert!(web.memory_percent > 0.0 && web.memory_percent < 100.0);

    let json = serde_json::to_value(conn).unwrap();
    assert_eq!(json["type"], "tcp");
}

#[test]
fn test_loaded_modules_grouped_by_path() {
    let dir = TempDir::new().unwrap();
    let evidence = dir.path().join("srv");
    fs::create_dir_all(&evidence).unwrap();
    let proc = fake_host(dir.path(), &evidence);

    let modules = MemoryAnalyzer::new()
        .with_proc_root(&proc)
        .analyze_loaded_modules()
        .unwrap();

    // pid 1 has no readable maps and is skipped
    assert_eq!(modules.len(), 1);
    let web = &modules[0];
    assert_eq!(web.pid, 200);
    assert_eq!(web.process_name, "my server");

    let paths: Vec<&str> = web.modules.iter().map(|m| m.path.as_str()).collect();
    assert_eq!(paths, vec!["/usr/lib/libssl.so.3", "/usr/sbin/httpd"]);
    let httpd = &web.modules[1];
    assert_eq!(httpd.size, (328 + 4) * 1024);
    assert_eq!(httpd.rss, (200 + 4) * 1024);
}

#[test]
fn test_unknown_uid_falls_back_to_number() {
    let dir = TempDir::new().unwrap();
    let evidence = dir.path().join("srv");
    fs::create_dir_all(&evidence).unwrap();
    let proc = fake_host(dir.path(), &evidence);

    let processes = MemoryAnalyzer::new()
        .with_proc_root(&proc)
        .with_passwd(dir.path().join("missing-passwd"))
        .analyze_running_processes()
        .unwrap();
    assert_eq!(processes[1].username.as_deref(), Some("1000"));
}
