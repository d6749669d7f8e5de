#![cfg(all(unix, feature = "cli"))]

use std::io::{BufRead, BufReader, Write};
use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use spacelink::frame::{CrcPreset, CHECK_INPUT};

const NODES: &str = "# test network\n1 ground\n2 sat\n";

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "spacelink-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    std::fs::write(dir.join("nodes.txt"), NODES).expect("node table should be writable");
    dir
}

fn spacelink(root: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_spacelink"));
    cmd.arg("--log-level").arg("error").arg("--root").arg(root);
    cmd
}

fn json_output(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.output().expect("command should run");
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    false
}

fn free_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0")
        .expect("ephemeral bind should work")
        .local_addr()
        .expect("bound socket has an address")
        .port()
}

struct KillOnDrop(Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

#[test]
fn crc_matches_preset_check_values() {
    let dir = unique_temp_dir("crc");
    let file = dir.join("check.txt");
    std::fs::write(&file, CHECK_INPUT).expect("check file should be writable");

    let rows = json_output(spacelink(&dir).args(["--format", "json", "crc", "--all"]).arg(&file));
    let rows = rows.as_array().expect("--all prints an array");
    assert_eq!(rows.len(), CrcPreset::ALL.len());
    for preset in CrcPreset::ALL {
        let row = rows
            .iter()
            .find(|row| row["preset"] == preset.name())
            .expect("every preset is reported");
        assert_eq!(row["crc"], format!("0x{:04x}", preset.check_value()));
    }

    std::fs::remove_dir_all(&dir).expect("cleanup");
}

#[test]
fn enqueue_then_queue_scan_lists_the_file() {
    let dir = unique_temp_dir("enqueue");
    let source = dir.join("report.csv");
    std::fs::write(&source, vec![b'x'; 4096]).expect("source should be writable");

    let spooled = json_output(
        spacelink(&dir)
            .args(["--format", "json", "enqueue", "ground", "sat", "payload"])
            .arg(&source),
    );
    let spooled_path = PathBuf::from(spooled["path"].as_str().expect("path field"));
    assert_eq!(spooled_path, dir.join("sat/outgoing/payload/report.csv"));
    assert_eq!(spooled["size"], "4096");

    let queues = json_output(
        spacelink(&dir).args(["--format", "json", "queue", "ground", "--scan", "--outgoing"]),
    );
    let outgoing = queues["outgoing"].as_array().expect("outgoing array");
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0]["file_name"], "report.csv");
    assert_eq!(outgoing[0]["agent_name"], "payload");
    assert_eq!(outgoing[0]["node"], "sat");
    assert!(queues.get("incoming").is_none());

    let empty = dir.join("empty.bin");
    std::fs::write(&empty, b"").expect("empty file should be writable");
    let status = spacelink(&dir)
        .args(["enqueue", "ground", "sat", "payload"])
        .arg(&empty)
        .stderr(Stdio::null())
        .status()
        .expect("command should run");
    assert_eq!(status.code(), Some(60));

    let status = spacelink(&dir)
        .args(["enqueue", "ground", "mars", "payload"])
        .arg(&source)
        .stderr(Stdio::null())
        .status()
        .expect("command should run");
    assert_eq!(status.code(), Some(64));

    std::fs::remove_dir_all(&dir).expect("cleanup");
}

#[test]
fn agents_transfer_a_file_over_udp() {
    let ground_root = unique_temp_dir("agent-ground");
    let sat_root = unique_temp_dir("agent-sat");
    let content: Vec<u8> = (0..6000u32).map(|i| (i * 31 % 251) as u8).collect();
    let spool = ground_root.join("sat/outgoing/camera");
    std::fs::create_dir_all(&spool).expect("spool should be creatable");
    std::fs::write(spool.join("frame.raw"), &content).expect("spool file should be writable");

    let port = free_port().to_string();
    let mut ground = KillOnDrop(
        spacelink(&ground_root)
            .args(["run", "ground", "sat:127.0.0.2:200000", "--bind", "127.0.0.1", "--waittime", "1", "--port"])
            .arg(&port)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("ground agent should start"),
    );

    let mut stdin = ground.0.stdin.take().expect("piped stdin");
    let mut stdout = BufReader::new(ground.0.stdout.take().expect("piped stdout"));
    writeln!(stdin, "list_outgoing").expect("request should be written");
    let mut line = String::new();
    stdout.read_line(&mut line).expect("reply should arrive");
    let listed: serde_json::Value = serde_json::from_str(&line).expect("reply is JSON");
    assert_eq!(listed[0]["file_name"], "frame.raw");
    assert_eq!(listed[0]["file_size"], 6000);

    writeln!(stdin, "set_enabled sat 0 1").expect("request should be written");
    line.clear();
    stdout.read_line(&mut line).expect("reply should arrive");
    let rejected: serde_json::Value = serde_json::from_str(&line).expect("reply is JSON");
    assert_eq!(rejected["ok"], false);

    let _sat = KillOnDrop(
        spacelink(&sat_root)
            .args(["run", "sat", "ground:127.0.0.1:200000", "--bind", "127.0.0.2", "--waittime", "1", "--port"])
            .arg(&port)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("sat agent should start"),
    );

    let received = sat_root.join("ground/incoming/camera/frame.raw");
    assert!(
        wait_until(Duration::from_secs(30), || std::fs::read(&received)
            .is_ok_and(|bytes| bytes == content)),
        "file should arrive intact"
    );
    assert!(
        wait_until(Duration::from_secs(30), || !spool.join("frame.raw").exists()),
        "delivered file should leave the spool"
    );

    drop(ground);
    std::fs::remove_dir_all(&ground_root).expect("cleanup");
    std::fs::remove_dir_all(&sat_root).expect("cleanup");
}
