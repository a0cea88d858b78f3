//! Process-level behavior of the `splice-relay` binary.


use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use harness::{connect_with_retry, free_port, IO_TIMEOUT};
use tempfile::NamedTempFile;

fn relay_command(path: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_splice-relay"));
    command
        .env("RELAY_CONFIG", path)
        .env("RELAY_LOG_FORMAT", "compact")
        .env("RELAY_LOG_LEVEL", "info")
        .env_remove("RUST_LOG");
    command
}

fn run_with_config(path: &Path) -> Output {
    relay_command(path).output().expect("binary should start")
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn zero_listeners_logs_count_and_exits_cleanly() {
    let file = config_file("proxy_servers = []\n");
    let output = run_with_config(file.path());

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("listeners configured"), "stdout: {}", stdout);
    assert!(stdout.contains("count=0"), "stdout: {}", stdout);
}

#[test]
fn accept_with_unreachable_destination_is_logged() {
    let dead_port = free_port();
    let port = free_port();
    let file = config_file(&format!(
        "[[proxy_servers]]\ninterface = \"127.0.0.1\"\nport = {port}\n\
         destination = {{ address = \"127.0.0.1\", port = {dead_port} }}\n"
    ));

    let mut child = relay_command(file.path())
        .stdout(Stdio::piped())
        .spawn()
        .expect("binary should start");
    let stdout = child.stdout.take().unwrap();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    // The client is accepted, then closed once the dial fails.
    let mut client = connect_with_retry(SocketAddr::from((Ipv4Addr::LOCALHOST, port)));
    let mut buf = [0u8; 1];
    assert_eq!(client.read(&mut buf).unwrap(), 0);

    let deadline = Instant::now() + IO_TIMEOUT;
    let mut accepted = None;
    while accepted.is_none() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(line) if line.contains("connection accepted") => accepted = Some(line),
            Ok(_) => {}
            Err(_) => break,
        }
    }

    child.kill().unwrap();
    child.wait().unwrap();

    let line = accepted.expect("accept should be logged");
    assert!(line.contains(&format!("port={port}")), "line: {}", line);
    assert_eq!(line.matches("port=").count(), 1, "line: {}", line);
    assert!(line.contains("client_fd="), "line: {}", line);
    assert!(line.contains("destination_fd=-1"), "line: {}", line);
}

#[test]
fn failed_listeners_are_logged_and_process_exits() {
    let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let file = config_file(&format!(
        "[[proxy_servers]]\ninterface = \"127.0.0.1\"\nport = {port}\n\
         destination = {{ address = \"127.0.0.1\", port = 9 }}\n"
    ));

    let output = run_with_config(file.path());
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let failed = stdout
        .lines()
        .find(|line| line.contains("listener failed"))
        .unwrap_or_else(|| panic!("stdout: {}", stdout));
    assert!(failed.contains(&format!("port={port}")), "line: {}", failed);
    assert!(failed.contains("bind_failed"), "line: {}", failed);

    let stopped = stdout
        .lines()
        .find(|line| line.contains("every listener stopped"))
        .unwrap_or_else(|| panic!("stdout: {}", stdout));
    assert!(stopped.contains("failed=1"), "line: {}", stopped);
    assert!(stopped.contains("total=1"), "line: {}", stopped);
}

#[test]
fn missing_listener_array_fails() {
    let file = config_file("other = 1\n");
    let output = run_with_config(file.path());
    assert!(!output.status.success());
}

#[test]
fn invalid_entry_fails() {
    let file = config_file("[[proxy_servers]]\nport = 0\ndestination = { address = \"x\", port = 1 }\n");
    let output = run_with_config(file.path());
    assert!(!output.status.success());
}

#[test]
fn missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_with_config(&dir.path().join("absent.toml"));
    assert!(!output.status.success());
}

#[test]
fn bad_log_format_fails() {
    let file = config_file("proxy_servers = []\n");
    let output = Command::new(env!("CARGO_BIN_EXE_splice-relay"))
        .env("RELAY_CONFIG", file.path())
        .env("RELAY_LOG_FORMAT", "xml")
        .output()
        .expect("binary should start");
    assert!(!output.status.success());
}
