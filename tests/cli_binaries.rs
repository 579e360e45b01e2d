use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const BINARY: &str = env!("CARGO_BIN_EXE_upload-server");

fn binary_output(args: &[&str]) -> std::process::Output {
    Command::new(BINARY)
        .args(args)
        .output()
        .unwrap_or_else(|error| panic!("failed to run {BINARY}: {error}"))
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("reserve a local port")
}

fn connect_with_retry(port: u16) -> TcpStream {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => return stream,
            Err(error) if Instant::now() >= deadline => {
                panic!("server never listened on {port}: {error}")
            }
            Err(_) => thread::sleep(Duration::from_millis(50)),
        }
    }
}

struct RunningServer(Child);

impl Drop for RunningServer {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn start_server(config: &Path) -> RunningServer {
    let child = Command::new(BINARY)
        .arg("--config")
        .arg(config)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn server");
    RunningServer(child)
}

#[test]
fn help_lists_options() {
    let output = binary_output(&["--help"]);
    assert!(output.status.success(), "--help should succeed");
    assert!(output.stderr.is_empty(), "help output should not write to stderr");
    let stdout = String::from_utf8(output.stdout).expect("stdout is UTF-8");
    assert!(stdout.contains("--config"));
    assert!(stdout.contains("--verbose"));
}

#[test]
fn version_reports_package_version() {
    let output = binary_output(&["--version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout is UTF-8");
    assert!(stdout.starts_with("upload-server "));
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn unknown_flag_is_rejected() {
    let output = binary_output(&["--definitely-not-a-flag"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!output.stderr.is_empty());
}

#[test]
fn missing_config_exits_with_status_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("nope.txt");
    let output = Command::new(BINARY)
        .arg("--config")
        .arg(&missing)
        .output()
        .expect("run server");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).expect("stderr is UTF-8");
    assert!(stderr.contains("nope.txt"));
}

#[test]
fn malformed_port_exits_with_status_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = dir.path().join("config.txt");
    std::fs::write(
        &config,
        "fileTransferPort=abc\npingPort=1\nlinuxPath=uploads\nwindowsPath=uploads\n",
    )
    .expect("write config");
    let output = binary_output(&["--config", config.to_str().expect("utf-8 path")]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).expect("stderr is UTF-8");
    assert!(stderr.contains("fileTransferPort"));
    assert!(!dir.path().join("uploads").exists());
}

#[test]
fn running_binary_serves_both_ports() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transfer_port = free_port();
    let ping_port = free_port();
    let config = dir.path().join("config.txt");
    std::fs::write(
        &config,
        format!(
            "fileTransferPort={transfer_port}\npingPort={ping_port}\n\
             linuxPath=uploads\nwindowsPath=uploads\n\
             linuxIp=127.0.0.1\nwindowsIp=127.0.0.1\n\
             logFile=server.log\n"
        ),
    )
    .expect("write config");
    let _server = start_server(&config);

    let mut ping = connect_with_retry(ping_port);
    ping.write_all(b"ping\n").expect("send ping");
    let mut reply = String::new();
    BufReader::new(&ping).read_line(&mut reply).expect("read pong");
    assert_eq!(reply, "pong\n");

    let mut upload = connect_with_retry(transfer_port);
    upload
        .write_all(b"FileName:binary.bin;Size:4\n")
        .expect("send metadata");
    let mut offset = [0_u8; 8];
    upload.read_exact(&mut offset).expect("read offset");
    assert_eq!(u64::from_le_bytes(offset), 0);
    upload.write_all(b"data").expect("send body");
    upload
        .shutdown(std::net::Shutdown::Write)
        .expect("close write half");
    let mut rest = Vec::new();
    upload.read_to_end(&mut rest).expect("server closes");
    assert!(rest.is_empty());

    let stored = dir.path().join("uploads").join("binary.bin");
    let deadline = Instant::now() + Duration::from_secs(10);
    while std::fs::read(&stored).map(|bytes| bytes.len()).unwrap_or(0) < 4 {
        assert!(Instant::now() < deadline, "upload was not stored");
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(std::fs::read(&stored).expect("read stored"), b"data");
    assert!(dir.path().join("server.log").exists());
}
