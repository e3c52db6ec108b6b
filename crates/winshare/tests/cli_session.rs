#![cfg(all(unix, feature = "cli"))]

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use winshare_session::{connect, WindowMetadata};
use winshare_transport::{Endpoint, LocalStream};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/winshare-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        if start.elapsed() >= timeout {
            panic!("receiver never bound {}", path.display());
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn wait_with_timeout(mut child: Child, timeout: Duration) -> Output {
    let start = Instant::now();
    loop {
        if child.try_wait().expect("child should be waitable").is_some() {
            return child.wait_with_output().expect("output should be collectable");
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let output = child.wait_with_output().expect("output should be collectable");
            panic!(
                "process did not exit in time; stderr:\n{}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        thread::sleep(Duration::from_millis(25));
    }
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_winshare"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("winshare {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn share_without_receiver_exits_with_transport_error() {
    let dir = unique_temp_dir("noreceiver");
    let output = Command::new(env!("CARGO_BIN_EXE_winshare"))
        .args(["--log-level", "error", "--format", "json", "share"])
        .arg(dir.join("missing.sock"))
        .arg("--engine")
        .arg(dir.join("engine.sock"))
        .args(["--window", "0x1200"])
        .output()
        .expect("share should run");

    assert_eq!(output.status.code(), Some(3));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"status\":200"));
    assert!(stdout.contains("\"status\":301"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn receive_relays_window_bytes_through_client() {
    let dir = unique_temp_dir("receive");
    let sock_path = dir.join("peer.sock");

    // The client echoes whatever arrives on its framebuffer socket.
    let child = Command::new(env!("CARGO_BIN_EXE_winshare"))
        .args(["--log-level", "error", "--format", "json", "receive"])
        .arg(&sock_path)
        .args(["--client", "/bin/sh", "--client-arg", "-c"])
        .args(["--client-arg", "exec cat <&{fd} >&{fd}"])
        .arg("--once")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("receive should start");

    wait_for_socket(&sock_path, Duration::from_secs(5));

    let mut session = connect(&Endpoint::Unix(sock_path.clone())).expect("share side should connect");
    let handle = session.handle();
    let session_loop = thread::spawn(move || session.run());

    let (engine, mut engine_far) = LocalStream::pair().expect("pair should be creatable");
    engine_far
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout should set");
    let channel = handle
        .share_window(
            0x1200,
            engine,
            WindowMetadata {
                title: Some("xterm".into()),
                ..WindowMetadata::default()
            },
        )
        .expect("window should be shared");
    assert_eq!(channel, 1);

    engine_far.write_all(b"RFB 003.008\n").expect("engine write");
    let mut echoed = [0u8; 12];
    engine_far.read_exact(&mut echoed).expect("echo should come back");
    assert_eq!(&echoed, b"RFB 003.008\n");

    handle.shutdown().expect("shutdown should be queued");
    session_loop
        .join()
        .expect("session thread should finish")
        .expect("session should end cleanly");

    let output = wait_with_timeout(child, Duration::from_secs(5));
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"event\":\"window_opened\",\"channel\":1"));
    assert!(stdout.contains("title=\\\"xterm\\\""));
    assert!(stdout.contains("\"event\":\"window_closed\",\"channel\":1"));

    let _ = std::fs::remove_dir_all(&dir);
}
