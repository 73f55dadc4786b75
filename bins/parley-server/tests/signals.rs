//! The server binary must shut down cleanly on the usual stop signals.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn spawn_server() -> (Child, mpsc::Receiver<String>) {
    let mut child = Command::new(env!("CARGO_BIN_EXE_parley-server"))
        .args(["--port", "0"])
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn parley-server");

    let stdout = child.stdout.take().expect("stdout is piped");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    (child, rx)
}

fn wait_for(rx: &mpsc::Receiver<String>, needle: &str) {
    loop {
        let line = rx
            .recv_timeout(Duration::from_secs(10))
            .unwrap_or_else(|_| panic!("server never logged {needle:?}"));
        if line.contains(needle) {
            return;
        }
    }
}

fn stops_cleanly_on(signal: libc::c_int) {
    let (mut child, rx) = spawn_server();
    wait_for(&rx, "chat server listening");

    // SAFETY: plain kill(2) on a child we own and have not reaped.
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, signal) };
    assert_eq!(rc, 0);

    wait_for(&rx, "shutdown complete");
    let status = child.wait().expect("failed to wait for server");
    assert!(status.success(), "server exited with {status}");
}

#[test]
fn sigterm_shuts_down_gracefully() {
    stops_cleanly_on(libc::SIGTERM);
}

#[test]
fn sigint_shuts_down_gracefully() {
    stops_cleanly_on(libc::SIGINT);
}
