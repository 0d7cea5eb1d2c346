//! End-to-end runs of the warden binary with `sh` standing in for the runtime
//! and small shell scripts standing in for the companion script.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};

fn write_config(dir: &Path, runtime: &str, group: &str) -> PathBuf {
    let path = dir.join("warden.toml");
    let contents = format!(
        "[target]\n\
         endpoint = \"https://example.com/hook\"\n\
         group = \"{group}\"\n\
         \n\
         [runtime]\n\
         command = \"{runtime}\"\n\
         probe_args = [\"-c\", \"exit 0\"]\n\
         install_hint = \"https://example.com/install-sh\"\n\
         \n\
         [script]\n\
         path = \"stub.sh\"\n\
         \n\
         [shutdown]\n\
         grace_period_secs = 1\n"
    );
    std::fs::write(&path, contents).unwrap();
    path
}

fn write_stub(dir: &Path, body: &str) {
    std::fs::write(dir.join("stub.sh"), body).unwrap();
}

fn warden(config: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_warden"));
    cmd.arg("--config").arg(config).env("RUST_LOG", "warden=info");
    cmd
}

fn run(config: &Path) -> Output {
    warden(config).stdin(Stdio::null()).output().unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Start warden with piped stdout and block until `line` is printed.
fn spawn_until_line(config: &Path, line: &str) -> (Child, BufReader<std::process::ChildStdout>) {
    let mut child = warden(config)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let mut reader = BufReader::new(child.stdout.take().unwrap());
    let mut buf = String::new();
    loop {
        buf.clear();
        let n = reader.read_line(&mut buf).unwrap();
        assert!(n > 0, "warden exited before printing {line:?}");
        if buf.trim() == line {
            break;
        }
    }
    (child, reader)
}

fn wait_with_deadline(child: &mut Child, limit: Duration) -> std::process::ExitStatus {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("warden did not exit within {limit:?}");
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_forwards_child_output_and_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sh", "My Group");
    write_stub(dir.path(), "echo READY\nexit 0\n");

    let output = run(&config);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(stdout(&output).lines().any(|l| l == "READY"));
}

#[test]
fn test_child_receives_endpoint_and_group_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sh", "My Group");
    write_stub(dir.path(), "printf 'ARG1=%s\\nARG2=%s\\n' \"$1\" \"$2\"\n");

    let output = run(&config);
    let out = stdout(&output);
    assert_eq!(output.status.code(), Some(0));
    assert!(out.contains("ARG1=https://example.com/hook"));
    assert!(out.contains("ARG2=My Group"));
}

#[test]
fn test_runtime_missing_exits_without_spawning() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "nonexistent-runtime-xyz", "My Group");
    write_stub(dir.path(), "touch spawned\n");

    let output = run(&config);
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("https://example.com/install-sh"));
    assert!(!dir.path().join("spawned").exists());
}

#[test]
fn test_script_missing_exits_with_distinct_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sh", "My Group");

    let output = run(&config);
    assert_eq!(output.status.code(), Some(4));
    assert!(stderr(&output).contains("stub.sh"));
}

#[test]
fn test_placeholder_group_fails_before_preflight() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "nonexistent-runtime-xyz", "CHANGE ME");

    let output = run(&config);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("placeholder"));
}

#[test]
fn test_abnormal_child_exit_propagates_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sh", "My Group");
    write_stub(dir.path(), "exit 7\n");

    let output = run(&config);
    assert_eq!(output.status.code(), Some(7));
    assert!(stderr(&output).contains("exited abnormally"));
}

#[test]
fn test_dry_run_does_not_launch() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sh", "My Group");
    write_stub(dir.path(), "touch spawned\n");

    let output = warden(&config).arg("--dry-run").output().unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("'My Group'"));
    assert!(!dir.path().join("spawned").exists());
}

#[test]
fn test_init_writes_template() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("warden.toml");

    let output = warden(&config).arg("--init").output().unwrap();
    assert_eq!(output.status.code(), Some(0));
    let written = std::fs::read_to_string(&config).unwrap();
    assert!(written.contains("[target]"));

    // Unedited template is rejected.
    let output = run(&config);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_example_endpoint_needs_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sh", "My Group");
    write_stub(dir.path(), "echo READY\n");

    let mut no_confirm = warden(&config);
    no_confirm.args(["--endpoint", "https://httpbin.org/post"]);
    let output = no_confirm.stdin(Stdio::null()).output().unwrap();
    assert_eq!(output.status.code(), Some(2));

    let mut confirmed = warden(&config);
    confirmed.args(["--endpoint", "https://httpbin.org/post", "--yes"]);
    let output = confirmed.stdin(Stdio::null()).output().unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("READY"));
}

#[test]
fn test_sigint_stops_child_gracefully() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sh", "My Group");
    write_stub(
        dir.path(),
        "trap 'echo STOPPING; exit 0' TERM\necho READY\nwhile :; do sleep 0.05; done\n",
    );

    let (mut child, mut reader) = spawn_until_line(&config, "READY");
    kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).unwrap();

    let status = wait_with_deadline(&mut child, Duration::from_secs(10));
    let mut rest = String::new();
    reader.read_to_string(&mut rest).unwrap();

    assert_eq!(status.code(), Some(0));
    assert!(rest.contains("STOPPING"));
    assert!(rest.contains("Companion process stopped."));
}

#[test]
fn test_child_ignoring_sigterm_is_killed_after_grace_period() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sh", "My Group");
    write_stub(
        dir.path(),
        "trap '' TERM\necho READY\nwhile :; do sleep 0.05; done\n",
    );

    let (mut child, _reader) = spawn_until_line(&config, "READY");
    let started = Instant::now();
    let pid = Pid::from_raw(child.id() as i32);
    kill(pid, Signal::SIGINT).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    // A second request during shutdown changes nothing.
    let _ = kill(pid, Signal::SIGINT);

    let status = wait_with_deadline(&mut child, Duration::from_secs(10));
    assert_eq!(status.code(), Some(137));
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_sighup_stops_child_like_ctrl_c() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sh", "My Group");
    write_stub(
        dir.path(),
        "trap 'echo STOPPING; exit 0' TERM\necho READY\nwhile :; do sleep 0.05; done\n",
    );

    let (mut child, mut reader) = spawn_until_line(&config, "READY");
    kill(Pid::from_raw(child.id() as i32), Signal::SIGHUP).unwrap();

    let status = wait_with_deadline(&mut child, Duration::from_secs(10));
    let mut rest = String::new();
    reader.read_to_string(&mut rest).unwrap();

    assert_eq!(status.code(), Some(0));
    assert!(rest.contains("STOPPING"));
}

#[test]
fn test_sigterm_during_slow_runtime_check_launches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sh", "My Group");
    let slow = std::fs::read_to_string(&config)
        .unwrap()
        .replace("\"exit 0\"", "\"sleep 30\"");
    std::fs::write(&config, slow).unwrap();
    write_stub(dir.path(), "touch spawned\n");

    let (mut child, mut reader) = spawn_until_line(&config, "Press Ctrl+C to stop.");
    let started = Instant::now();
    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).unwrap();

    let status = wait_with_deadline(&mut child, Duration::from_secs(10));
    let mut rest = String::new();
    reader.read_to_string(&mut rest).unwrap();

    assert_eq!(status.code(), Some(0));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(rest.contains("Stopped before launching"));
    assert!(!dir.path().join("spawned").exists());
}
