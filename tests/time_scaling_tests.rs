//! End-to-end time scaling against small C targets
//!
//! The fixtures issue raw syscalls so the vDSO fast path never hides a time
//! read from the tracer.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serial_test::serial;
use tempfile::TempDir;

/// Compile `source` with gcc into `dir`
fn compile(dir: &Path, name: &str, source: &str) -> PathBuf {
    let source_file = dir.join(format!("{}.c", name));
    let binary = dir.join(name);
    fs::write(&source_file, source).unwrap();

    let status = std::process::Command::new("gcc")
        .arg(&source_file)
        .arg("-o")
        .arg(&binary)
        .status()
        .expect("Failed to run gcc");
    assert!(status.success(), "Failed to compile {}", name);
    binary
}

/// Run `binary` under tardis and return (stdout, wall time)
fn run_scaled(delay: &str, time: &str, binary: &Path) -> (String, Duration) {
    let start = Instant::now();
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tardis");
    let output = cmd
        .arg("--no-preload")
        .arg(delay)
        .arg(time)
        .arg(binary)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    (String::from_utf8_lossy(&output).trim().to_string(), start.elapsed())
}

const NANOSLEEP_SOURCE: &str = r#"
#include <time.h>

int main() {
    struct timespec ts = { 2, 0 };
    nanosleep(&ts, NULL);
    return 0;
}
"#;

const CLOCK_NANOSLEEP_SOURCE: &str = r#"
#include <time.h>

int main() {
    struct timespec ts = { 2, 0 };
    clock_nanosleep(CLOCK_MONOTONIC, 0, &ts, NULL);
    return 0;
}
"#;

const POLL_SOURCE: &str = r#"
#include <poll.h>
#include <stddef.h>

int main() {
    poll(NULL, 0, 2000);
    return 0;
}
"#;

const SELECT_SOURCE: &str = r#"
#include <stdio.h>
#include <unistd.h>
#include <sys/select.h>
#include <sys/syscall.h>

int main() {
    struct timeval tv = { 2, 0 };
    syscall(SYS_select, 0, NULL, NULL, NULL, &tv);
    printf("%ld.%06ld\n", (long)tv.tv_sec, (long)tv.tv_usec);
    return 0;
}
"#;

const UNNORMALIZED_SELECT_SOURCE: &str = r#"
#include <stdio.h>
#include <unistd.h>
#include <sys/select.h>
#include <sys/syscall.h>

int main() {
    struct timeval tv = { 0, 2000000 };
    syscall(SYS_select, 0, NULL, NULL, NULL, &tv);
    return 0;
}
"#;

const LIBC_SELECT_SOURCE: &str = r#"
#include <stdio.h>
#include <sys/select.h>

int main() {
    struct timeval tv = { 2, 0 };
    select(0, NULL, NULL, NULL, &tv);
    printf("%ld.%06ld\n", (long)tv.tv_sec, (long)tv.tv_usec);
    return 0;
}
"#;

const PPOLL_SOURCE: &str = r#"
#define _GNU_SOURCE
#include <poll.h>
#include <stddef.h>
#include <time.h>

int main() {
    struct timespec ts = { 2, 0 };
    ppoll(NULL, 0, &ts, NULL);
    return 0;
}
"#;

const ELAPSED_SOURCE: &str = r#"
#include <stdio.h>
#include <time.h>
#include <unistd.h>
#include <sys/syscall.h>

int main() {
    struct timespec a, b, one = { 1, 0 };
    syscall(SYS_clock_gettime, CLOCK_REALTIME, &a);
    syscall(SYS_nanosleep, &one, NULL);
    syscall(SYS_clock_gettime, CLOCK_REALTIME, &b);
    double elapsed = (b.tv_sec - a.tv_sec) + (b.tv_nsec - a.tv_nsec) / 1e9;
    printf("%.3f\n", elapsed);
    return 0;
}
"#;

const TIME_SOURCE: &str = r#"
#include <stdio.h>
#include <time.h>
#include <unistd.h>
#include <sys/syscall.h>

int main() {
    struct timespec one = { 1, 0 };
    long t0 = syscall(SYS_time, NULL);
    syscall(SYS_nanosleep, &one, NULL);
    time_t out = 0;
    long t1 = syscall(SYS_time, &out);
    printf("%ld %d\n", t1 - t0, (long)out == t1);
    return 0;
}
"#;

const GETTIMEOFDAY_SOURCE: &str = r#"
#include <stdio.h>
#include <time.h>
#include <unistd.h>
#include <sys/time.h>
#include <sys/syscall.h>

int main() {
    struct timeval a, b;
    struct timespec half = { 0, 500000000 };
    syscall(SYS_gettimeofday, &a, NULL);
    syscall(SYS_nanosleep, &half, NULL);
    syscall(SYS_gettimeofday, &b, NULL);
    double elapsed = (b.tv_sec - a.tv_sec) + (b.tv_usec - a.tv_usec) / 1e6;
    printf("%.3f\n", elapsed);
    return 0;
}
"#;

const FORK_SOURCE: &str = r#"
#include <time.h>
#include <unistd.h>
#include <sys/wait.h>

int main() {
    pid_t pid = fork();
    if (pid == 0) {
        struct timespec ts = { 2, 0 };
        nanosleep(&ts, NULL);
        return 7;
    }
    int status;
    waitpid(pid, &status, 0);
    return WEXITSTATUS(status) == 7 ? 0 : 1;
}
"#;

#[test]
#[serial]
fn test_nanosleep_is_accelerated() {
    let tmp_dir = TempDir::new().unwrap();
    let binary = compile(tmp_dir.path(), "nanosleep_test", NANOSLEEP_SOURCE);

    let (_, wall) = run_scaled("4", "1", &binary);
    assert!(wall < Duration::from_millis(1500), "took {:?}", wall);
}

#[test]
#[serial]
fn test_clock_nanosleep_is_accelerated() {
    let tmp_dir = TempDir::new().unwrap();
    let binary = compile(tmp_dir.path(), "clock_nanosleep_test", CLOCK_NANOSLEEP_SOURCE);

    let (_, wall) = run_scaled("4", "1", &binary);
    assert!(wall < Duration::from_millis(1500), "took {:?}", wall);
}

#[test]
#[serial]
fn test_poll_timeout_is_accelerated() {
    let tmp_dir = TempDir::new().unwrap();
    let binary = compile(tmp_dir.path(), "poll_test", POLL_SOURCE);

    let (_, wall) = run_scaled("4", "1", &binary);
    assert!(wall < Duration::from_millis(1500), "took {:?}", wall);
}

#[test]
#[serial]
fn test_select_timeout_is_accelerated() {
    let tmp_dir = TempDir::new().unwrap();
    let binary = compile(tmp_dir.path(), "select_test", SELECT_SOURCE);

    let (stdout, wall) = run_scaled("4", "1", &binary);
    assert!(wall < Duration::from_millis(1500), "took {:?}", wall);
    // A full timeout leaves nothing unslept
    assert_eq!(stdout, "0.000000");
}

#[test]
#[serial]
fn test_unnormalized_select_timeout_is_accelerated() {
    let tmp_dir = TempDir::new().unwrap();
    let binary = compile(tmp_dir.path(), "select_usec_test", UNNORMALIZED_SELECT_SOURCE);

    let (_, wall) = run_scaled("4", "1", &binary);
    assert!(wall < Duration::from_millis(1500), "took {:?}", wall);
}

#[test]
#[serial]
fn test_libc_select_is_accelerated() {
    let tmp_dir = TempDir::new().unwrap();
    let binary = compile(tmp_dir.path(), "libc_select_test", LIBC_SELECT_SOURCE);

    let (stdout, wall) = run_scaled("4", "1", &binary);
    assert!(wall < Duration::from_millis(1500), "took {:?}", wall);
    assert_eq!(stdout, "0.000000");
}

#[test]
#[serial]
fn test_ppoll_timeout_is_accelerated() {
    let tmp_dir = TempDir::new().unwrap();
    let binary = compile(tmp_dir.path(), "ppoll_test", PPOLL_SOURCE);

    let (_, wall) = run_scaled("4", "1", &binary);
    assert!(wall < Duration::from_millis(1500), "took {:?}", wall);
}

#[test]
#[serial]
fn test_sleep_is_decelerated() {
    let tmp_dir = TempDir::new().unwrap();
    let binary = compile(tmp_dir.path(), "slow_sleep_test", NANOSLEEP_SOURCE);

    let (_, wall) = run_scaled("0.5", "1", &binary);
    assert!(wall >= Duration::from_millis(3900), "took {:?}", wall);
}

#[test]
#[serial]
fn test_clock_reads_are_scaled() {
    let tmp_dir = TempDir::new().unwrap();
    let binary = compile(tmp_dir.path(), "elapsed_test", ELAPSED_SOURCE);

    let (stdout, _) = run_scaled("1", "2", &binary);
    let elapsed: f64 = stdout.parse().unwrap();
    assert!((1.9..2.6).contains(&elapsed), "elapsed {}", elapsed);
}

#[test]
#[serial]
fn test_identity_time_factor_leaves_reads_alone() {
    let tmp_dir = TempDir::new().unwrap();
    let binary = compile(tmp_dir.path(), "identity_test", ELAPSED_SOURCE);

    // 1s request reaches the kernel as 0.5s and reads are unscaled
    let (stdout, _) = run_scaled("2", "1", &binary);
    let elapsed: f64 = stdout.parse().unwrap();
    assert!((0.45..0.9).contains(&elapsed), "elapsed {}", elapsed);
}

#[test]
#[serial]
fn test_time_syscall_is_scaled() {
    let tmp_dir = TempDir::new().unwrap();
    let binary = compile(tmp_dir.path(), "time_test", TIME_SOURCE);

    let (stdout, _) = run_scaled("1", "10", &binary);
    let mut fields = stdout.split_whitespace();
    let delta: i64 = fields.next().unwrap().parse().unwrap();
    let out_matches = fields.next().unwrap();
    assert!((9..=12).contains(&delta), "delta {}", delta);
    assert_eq!(out_matches, "1");
}

#[test]
#[serial]
fn test_gettimeofday_is_scaled() {
    let tmp_dir = TempDir::new().unwrap();
    let binary = compile(tmp_dir.path(), "gettimeofday_test", GETTIMEOFDAY_SOURCE);

    let (stdout, _) = run_scaled("1", "4", &binary);
    let elapsed: f64 = stdout.parse().unwrap();
    assert!((1.9..2.8).contains(&elapsed), "elapsed {}", elapsed);
}

#[test]
#[serial]
fn test_forked_children_are_traced() {
    let tmp_dir = TempDir::new().unwrap();
    let binary = compile(tmp_dir.path(), "fork_test", FORK_SOURCE);

    let (_, wall) = run_scaled("4", "1", &binary);
    assert!(wall < Duration::from_millis(1500), "took {:?}", wall);
}
