use std::path::Path;
use std::process::{Command, Output};

fn ring_matvec(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ring-matvec"))
        .args(args)
        .env_remove("RING_MATVEC_SHM")
        .env_remove("RING_MATVEC_PROCESSES")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn path_arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn two_processes_over_shared_memory() {
    let dir = tempfile::tempdir().unwrap();
    let matrix = dir.path().join("matrix.txt");
    let vector = dir.path().join("vector.txt");
    std::fs::write(&matrix, "1 2 3 4\n5 6 7 8\n9 10 11 12\n13 14 15 16\n").unwrap();
    std::fs::write(&vector, "1 0 1 0\n").unwrap();

    let output = ring_matvec(&[
        "-n",
        "2",
        path_arg(&matrix),
        "--vector",
        path_arg(&vector),
    ]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(0), "stdout: {}", stdout);
    assert!(stdout.contains("[process n°0] Final result vector : 4 12 20 28"));
    assert!(stdout.contains("[process n°1] Just received the matrix size (4) from process n°0"));
}

#[test]
fn malformed_matrix_stops_before_any_peer_starts() {
    let dir = tempfile::tempdir().unwrap();
    let matrix = dir.path().join("short.txt");
    std::fs::write(&matrix, "1 2 3\n4 5\n").unwrap();

    let output = ring_matvec(&["-n", "2", path_arg(&matrix)]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr.contains("Parse error at line 2"), "stderr: {}", stderr);
    // nobody got far enough to print a progress line
    assert!(output.stdout.is_empty());
}

#[test]
fn oversized_random_matrix_is_refused_up_front() {
    let output = ring_matvec(&["-n", "2", "--size", "8200", "--seed", "1"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
}

#[test]
fn unknown_flag_is_a_usage_error() {
    let output = ring_matvec(&["--bogus"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!output.stderr.is_empty());
}

#[test]
fn help_is_not_a_failure() {
    let output = ring_matvec(&["--help"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("--processes"));
}
