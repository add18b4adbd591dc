//! End-to-end tests: drive the `sstable-tool` binary through stdin.
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// Runs one session against `data_dir` and returns its stdout.
fn run_cli_command(data_dir: &Path, version: &str, command: &str) -> String {
    use std::io::Write;
    use std::process::{Command, Stdio};

    let mut child = Command::new(env!("CARGO_BIN_EXE_sstable-tool"))
        .env("SSTABLE_DATA_DIR", data_dir)
        .env("SSTABLE_FORMAT_VERSION", version)
        .env("SSTABLE_COLUMN_INDEX_KB", "1")
        .env("SSTABLE_SYNC", "false")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn sstable-tool");

    {
        // The tool may exit before reading everything (bad config).
        let stdin = child.stdin.as_mut().expect("Failed to open stdin");
        let _ = stdin
            .write_all(command.as_bytes())
            .and_then(|()| stdin.write_all(b"EXIT\n"));
    }

    let output = child.wait_with_output().expect("Failed to read output");
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn committed_tables(dir: &Path) -> Vec<String> {
    let mut tocs: Vec<String> = fs::read_dir(dir)
        .expect("data dir exists")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with("-TOC.txt"))
        .collect();
    tocs.sort();
    tocs
}

#[test]
fn test_put_get_before_and_after_flush() {
    let dir = tempdir().unwrap();
    let output = run_cli_command(
        dir.path(),
        "nb",
        "PUT user1 name Alice Smith\nGET user1\nFLUSH\nGET user1\n",
    );

    assert_eq!(output.matches("name = Alice Smith").count(), 2, "{}", output);
    assert!(output.contains("nb-1-big (1 partitions, 1 cells)"), "{}", output);
    assert_eq!(committed_tables(dir.path()), ["nb-1-big-TOC.txt"]);
}

#[test]
fn test_exit_flushes_pending_writes() {
    let dir = tempdir().unwrap();
    run_cli_command(dir.path(), "nb", "PUT a v 1\nPUT b v 2\n");
    assert_eq!(committed_tables(dir.path()).len(), 1);

    let output = run_cli_command(dir.path(), "nb", "GET a\nGET b\nKEYS\n");
    assert!(output.contains("v = 1"), "{}", output);
    assert!(output.contains("v = 2"), "{}", output);
    assert!(output.contains("(2 keys)"), "{}", output);
}

#[test]
fn test_exit_with_nothing_pending_writes_nothing() {
    let dir = tempdir().unwrap();
    let output = run_cli_command(dir.path(), "nb", "GET missing\n");
    assert!(output.contains("(nil)"));
    assert!(output.contains("nothing to flush"));
    assert!(committed_tables(dir.path()).is_empty());
}

#[test]
fn test_delete_across_tables() {
    let dir = tempdir().unwrap();
    let output = run_cli_command(
        dir.path(),
        "nb",
        "PUT k col v\nFLUSH\nDEL k\nGET k\nFLUSH\nGET k\n",
    );
    assert!(!output.contains("col = v"), "{}", output);
    assert_eq!(output.matches("(nil)").count(), 2, "{}", output);
}

#[test]
fn test_static_cells() {
    let dir = tempdir().unwrap();
    let output = run_cli_command(dir.path(), "nb", "STATIC k shared s\nPUT k col v\nFLUSH\nGET k\n");
    assert!(output.contains("static shared = s"), "{}", output);
    assert!(output.contains("col = v"), "{}", output);
}

#[test]
fn test_probe_has_no_false_negatives() {
    let dir = tempdir().unwrap();
    let mut script = String::new();
    for i in 0..100 {
        script.push_str(&format!("PUT key{} v {}\n", i, i));
    }
    script.push_str("FLUSH\n");
    for i in 0..100 {
        script.push_str(&format!("PROBE key{}\n", i));
    }
    let output = run_cli_command(dir.path(), "nb", &script);
    assert_eq!(output.matches("-> maybe").count(), 100, "{}", output);
    assert!(!output.contains("-> absent"));
}

#[test]
fn test_legacy_version_tables() {
    let dir = tempdir().unwrap();
    run_cli_command(dir.path(), "ma", "PUT k v 1\n");
    assert_eq!(committed_tables(dir.path()), ["ma-1-big-TOC.txt"]);

    let filter = fs::read(dir.path().join("ma-1-big-Filter.db")).unwrap();
    assert_eq!(filter.len() % 8, 4, "legacy filter header is 12 bytes");

    let output = run_cli_command(dir.path(), "ma", "GET k\n");
    assert!(output.contains("v = 1"), "{}", output);
}

#[test]
fn test_generations_increase_across_sessions() {
    let dir = tempdir().unwrap();
    run_cli_command(dir.path(), "nb", "PUT a v 1\nFLUSH\nPUT b v 2\nFLUSH\n");
    run_cli_command(dir.path(), "nb", "PUT c v 3\n");
    assert_eq!(
        committed_tables(dir.path()),
        ["nb-1-big-TOC.txt", "nb-2-big-TOC.txt", "nb-3-big-TOC.txt"]
    );

    let output = run_cli_command(dir.path(), "nb", "STATS\n");
    assert!(output.contains("tables: 3"), "{}", output);
}

#[test]
fn test_usage_errors() {
    let dir = tempdir().unwrap();
    let output = run_cli_command(dir.path(), "nb", "PUT onlykey\nGET\nDEL\nPROBE\nBOGUS\n");
    assert!(output.contains("ERR usage: PUT key column value"));
    assert!(output.contains("ERR usage: GET key"));
    assert!(output.contains("ERR usage: DEL key"));
    assert!(output.contains("ERR usage: PROBE key"));
    assert!(output.contains("unknown command: BOGUS"));
}

#[test]
fn test_invalid_config_refuses_to_start() {
    let dir = tempdir().unwrap();
    let output = run_cli_command(dir.path(), "zz", "PUT a v 1\n");
    assert!(!output.contains("sstable-tool started"));
    assert!(committed_tables(dir.path()).is_empty());
}
