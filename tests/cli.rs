use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn backfill_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("backfill");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let articles = root.join("articles");
    fs::create_dir_all(articles.join("2025")).unwrap();
    fs::write(
        articles.join("2025/alpha.md"),
        "# Alpha\n\nA post about tidal pools.\n\n![tide pool](placeholder.jpg)\n",
    )
    .unwrap();
    fs::write(articles.join("beta.md"), "# Beta\n\nNo images at all.\n").unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_content = format!(
        r#"[scan]
root = "{}/articles"

[run]
summary_path = "{}/summary.txt"
"#,
        root.display(),
        root.display()
    );
    let config_path = config_dir.join("backfill.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_backfill(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = backfill_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("GEMINI_API_KEY")
        .env_remove("CLOUDINARY_CLOUD_NAME")
        .env_remove("CLOUDINARY_API_KEY")
        .env_remove("CLOUDINARY_API_SECRET")
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run backfill binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_scan_lists_markers() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_backfill(&config, &["scan"]);
    assert!(success, "scan failed: {}", stderr);
    assert!(stdout.contains("DOCUMENT"));
    assert!(stdout.contains("2025/alpha.md"));
    assert!(stdout.contains("placeholder.jpg"));
    assert!(stdout.contains("markers: 1 in 1 of 2 documents (0 unreadable)"));
}

#[test]
fn test_scan_root_override() {
    let (tmp, config) = setup_test_env();
    let other = tmp.path().join("other");
    fs::create_dir_all(&other).unwrap();
    let (stdout, _, success) = run_backfill(&config, &["scan", "--root", other.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("markers: 0 in 0 of 0 documents"));
}

#[test]
fn test_run_without_credentials_fails() {
    let (tmp, config) = setup_test_env();
    let (_, stderr, success) = run_backfill(&config, &["run"]);
    assert!(!success);
    assert!(stderr.contains("GEMINI_API_KEY: not set"), "stderr: {}", stderr);
    assert_eq!(
        fs::read_to_string(tmp.path().join("articles/2025/alpha.md")).unwrap(),
        "# Alpha\n\nA post about tidal pools.\n\n![tide pool](placeholder.jpg)\n"
    );
}

#[test]
fn test_invalid_config_fails() {
    let (_tmp, config) = setup_test_env();
    fs::write(&config, "[run]\nconcurrency = 0\n").unwrap();
    let (_, stderr, success) = run_backfill(&config, &["scan"]);
    assert!(!success);
    assert!(stderr.contains("concurrency"), "stderr: {}", stderr);
}

#[test]
fn test_missing_root_fails() {
    let (tmp, config) = setup_test_env();
    let missing = tmp.path().join("nope");
    let (_, stderr, success) = run_backfill(&config, &["scan", "--root", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Scan root"), "stderr: {}", stderr);
}
