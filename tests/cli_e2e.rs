//! End-to-end CLI tests for the harvester binary.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn harvester() -> Command {
    Command::cargo_bin("harvester").expect("binary is built")
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    harvester()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Crawl a site level by level"))
        .stdout(predicate::str::contains("resume"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    harvester()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("harvester"));
}

/// Test that a subcommand is required.
#[test]
fn test_binary_without_subcommand_fails() {
    harvester().assert().failure().stderr(predicate::str::contains("Usage"));
}

/// Test that invalid flags cause non-zero exit.
#[test]
fn test_binary_invalid_flag_returns_error() {
    harvester()
        .arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_crawl_with_missing_config_fails() {
    let dir = TempDir::new().expect("temp dir");
    harvester()
        .arg("crawl")
        .arg(dir.path().join("missing.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn test_crawl_with_invalid_config_fails() {
    let dir = TempDir::new().expect("temp dir");
    let config = dir.path().join("site.toml");
    fs::write(&config, "target = \"ftp://example.com\"\n[[levels]]\n").expect("write config");
    harvester()
        .arg("crawl")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("target"));
}

#[test]
fn test_merge_joins_chunk_directories() {
    let dir = TempDir::new().expect("temp dir");
    let chunk_dir = dir.path().join("movie.mp4.chunk");
    fs::create_dir(&chunk_dir).expect("create chunk dir");
    fs::write(chunk_dir.join("movie.mp4.chunk_1"), b"hello ").expect("write chunk");
    fs::write(chunk_dir.join("movie.mp4.chunk_2"), b"world").expect("write chunk");

    harvester().arg("-q").arg("merge").arg(dir.path()).assert().success();

    let merged = fs::read(dir.path().join("movie.mp4")).expect("merged file");
    assert_eq!(merged, b"hello world");
    assert!(chunk_dir.exists(), "chunk directory is kept");
}

#[test]
fn test_merge_reports_missing_chunk() {
    let dir = TempDir::new().expect("temp dir");
    let chunk_dir = dir.path().join("movie.mp4.chunk");
    fs::create_dir(&chunk_dir).expect("create chunk dir");
    fs::write(chunk_dir.join("movie.mp4.chunk_1"), b"a").expect("write chunk");
    fs::write(chunk_dir.join("movie.mp4.chunk_3"), b"c").expect("write chunk");

    harvester()
        .arg("merge")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to merge chunks"));
}

fn write_config(dir: &Path, target: &str) -> PathBuf {
    let config = dir.join("site.toml");
    let body = format!(
        r#"
target = "{target}"
output_dir = "{out}"
state_dir = "{state}"
capacity_retry_ms = 10

[scheduler]
interval_ms = 10

[[levels]]
[[levels.rules]]
selector = "a.video"
fields = {{ url = {{ from = "link" }}, title = {{ from = "text" }} }}
"#,
        out = dir.join("out").display(),
        state = dir.join("state").display(),
    );
    fs::write(&config, body).expect("write config");
    config
}

#[tokio::test(flavor = "multi_thread")]
async fn test_crawl_downloads_linked_files_and_records_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<a class="video" href="/media/1.mp4">One</a><a class="video" href="/media/2.mp4">Two</a>"#,
        ))
        .mount(&server)
        .await;
    for n in 1..=2 {
        Mock::given(method("GET"))
            .and(path(format!("/media/{n}.mp4")))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(format!("video {n}").into_bytes(), "video/mp4"),
            )
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().expect("temp dir");
    let config = write_config(dir.path(), &format!("{}/list", server.uri()));
    let output = tokio::task::spawn_blocking(move || harvester().arg("crawl").arg(config).output())
        .await
        .expect("join")
        .expect("run harvester");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    // records carry no `name` field, so files are named after their urls
    let out = dir.path().join("out");
    assert_eq!(fs::read(out.join("1.mp4")).expect("first file"), b"video 1");
    assert_eq!(fs::read(out.join("2.mp4")).expect("second file"), b"video 2");

    let state = fs::read_to_string(dir.path().join("state").join("download.json"))
        .expect("download state");
    assert!(state.contains("END"));
    assert!(state.contains("/media/2.mp4"));
}
