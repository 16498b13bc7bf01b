//! Runs the built `rdep` binary.

use std::path::Path;
use std::process::{Command, Output};

fn rdep(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rdep"))
        .args(args)
        .env("RDEP_HOME", home)
        .env_remove("RDEP_CACHE")
        .env_remove("RDEP_WORKERS")
        .env_remove("RDEP_TIMEOUT_SECS")
        .env("NO_COLOR", "1")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_repos_lists_default_chain() {
    let home = tempfile::tempdir().unwrap();
    let output = rdep(home.path(), &["repos"]);
    assert!(output.status.success());
    let names: Vec<String> = stdout(&output)
        .lines()
        .filter_map(|l| l.split_whitespace().next().map(str::to_string))
        .collect();
    assert_eq!(names, vec!["central", "jcenter", "jboss", "atlassian"]);
}

#[test]
fn test_repos_honours_flags_and_config_file() {
    let home = tempfile::tempdir().unwrap();
    std::fs::write(
        home.path().join("config.toml"),
        "[[repositories]]\nname = \"internal\"\nurl = \"https://m2.example.org/releases\"\n",
    )
    .unwrap();
    let output = rdep(
        home.path(),
        &["repos", "--no-default-repos", "--repo", "local=http://localhost:8081/"],
    );
    assert!(output.status.success());
    let text = stdout(&output);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("internal"));
    assert!(lines[0].contains("https://m2.example.org/releases/"));
    assert!(lines[1].starts_with("local"));
}

#[test]
fn test_duplicate_repository_flag_fails() {
    let home = tempfile::tempdir().unwrap();
    let output = rdep(home.path(), &["repos", "--repo", "central=http://localhost:1/"]);
    assert!(!output.status.success());
    let err = String::from_utf8_lossy(&output.stderr);
    assert!(err.contains("central"), "{err}");
}

#[test]
fn test_resolve_rejects_bad_coordinates() {
    let home = tempfile::tempdir().unwrap();
    let output = rdep(home.path(), &["resolve", "--no-default-repos", "not-a-coordinate"]);
    assert!(!output.status.success());
    let err = String::from_utf8_lossy(&output.stderr);
    assert!(err.contains("Invalid coordinates 'not-a-coordinate'"), "{err}");
}

#[test]
fn test_resolve_json_report() {
    let mut server = mockito::Server::new();
    let _pom = server
        .mock("GET", "/org/example/lib/1.0/lib-1.0.pom")
        .with_body(
            "<project><modelVersion>4.0.0</modelVersion><groupId>org.example</groupId>\
             <artifactId>lib</artifactId><version>1.0</version></project>",
        )
        .create();
    let _jar = server
        .mock("GET", "/org/example/lib/1.0/lib-1.0.jar")
        .with_body("jar bytes")
        .create();

    let home = tempfile::tempdir().unwrap();
    let repo = format!("local={}", server.url());
    let output = rdep(
        home.path(),
        &["resolve", "--no-default-repos", "--repo", &repo, "--json", "org.example:lib:1.0"],
    );
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let artifacts = report["resolved_artifacts"].as_array().unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0]["origin"], "local");
    assert_eq!(artifacts[0]["size"], 9);
    let path = artifacts[0]["local_path"].as_str().unwrap();
    assert!(path.starts_with(home.path().join("cache").to_str().unwrap()));
    assert_eq!(std::fs::read_to_string(path).unwrap(), "jar bytes");
}

#[test]
fn test_resolve_reports_missing_module() {
    let mut server = mockito::Server::new();
    let _missing = server
        .mock("GET", mockito::Matcher::Any)
        .with_status(404)
        .create();

    let home = tempfile::tempdir().unwrap();
    let repo = format!("local={}", server.url());
    let output = rdep(
        home.path(),
        &["resolve", "--no-default-repos", "--repo", &repo, "org.example:gone:1.0"],
    );
    assert!(!output.status.success());
    let text = stdout(&output);
    let line = text.lines().find(|l| l.contains("unresolved")).unwrap();
    assert!(line.contains("org.example:gone"), "{text}");
    assert!(String::from_utf8_lossy(&output.stderr).contains("Resolution finished with"));
}

#[test]
fn test_session_over_stdin() {
    use std::io::Write;
    use std::process::Stdio;

    let home = tempfile::tempdir().unwrap();
    let mut child = Command::new(env!("CARGO_BIN_EXE_rdep"))
        .args(["session", "--no-default-repos"])
        .env("RDEP_HOME", home.path())
        .env("NO_COLOR", "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"add org.example:lib:1.0\npolicy latest-revision\ndeps\nquit\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();

    assert!(output.status.success());
    assert_eq!(
        stdout(&output).lines().collect::<Vec<_>>(),
        vec![
            "ok added org.example:lib:1.0",
            "ok policy latest-revision",
            "org.example:lib:1.0",
            "ok",
            "ok bye",
        ]
    );
}
