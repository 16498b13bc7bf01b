//! Line-oriented session: one command per input line, and every response
//! ends with a line starting `ok` or `error`.
//!
//! Newly resolved artifacts are announced as `load <path>` lines, once per
//! artifact for the lifetime of the session.

use std::io::Write;

use anyhow::{Context, Result};
use rdep_core::schema::{RepositoryLayout, Severity};
use rdep_core::{ConflictPolicy, Session};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::{SessionArgs, parse_pin};

const HELP: &str = "\
add <group:artifact[:ext[:classifier]]:version>  declare a dependency
override <group:artifact:version>              pin a module everywhere in the graph
repo <name> <url>                              append a repository
policy [name]                                  show or set the conflict policy
resolve                                        resolve and load new artifacts
repos | deps | loaded                          show session state
quit                                           end the session";

enum Flow {
    Continue,
    Quit,
}

/// Serve commands from stdin until EOF or `quit`.
pub async fn session(args: &SessionArgs) -> Result<()> {
    let session = super::open_session(args, true)?;
    let input = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    serve(&session, input, &mut stdout).await
}

/// Run the command loop over any line source and sink.
pub async fn serve<R, W>(session: &Session, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read command")? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        tracing::debug!("session command: {line}");
        let flow = match execute(session, line, out).await {
            Ok(flow) => flow,
            Err(e) => {
                writeln!(out, "error {e:#}")?;
                Flow::Continue
            }
        };
        out.flush()?;
        if matches!(flow, Flow::Quit) {
            break;
        }
    }
    Ok(())
}

fn argument<'a>(rest: &'a str, usage: &str) -> Result<&'a str> {
    if rest.is_empty() {
        anyhow::bail!("usage: {usage}");
    }
    Ok(rest)
}

async fn execute<W: Write>(session: &Session, line: &str, out: &mut W) -> Result<Flow> {
    let (command, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(c, r)| (c, r.trim()));

    match command {
        "add" => {
            let dependency = session.add_dependency(argument(rest, "add <coords>")?)?;
            writeln!(out, "ok added {dependency}")?;
        }
        "override" => {
            let (module, revision) = parse_pin(argument(rest, "override <g:a:v>")?)?;
            let previous = session.add_override(module.clone(), &revision)?;
            match previous {
                Some(prev) if prev.as_str() != revision => {
                    writeln!(out, "ok {module} pinned to {revision} (was {prev})")?;
                }
                _ => writeln!(out, "ok {module} pinned to {revision}")?,
            }
        }
        "repo" => {
            let (name, url) = rest
                .split_once(char::is_whitespace)
                .context("usage: repo <name> <url>")?;
            session.add_repository(name, url.trim(), RepositoryLayout::MAVEN)?;
            writeln!(out, "ok added repository {name}")?;
        }
        "policy" => {
            if rest.is_empty() {
                writeln!(out, "ok {}", session.conflict_policy())?;
            } else {
                let policy: ConflictPolicy = rest.parse().map_err(anyhow::Error::msg)?;
                session.set_conflict_policy(policy);
                writeln!(out, "ok policy {policy}")?;
            }
        }
        "resolve" => resolve(session, out).await?,
        "repos" => {
            for endpoint in session.repositories() {
                writeln!(out, "{} {}", endpoint.name, endpoint.base_url)?;
            }
            writeln!(out, "ok")?;
        }
        "deps" => {
            for dependency in session.direct_dependencies() {
                writeln!(out, "{dependency}")?;
            }
            for pin in session.overrides() {
                writeln!(out, "override {}:{}", pin.module, pin.revision)?;
            }
            writeln!(out, "ok")?;
        }
        "loaded" => {
            for artifact in session.loaded_artifacts() {
                writeln!(
                    out,
                    "{}:{} {}",
                    artifact.module,
                    artifact.revision,
                    artifact.local_path.display()
                )?;
            }
            writeln!(out, "ok")?;
        }
        "help" => writeln!(out, "{HELP}\nok")?,
        "quit" | "exit" => {
            writeln!(out, "ok bye")?;
            return Ok(Flow::Quit);
        }
        other => anyhow::bail!("unknown command '{other}' (try 'help')"),
    }
    Ok(Flow::Continue)
}

async fn resolve<W: Write>(session: &Session, out: &mut W) -> Result<()> {
    let report = session.resolve().await?;
    let fresh = session.register(&report);

    for artifact in &fresh {
        writeln!(out, "load {}", artifact.local_path.display())?;
    }
    for diag in &report.errors {
        let severity = match diag.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        writeln!(out, "diagnostic {severity} [{}] {diag}", diag.kind)?;
    }
    let suffix = if report.is_success() { "" } else { " with errors" };
    writeln!(
        out,
        "ok resolved {} artifacts, {} new{suffix}",
        report.resolved_artifacts.len(),
        fresh.len()
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdep_core::SessionConfig;
    use rdep_core::schema::RepositoryEndpoint;

    fn session(dir: &std::path::Path, repositories: Vec<RepositoryEndpoint>) -> Session {
        let mut config = SessionConfig::with_home(dir);
        config.default_repositories = false;
        config.repositories = repositories;
        Session::new(config).unwrap()
    }

    async fn run(session: &Session, script: &str) -> Vec<String> {
        let mut out = Vec::new();
        serve(session, script.as_bytes(), &mut out).await.unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_declarations_and_state() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path(), Vec::new());
        let lines = run(
            &session,
            "add org.example:lib:1.0\n\
             # comment\n\
             override g:a:2.0\n\
             override g:a:3.0\n\
             policy latest-time\n\
             policy\n\
             deps\n",
        )
        .await;
        assert_eq!(
            lines,
            vec![
                "ok added org.example:lib:1.0",
                "ok g:a pinned to 2.0",
                "ok g:a pinned to 3.0 (was 2.0)",
                "ok policy latest-time",
                "ok latest-time",
                "org.example:lib:1.0",
                "override g:a:3.0",
                "ok",
            ]
        );
    }

    #[tokio::test]
    async fn test_errors_do_not_end_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path(), Vec::new());
        let lines = run(
            &session,
            "frobnicate\nadd not-a-coordinate\nresolve\nrepo local http://localhost:1/\nrepo local http://localhost:2/\nrepos\nquit\nadd g:a:1.0\n",
        )
        .await;
        assert!(lines[0].starts_with("error unknown command 'frobnicate'"));
        assert!(lines[1].starts_with("error "));
        assert!(lines[2].starts_with("error Invalid dependency declaration: no dependencies declared"));
        assert_eq!(lines[3], "ok added repository local");
        assert_eq!(
            lines[4],
            "error Cannot add repository with name local since it already exists"
        );
        assert_eq!(lines[5], "local http://localhost:1/");
        assert_eq!(lines[6], "ok");
        assert_eq!(lines[7], "ok bye");
        assert_eq!(lines.len(), 8);
        assert!(session.direct_dependencies().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_announces_new_artifacts_once() {
        let mut server = mockito::Server::new_async().await;
        let pom = "<project><modelVersion>4.0.0</modelVersion><groupId>org.example</groupId>\
                   <artifactId>lib</artifactId><version>1.0</version></project>";
        let _pom = server
            .mock("GET", "/org/example/lib/1.0/lib-1.0.pom")
            .with_body(pom)
            .create_async()
            .await;
        let jar = server
            .mock("GET", "/org/example/lib/1.0/lib-1.0.jar")
            .with_body("jar bytes")
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let session = session(
            dir.path(),
            vec![RepositoryEndpoint::maven("local", &server.url())],
        );
        let lines = run(&session, "add org.example:lib:1.0\nresolve\nresolve\nloaded\n").await;

        assert_eq!(lines[0], "ok added org.example:lib:1.0");
        assert!(lines[1].starts_with("load "));
        assert!(lines[1].ends_with("lib-1.0.jar"));
        assert_eq!(lines[2], "ok resolved 1 artifacts, 1 new");
        assert_eq!(lines[3], "ok resolved 1 artifacts, 0 new");
        assert!(lines[4].starts_with("org.example:lib:1.0 "));
        assert_eq!(lines[5], "ok");
        jar.assert_async().await;
    }
}
