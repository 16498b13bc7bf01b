//! Rendering of resolve reports and the repository chain.

use std::io::{self, Write};
use std::path::Path;

use crossterm::style::Stylize;
use rdep_core::schema::{DownloadStatus, RepositoryEndpoint, ResolveReport, Revision, Severity};

use super::format_size;

const MODULE_WIDTH: usize = 44;
const REVISION_WIDTH: usize = 14;

/// Artifacts, then conflicts, unresolved modules and diagnostics.
pub fn print_report(out: &mut impl Write, report: &ResolveReport) -> io::Result<()> {
    for artifact in &report.resolved_artifacts {
        let mut name = artifact.module.to_string();
        if let Some(classifier) = &artifact.classifier {
            name = format!("{name} ({classifier})");
        }
        let status = match artifact.status {
            DownloadStatus::Downloaded => "downloaded".green(),
            DownloadStatus::Cached => "cached".dark_grey(),
            DownloadStatus::Loaded => "loaded".dark_grey(),
        };
        writeln!(
            out,
            "  {:<mw$} {:<rw$} {:>9}  {}  {}",
            name,
            artifact.revision.as_str(),
            format_size(artifact.size),
            status,
            artifact.origin.as_str().dark_grey(),
            mw = MODULE_WIDTH,
            rw = REVISION_WIDTH,
        )?;
    }

    for (module, revisions) in &report.conflicts {
        let listed: Vec<&str> = revisions.iter().map(Revision::as_str).collect();
        writeln!(out, "  {} {module}: {}", "conflict".red(), listed.join(", "))?;
    }
    for module in &report.unresolved_modules {
        writeln!(out, "  {} {module}", "unresolved".red())?;
    }
    for diag in &report.errors {
        let label = match diag.severity {
            Severity::Error => "error".red(),
            Severity::Warning => "warning".yellow(),
        };
        writeln!(out, "  {label} [{}] {diag}", diag.kind)?;
    }
    Ok(())
}

/// The resolved files joined with the platform path separator.
pub fn print_class_path<'a>(
    out: &mut impl Write,
    paths: impl Iterator<Item = &'a Path>,
) -> io::Result<()> {
    let joined = std::env::join_paths(paths)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    writeln!(out, "{}", joined.to_string_lossy())
}

/// One line per endpoint, in priority order.
pub fn print_repositories(out: &mut impl Write, endpoints: &[RepositoryEndpoint]) -> io::Result<()> {
    let width = endpoints.iter().map(|e| e.name.len()).max().unwrap_or(0);
    for endpoint in endpoints {
        let mut flags = Vec::new();
        if !endpoint.layout.maven {
            flags.push("flat");
        }
        if !endpoint.layout.metadata {
            flags.push("no-metadata");
        }
        if !endpoint.layout.descriptors {
            flags.push("no-poms");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", flags.join(", "))
        };
        writeln!(
            out,
            "{:<width$}  {}{}",
            endpoint.name,
            endpoint.base_url,
            flags.dark_grey()
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdep_core::schema::{ModuleId, RepositoryLayout};

    #[test]
    fn test_print_repositories() {
        let endpoints = vec![
            RepositoryEndpoint::maven("central", "https://repo.maven.apache.org/maven2/"),
            RepositoryEndpoint::new(
                "legacy",
                "https://legacy.example.org/",
                RepositoryLayout {
                    maven: true,
                    metadata: false,
                    descriptors: true,
                },
            ),
        ];
        let mut out = Vec::new();
        print_repositories(&mut out, &endpoints).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("central  https://repo.maven.apache.org/maven2/"));
        assert!(lines[1].contains("no-metadata"));
    }

    #[test]
    fn test_print_report_lists_conflicts() {
        let mut report = ResolveReport::default();
        report.conflicts.insert(
            ModuleId::new("g", "a"),
            vec![Revision::new("1.0"), Revision::new("2.0")],
        );
        let mut out = Vec::new();
        print_report(&mut out, &report).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("g:a: 1.0, 2.0"));
    }
}
