use std::io::Write;

use anyhow::{Context, Result};
use rdep_core::schema::Severity;

use crate::{SessionArgs, parse_pin, ui};

/// One-shot resolution: declare, resolve, print the report and class path.
pub async fn resolve(
    args: &SessionArgs,
    coords: &[String],
    overrides: &[String],
    json: bool,
) -> Result<()> {
    let session = super::open_session(args, !json)?;

    for coords in coords {
        session
            .add_dependency(coords)
            .with_context(|| format!("Invalid coordinates '{coords}'"))?;
    }
    for pin in overrides {
        let (module, revision) = parse_pin(pin)?;
        session
            .add_override(module, &revision)
            .with_context(|| format!("Invalid override '{pin}'"))?;
    }

    let report = session.resolve().await.context("Resolution failed")?;
    session.register(&report);

    let mut stdout = std::io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut stdout, &report)?;
        writeln!(stdout)?;
    } else {
        ui::print_report(&mut stdout, &report)?;
        ui::print_class_path(&mut stdout, report.artifact_paths())?;
    }
    stdout.flush()?;

    let errors = report
        .errors
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count();
    anyhow::ensure!(
        report.is_success(),
        "Resolution finished with {errors} errors"
    );
    Ok(())
}
