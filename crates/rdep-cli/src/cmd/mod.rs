//! Subcommand implementations.

pub mod repos;
pub mod resolve;
pub mod session;

use std::sync::Arc;

use anyhow::{Context, Result};
use rdep_core::Session;

use crate::SessionArgs;
use crate::ui::ConsoleReporter;

/// Build a session from the command line; `progress` sends resolver events to stderr.
pub fn open_session(args: &SessionArgs, progress: bool) -> Result<Session> {
    let config = args.config()?;
    let session = Session::new(config).context("Failed to start session")?;
    Ok(if progress {
        session.with_reporter(Arc::new(ConsoleReporter))
    } else {
        session
    })
}
