//! Progress reporter that prints one line per event to stderr.

use crossterm::style::Stylize;
use rdep_core::Reporter;
use rdep_core::schema::{ModuleId, Revision};

use super::format_size;

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        eprintln!("{}", title.bold());
    }

    fn resolving(&self, module: &ModuleId, revision: &Revision) {
        eprintln!("  {}", format!("{module}:{revision}").dark_grey());
    }

    fn downloading(&self, _module: &ModuleId, _revision: &Revision, file: &str) {
        eprintln!("  {} {}", "↓".cyan(), file.dark_grey());
    }

    fn done(&self, module: &ModuleId, revision: &Revision, detail: &str, size: Option<u64>) {
        let size = size.map(format_size).unwrap_or_default();
        eprintln!(
            "  {} {module}:{revision} {} {}",
            "✓".green(),
            detail.dark_grey(),
            size.dark_grey()
        );
    }

    fn failed(&self, module: &ModuleId, reason: &str) {
        eprintln!("  {} {module} {}", "✗".red(), reason.red());
    }

    fn warning(&self, msg: &str) {
        eprintln!("  {} {}", "!".yellow(), msg.yellow());
    }

    fn summary(&self, resolved: usize, downloaded: usize, elapsed_secs: f64) {
        eprintln!(
            "{}",
            format!("  {resolved} artifacts, {downloaded} downloaded in {elapsed_secs:.1}s").dark_grey()
        );
    }
}
