use anyhow::Result;

use crate::SessionArgs;
use crate::ui;

/// Print the repository chain a session would start with.
pub fn repos(args: &SessionArgs) -> Result<()> {
    let session = super::open_session(args, false)?;
    let mut stdout = std::io::stdout().lock();
    ui::print_repositories(&mut stdout, &session.repositories())?;
    Ok(())
}
