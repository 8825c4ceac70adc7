//! Host dependency check run before anything is written.

use tracing::debug;

use crate::error::RsimgstrapError;

/// Looks up every command on `PATH` and reports all missing ones at once.
///
/// Duplicates are checked once; the order of `commands` is kept in the error.
pub fn check_commands<S: AsRef<str>>(commands: &[S]) -> Result<(), RsimgstrapError> {
    let mut checked: Vec<&str> = Vec::new();
    let mut missing = Vec::new();

    for command in commands.iter().map(AsRef::as_ref) {
        if checked.contains(&command) {
            continue;
        }
        checked.push(command);
        match which::which(command) {
            Ok(path) => debug!("found {} at {}", command, path.display()),
            Err(_) => missing.push(command.to_string()),
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(RsimgstrapError::MissingDependency { commands: missing })
    }
}
