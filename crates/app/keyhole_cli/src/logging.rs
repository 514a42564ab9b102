pub mod formats;

use flexi_logger::{Logger, LoggerHandle};

use crate::Error;

/// Log specification for the `-v`/`-q` flags.
pub fn level_spec(verbose: u8, quiet: bool) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    }
}

/// Start logging to stderr so command output on stdout stays pipeable.
///
/// The returned handle must be held until the process exits.
pub fn init(spec: &str) -> Result<LoggerHandle, Error> {
    let handle = Logger::try_with_env_or_str(spec)?
        .format(formats::cli_format)
        .log_to_stderr()
        .start()?;

    Ok(handle)
}
