use std::io::Write;

use flexi_logger::{DeferredNow, Record, style};

/// `HH:MM:SS.mmm LEVEL message`, level colored when writing to a terminal.
pub fn cli_format(
    w: &mut dyn Write,
    now: &mut DeferredNow,
    record: &Record,
) -> Result<(), std::io::Error> {
    let level = record.level();
    write!(
        w,
        "{} {:<5} {}",
        now.format("%H:%M:%S%.3f"),
        style(level).paint(level.to_string()),
        record.args()
    )
}
