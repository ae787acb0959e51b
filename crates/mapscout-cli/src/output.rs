//! stdout rendering. Only the final JSON document is written here.

use std::io::Write;

use mapscout_core::ListingRecord;

pub(crate) fn records_json(records: &[ListingRecord]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(records)
}

/// `{"error": "..."}` with the full context chain of `err`.
pub(crate) fn error_json(err: &anyhow::Error) -> String {
    serde_json::json!({ "error": format!("{err:#}") }).to_string()
}

/// Writes the result array to stdout.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub(crate) fn print_records(records: &[ListingRecord]) -> anyhow::Result<()> {
    let json = records_json(records)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{json}")?;
    stdout.flush()?;
    Ok(())
}

pub(crate) fn print_error(err: &anyhow::Error) {
    println!("{}", error_json(err));
}
