//! CSV export of real-time step records.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::sim::types::StepRecord;

/// Column header of the step telemetry file.
const HEADER: &str = "time_s,time_hr,price,consumption_w,generation_w,net_w,planning_requested";

/// Exports step records to a CSV file at the given path.
///
/// # Arguments
///
/// * `records` - Complete run records
/// * `path` - Output file path
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(records: &[StepRecord], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    write_csv(records, io::BufWriter::new(file))
}

/// Writes step records as CSV to any writer.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(records: &[StepRecord], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(HEADER.split(','))?;
    for r in records {
        wtr.write_record(&[
            r.time.to_string(),
            format!("{:.2}", r.time as f64 / 3600.0),
            format!("{:.4}", r.price),
            format!("{:.1}", r.consumption_w),
            format!("{:.1}", r.generation_w),
            format!("{:.1}", r.net_w()),
            r.planning_requested.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
