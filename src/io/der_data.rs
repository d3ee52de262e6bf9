//! CSV import of DER forecast and production series.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Deserialize;

use crate::error::DataError;

/// One row of a DER data file.
#[derive(Debug, Clone, Copy, Deserialize)]
struct DerRecord {
    forecast: f64,
    production: f64,
}

/// Day-long forecast and realised generation of a DER.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerSeries {
    pub forecast: Vec<f64>,
    pub production: Vec<f64>,
}

/// Reads a DER data file with `forecast` and `production` columns.
///
/// # Arguments
///
/// * `path` - CSV file with a header row
///
/// # Errors
///
/// Returns a `DataError` if the file cannot be opened or parsed, or holds
/// no rows.
pub fn read_der_series(path: &Path) -> Result<DerSeries, DataError> {
    let file = File::open(path)?;
    read_der_series_from(BufReader::new(file))
        .map_err(|e| match e {
            DataError::Empty(_) => DataError::Empty(path.display().to_string()),
            other => other,
        })
}

/// Reads DER series from any reader.
///
/// # Errors
///
/// Returns a `DataError` on malformed rows or an empty table.
pub fn read_der_series_from(reader: impl Read) -> Result<DerSeries, DataError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut series = DerSeries::default();
    for record in rdr.deserialize() {
        let record: DerRecord = record?;
        series.forecast.push(record.forecast);
        series.production.push(record.production);
    }
    if series.forecast.is_empty() {
        return Err(DataError::Empty("<reader>".into()));
    }
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_both_columns_in_order() {
        let data = "forecast,production\n0,0\n1500, 1400\n3000,2900\n";
        let series = read_der_series_from(data.as_bytes()).unwrap();
        assert_eq!(series.forecast, vec![0.0, 1500.0, 3000.0]);
        assert_eq!(series.production, vec![0.0, 1400.0, 2900.0]);
    }

    #[test]
    fn column_order_does_not_matter() {
        let data = "production,forecast\n10,20\n";
        let series = read_der_series_from(data.as_bytes()).unwrap();
        assert_eq!(series.forecast, vec![20.0]);
        assert_eq!(series.production, vec![10.0]);
    }

    #[test]
    fn header_only_is_empty() {
        let err = read_der_series_from("forecast,production\n".as_bytes()).unwrap_err();
        assert!(matches!(err, DataError::Empty(_)));
    }

    #[test]
    fn non_numeric_cell_is_csv_error() {
        let err = read_der_series_from("forecast,production\nsunny,1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, DataError::Csv(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_der_series(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, DataError::Io(_)));
    }
}
