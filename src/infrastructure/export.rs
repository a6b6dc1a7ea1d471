//! Result set export (CSV / JSON)

pub mod csv_exporter;
pub mod json_exporter;

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use csv_exporter::CsvExporter;
pub use json_exporter::JsonExporter;

use crate::domain::product::ProductRecord;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Export I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON export error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Writes a record set to `destination` and returns the written path
pub trait Exporter: Send + Sync {
    fn export(&self, records: &[ProductRecord], destination: &Path) -> Result<PathBuf, ExportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }

    pub fn exporter(self) -> Box<dyn Exporter> {
        match self {
            Self::Csv => Box::new(CsvExporter::default()),
            Self::Json => Box::new(JsonExporter),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// `<prefix>_<COMPLETE|PARTIAL>_<YYYYmmdd_HHMMSS>.<ext>`
pub fn export_file_name(prefix: &str, complete: bool, format: ExportFormat, at: DateTime<Local>) -> String {
    let status = if complete { "COMPLETE" } else { "PARTIAL" };
    format!(
        "{prefix}_{status}_{}.{}",
        at.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

pub(crate) fn ensure_parent_dir(destination: &Path) -> Result<(), ExportError> {
    if let Some(dir) = destination.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_export_file_name() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            export_file_name("scraped_products", false, ExportFormat::Csv, at),
            "scraped_products_PARTIAL_20240309_140507.csv"
        );
        assert_eq!(
            export_file_name("catalog", true, ExportFormat::Json, at),
            "catalog_COMPLETE_20240309_140507.json"
        );
    }
}
