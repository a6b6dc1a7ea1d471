use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{ensure_parent_dir, ExportError, Exporter};
use crate::domain::product::ProductRecord;

/// Pretty-printed JSON array of records
pub struct JsonExporter;

impl Exporter for JsonExporter {
    fn export(&self, records: &[ProductRecord], destination: &Path) -> Result<PathBuf, ExportError> {
        ensure_parent_dir(destination)?;
        let mut writer = BufWriter::new(File::create(destination)?);
        serde_json::to_writer_pretty(&mut writer, records)?;
        writer.flush()?;
        tracing::info!("📊 Exported {} records to {:?}", records.len(), destination);
        Ok(destination.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_json_export_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("products.json");
        let records = vec![ProductRecord::new("https://shop.test/product/a", "Fan")];

        JsonExporter.export(&records, &path).unwrap();

        let back: Vec<ProductRecord> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, records);
    }
}
