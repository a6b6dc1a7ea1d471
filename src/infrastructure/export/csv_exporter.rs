use std::path::{Path, PathBuf};

use super::{ensure_parent_dir, ExportError, Exporter};
use crate::domain::product::ProductRecord;

const HEADER: [&str; 14] = [
    "ID",
    "Product Name",
    "Price",
    "Currency",
    "Raw Price Text",
    "SKU",
    "Brand",
    "Category",
    "Stock Status",
    "Description",
    "Primary Image URL",
    "Total Images",
    "Source URL",
    "Scraped Date",
];

/// Spreadsheet-friendly CSV, one row per product
pub struct CsvExporter {
    description_limit: usize,
}

impl Default for CsvExporter {
    fn default() -> Self {
        Self { description_limit: 200 }
    }
}

impl CsvExporter {
    fn description(&self, record: &ProductRecord) -> String {
        let Some(description) = record.description.as_deref() else {
            return String::new();
        };
        if description.chars().count() > self.description_limit {
            let cut: String = description.chars().take(self.description_limit).collect();
            format!("{cut}...")
        } else {
            description.to_string()
        }
    }
}

impl Exporter for CsvExporter {
    fn export(&self, records: &[ProductRecord], destination: &Path) -> Result<PathBuf, ExportError> {
        ensure_parent_dir(destination)?;
        let mut writer = csv::Writer::from_path(destination)?;
        writer.write_record(HEADER)?;

        for (index, record) in records.iter().enumerate() {
            let opt = |value: &Option<String>| value.clone().unwrap_or_default();
            writer.write_record([
                (index + 1).to_string(),
                record.name.clone(),
                record.price.as_ref().map(|p| format!("{:.2}", p.amount)).unwrap_or_default(),
                record.price.as_ref().map(|p| p.currency.clone()).unwrap_or_default(),
                opt(&record.raw_price_text),
                opt(&record.sku),
                opt(&record.brand),
                opt(&record.category),
                opt(&record.stock_status),
                self.description(record),
                record.images.first().cloned().unwrap_or_default(),
                record.images.len().to_string(),
                record.source_url.clone(),
                record.scraped_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ])?;
        }

        writer.flush()?;
        tracing::info!("📊 Exported {} records to {:?}", records.len(), destination);
        Ok(destination.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::product::Price;
    use tempfile::tempdir;

    #[test]
    fn test_csv_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("products.csv");

        let mut battery = ProductRecord::new("https://shop.test/product/b", "Battery, 200Ah");
        battery.price = Some(Price::new(28_500.0, "KES"));
        battery.images = vec!["https://shop.test/b1.jpg".to_string(), "https://shop.test/b2.jpg".to_string()];
        battery.description = Some("x".repeat(250));
        let lamp = ProductRecord::new("https://shop.test/product/l", "Lamp");

        let written = CsvExporter::default().export(&[battery, lamp], &path).unwrap();
        assert_eq!(written, path);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), HEADER.len());
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "Battery, 200Ah");
        assert_eq!(&rows[0][2], "28500.00");
        assert_eq!(&rows[0][3], "KES");
        assert_eq!(rows[0][9].len(), 203);
        assert_eq!(&rows[0][11], "2");
        assert_eq!(&rows[1][0], "2");
        assert_eq!(&rows[1][2], "");
    }
}
