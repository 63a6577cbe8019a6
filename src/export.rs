use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Format, Workbook};
use tokio::task::spawn_blocking;
use tracing::info;

use crate::record::{DatasetStore, Record};
use crate::Result;

pub const SHEET_NAME: &str = "版权数据";

/// Writes `records` to a single sheet workbook: one header row, then one row per record
/// in the given order.
pub fn write_workbook(records: &[Record], path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    let bold = Format::new().set_bold();
    for (col, header) in Record::HEADERS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *header, &bold)?;
    }
    for (row, record) in records.iter().enumerate() {
        for (col, value) in record.fields().iter().enumerate() {
            worksheet.write_string(row as u32 + 1, col as u16, *value)?;
        }
    }

    workbook.save(path)?;
    Ok(())
}

/// Exports the stored dataset of every keyword next to its JSON file.
/// Keywords without a dataset are skipped. Returns the written spreadsheet paths.
pub async fn export_all(store: &DatasetStore, keywords: &[String]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(keywords.len());
    for keyword in keywords {
        if !store.exists(keyword).await? {
            info!("No dataset for `{}`, skipping export", keyword);
            continue;
        }
        let records = store.load(keyword).await?;
        let path = store.dir().join(format!("{keyword}.xlsx"));

        let path = spawn_blocking(move || -> Result<PathBuf> {
            write_workbook(&records, &path)?;
            Ok(path)
        })
        .await??;

        info!("Exported `{}` to {}", keyword, path.display());
        written.push(path);
    }
    Ok(written)
}
