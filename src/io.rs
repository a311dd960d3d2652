//! Tabular and text file loading/export.
//!
//! Tab-delimited text is decoded with each encoding in turn until one both
//! decodes and parses. Spreadsheets are read from their first sheet.

use calamine::{open_workbook_auto, Data, Reader};
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use rust_xlsxwriter::Workbook;
use std::fs;
use std::path::Path;

use crate::error::{BatchError, Result};
use crate::table::DatasetTable;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn encodings() -> [&'static Encoding; 2] {
    [UTF_8, WINDOWS_1252]
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn decode<'a>(bytes: &'a [u8], encoding: &'static Encoding) -> Option<std::borrow::Cow<'a, str>> {
    let bytes = if encoding == UTF_8 {
        bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
    } else {
        bytes
    };
    encoding.decode_without_bom_handling_and_without_replacement(bytes)
}

/// Read a text file, trying UTF-8 then Windows-1252
pub fn read_text_with_fallback(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| BatchError::file_load(path, e))?;
    for encoding in encodings() {
        if let Some(text) = decode(&bytes, encoding) {
            return Ok(text.into_owned());
        }
        tracing::debug!("{} is not valid {}", path.display(), encoding.name());
    }
    Err(BatchError::file_load(path, "no supported text encoding matched"))
}

/// Parse decoded text. Rows with more cells than the header are rejected
/// rather than cut down to size.
fn parse_tsv(text: &str) -> std::result::Result<DatasetTable, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(text.as_bytes());

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| e.to_string())?
        .iter()
        .map(str::to_string)
        .collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| e.to_string())?;
        if record.len() > columns.len() {
            let line = record.position().map_or(0, |p| p.line());
            return Err(format!(
                "expected {} fields in line {}, saw {}",
                columns.len(),
                line,
                record.len()
            ));
        }
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(DatasetTable::new(columns, rows))
}

/// Load a tab-delimited text file with a header row
pub fn load_tsv(path: &Path) -> Result<DatasetTable> {
    let bytes = fs::read(path).map_err(|e| BatchError::file_load(path, e))?;

    for encoding in encodings() {
        let Some(text) = decode(&bytes, encoding) else {
            tracing::debug!("{} is not valid {}", path.display(), encoding.name());
            continue;
        };
        let table = parse_tsv(&text).map_err(|reason| BatchError::file_load(path, reason))?;
        if table.columns().is_empty() {
            return Err(BatchError::file_load(path, "no header row"));
        }
        tracing::debug!(
            "loaded {} rows from {} as {}",
            table.len(),
            path.display(),
            encoding.name()
        );
        return Ok(table);
    }
    Err(BatchError::file_load(path, "no supported text encoding matched"))
}

/// Load the first sheet of a spreadsheet; its first row is the header
pub fn load_spreadsheet(path: &Path) -> Result<DatasetTable> {
    let mut workbook = open_workbook_auto(path).map_err(|e| BatchError::file_load(path, e))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| BatchError::file_load(path, "workbook has no sheets"))?
        .map_err(|e| BatchError::file_load(path, e))?;

    let mut rows = range.rows();
    let columns: Vec<String> = match rows.next() {
        Some(header) => header.iter().map(cell_text).collect(),
        None => return Err(BatchError::file_load(path, "no header row")),
    };
    let rows = rows.map(|r| r.iter().map(cell_text).collect()).collect();
    Ok(DatasetTable::new(columns, rows))
}

/// Dates come back as `2023-07-14 00:00:00`, not as the Excel serial
/// number the cell stores.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::DateTime(dt) if !dt.is_duration() => match dt.as_datetime() {
            Some(datetime) => datetime.format(DATETIME_FORMAT).to_string(),
            None => cell.to_string(),
        },
        Data::DateTimeIso(text) | Data::DurationIso(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Load a dataset, choosing the reader from the file extension
pub fn load_table(path: impl AsRef<Path>) -> Result<DatasetTable> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(BatchError::file_load(path, "file not found"));
    }
    match extension(path).as_str() {
        "txt" | "tsv" => load_tsv(path),
        "xls" | "xlsx" | "xlsm" | "xlsb" | "ods" => load_spreadsheet(path),
        other => Err(BatchError::UnsupportedFormat(other.to_string())),
    }
}

/// Write the table as tab-delimited text
pub fn export_tsv(table: &DatasetTable, path: &Path) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the table as a single-sheet `.xlsx` workbook
pub fn export_xlsx(table: &DatasetTable, path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    for (col, name) in table.columns().iter().enumerate() {
        worksheet.write_string(0, col_num(col)?, name)?;
    }
    for (idx, row) in table.rows().iter().enumerate() {
        let row_num = u32::try_from(idx + 1)
            .map_err(|_| BatchError::Config(format!("row {} exceeds spreadsheet limits", idx)))?;
        for (col, cell) in row.iter().enumerate() {
            if !cell.is_empty() {
                worksheet.write_string(row_num, col_num(col)?, cell)?;
            }
        }
    }

    workbook.save(path)?;
    Ok(())
}

fn col_num(col: usize) -> Result<u16> {
    u16::try_from(col)
        .map_err(|_| BatchError::Config(format!("column {} exceeds spreadsheet limits", col)))
}

/// Export the table, choosing the writer from the file extension
pub fn export_table(table: &DatasetTable, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if table.is_empty() || table.columns().is_empty() {
        return Err(BatchError::EmptyTable);
    }
    match extension(path).as_str() {
        "xlsx" => export_xlsx(table, path),
        "txt" | "tsv" => export_tsv(table, path),
        other => Err(BatchError::UnsupportedFormat(other.to_string())),
    }?;
    tracing::info!("exported {} rows to {}", table.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_load_tsv_utf8() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.txt");
        fs::write(&path, "Id\tReport\n1\tbenign\n2\tgrade 2 carcinoma\n").unwrap();

        let table = load_table(&path).unwrap();
        assert_eq!(table.columns(), strings(&["Id", "Report"]).as_slice());
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1, "Report"), Some("grade 2 carcinoma"));
    }

    #[test]
    fn test_load_tsv_strips_bom() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bom.tsv");
        fs::write(&path, b"\xEF\xBB\xBFId\tName\n1\tx\n").unwrap();

        let table = load_table(&path).unwrap();
        assert_eq!(table.columns()[0], "Id");
    }

    #[test]
    fn test_load_tsv_falls_back_to_windows_1252() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("latin.txt");
        // 0xE9 is 'é' in Windows-1252 and invalid as a lone UTF-8 byte
        fs::write(&path, b"Id\tSite\n1\tf\xE9mur\n").unwrap();

        let table = load_table(&path).unwrap();
        assert_eq!(table.get(0, "Site"), Some("fémur"));
    }

    #[test]
    fn test_load_tsv_renames_duplicate_headers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dupes.txt");
        fs::write(&path, "Id\tNote\tNote\n1\tfirst\tsecond\n").unwrap();

        let table = load_table(&path).unwrap();
        assert_eq!(table.columns(), strings(&["Id", "Note", "Note.1"]).as_slice());
        assert_eq!(table.get(0, "Note"), Some("first"));
        assert_eq!(table.get(0, "Note.1"), Some("second"));
        assert_eq!(table.serialize_row(0, &table.input_fields()).as_deref(), Some("1\tfirst\tsecond"));
    }

    #[test]
    fn test_load_tsv_rejects_row_longer_than_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ragged.txt");
        fs::write(&path, "Id\tNote\tNote\n1\tfirst\tsecond\n2\ta\tb\textra\n").unwrap();

        match load_table(&path) {
            Err(BatchError::FileLoad { reason, .. }) => {
                assert_eq!(reason, "expected 3 fields in line 3, saw 4");
            }
            other => panic!("expected a load failure, got {:?}", other),
        }
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_table("/definitely/not/here.txt").unwrap_err();
        assert!(matches!(err, BatchError::FileLoad { .. }));
    }

    #[test]
    fn test_load_unsupported_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        fs::write(&path, "{}").unwrap();
        assert!(matches!(
            load_table(&path),
            Err(BatchError::UnsupportedFormat(ext)) if ext == "json"
        ));
    }

    #[test]
    fn test_export_tsv_roundtrip_with_embedded_tab() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let table = DatasetTable::new(
            strings(&["Id", "Note", "Grade"]),
            vec![strings(&["1", "has\ttab", "2"]), strings(&["2", "plain", ""])],
        );

        export_table(&table, &path).unwrap();
        let back = load_table(&path).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn test_export_xlsx_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.xlsx");
        let table = DatasetTable::new(
            strings(&["Id", "Grade", "Stage"]),
            vec![strings(&["1", "2", "III"]), strings(&["2", "", ""])],
        );

        export_table(&table, &path).unwrap();
        let back = load_table(&path).unwrap();
        assert_eq!(back.columns(), table.columns());
        assert_eq!(back.get(0, "Stage"), Some("III"));
        assert_eq!(back.get(1, "Grade"), Some(""));
    }

    #[test]
    fn test_load_xlsx_date_cells_as_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dates.xlsx");

        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        let date_format = rust_xlsxwriter::Format::new().set_num_format("yyyy-mm-dd");
        let collected = rust_xlsxwriter::ExcelDateTime::from_ymd(2023, 7, 14).unwrap();
        worksheet.write_string(0, 0, "Id").unwrap();
        worksheet.write_string(0, 1, "Collected").unwrap();
        worksheet.write_string(1, 0, "1").unwrap();
        worksheet
            .write_datetime_with_format(1, 1, &collected, &date_format)
            .unwrap();
        workbook.save(&path).unwrap();

        let table = load_table(&path).unwrap();
        assert_eq!(table.get(0, "Collected"), Some("2023-07-14 00:00:00"));
    }

    #[test]
    fn test_export_empty_table() {
        let dir = tempdir().unwrap();
        let table = DatasetTable::new(strings(&["Id"]), Vec::new());
        assert!(matches!(
            export_table(&table, dir.path().join("out.txt")),
            Err(BatchError::EmptyTable)
        ));
    }

    #[test]
    fn test_read_text_with_fallback() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prompt.txt");
        fs::write(&path, b"caf\xE9\nOutput_Fields will be [A]\n").unwrap();
        let text = read_text_with_fallback(&path).unwrap();
        assert!(text.starts_with("café"));
    }
}
