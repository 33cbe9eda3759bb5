// ==========================================
// 货柜流转系统 - 清单文件解析器
// ==========================================
// 支持: Excel (.xlsx/.xls，每个工作表一个 sheet) / CSV (.csv，单 sheet)
// 说明: 空白行不跳过，交给映射阶段按"提前终止"规则处理
// ==========================================

use crate::importer::error::{ImportError, ImportResult};
use crate::importer::intake_trait::{FileParser, ManifestSheet};
use calamine::{open_workbook_auto, Reader};
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

// ==========================================
// CSV Parser 实现
// ==========================================
pub struct CsvParser;

impl FileParser for CsvParser {
    fn parse_sheets(&self, file_path: &Path) -> ImportResult<Vec<ManifestSheet>> {
        let path = file_path;

        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }

        if let Some(ext) = path.extension() {
            if !ext.eq_ignore_ascii_case("csv") {
                return Err(ImportError::UnsupportedFormat(ext.to_string_lossy().to_string()));
            }
        }

        let file = File::open(path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true) // 允许行长度不一致
            .from_reader(file);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
            .collect();

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            let mut row_map = HashMap::new();
            for (col_idx, value) in record.iter().enumerate() {
                if let Some(header) = headers.get(col_idx) {
                    row_map.insert(header.clone(), value.trim().to_string());
                }
            }
            rows.push(row_map);
        }

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "csv".to_string());
        Ok(vec![ManifestSheet { name, rows }])
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================
pub struct ExcelParser;

impl FileParser for ExcelParser {
    fn parse_sheets(&self, file_path: &Path) -> ImportResult<Vec<ManifestSheet>> {
        let path = file_path;

        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if ext != "xlsx" && ext != "xls" {
            return Err(ImportError::UnsupportedFormat(ext));
        }

        let mut workbook = open_workbook_auto(path)?;
        let sheet_names = workbook.sheet_names();
        if sheet_names.is_empty() {
            return Err(ImportError::ExcelParseError("Excel 文件无工作表".to_string()));
        }

        let mut sheets = Vec::with_capacity(sheet_names.len());
        for sheet_name in sheet_names {
            let range = workbook.worksheet_range(&sheet_name)?;

            let mut iter = range.rows();
            let Some(header_row) = iter.next() else {
                tracing::debug!(sheet = %sheet_name, "工作表为空，跳过");
                continue;
            };
            let headers: Vec<String> = header_row
                .iter()
                .map(|cell| cell.to_string().trim().to_string())
                .collect();

            let mut rows = Vec::new();
            for data_row in iter {
                let mut row_map = HashMap::new();
                for (col_idx, cell) in data_row.iter().enumerate() {
                    if let Some(header) = headers.get(col_idx) {
                        row_map.insert(header.clone(), cell.to_string().trim().to_string());
                    }
                }
                rows.push(row_map);
            }

            sheets.push(ManifestSheet {
                name: sheet_name,
                rows,
            });
        }

        Ok(sheets)
    }
}

// ==========================================
// 通用文件解析器（根据扩展名自动选择）
// ==========================================
pub struct UniversalFileParser;

impl FileParser for UniversalFileParser {
    fn parse_sheets(&self, file_path: &Path) -> ImportResult<Vec<ManifestSheet>> {
        let ext = file_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "csv" => CsvParser.parse_sheets(file_path),
            "xlsx" | "xls" => ExcelParser.parse_sheets(file_path),
            _ => Err(ImportError::UnsupportedFormat(ext)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_csv_parser_keeps_blank_rows() {
        let mut temp_file = Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(temp_file, "container,quantity,barcode").unwrap();
        writeln!(temp_file, "B1,3,0078").unwrap();
        writeln!(temp_file, ",,").unwrap();
        writeln!(temp_file, "B1,1,79").unwrap();
        temp_file.flush().unwrap();

        let sheets = UniversalFileParser.parse_sheets(temp_file.path()).unwrap();
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].rows.len(), 3);
        assert_eq!(sheets[0].rows[1].get("container").map(String::as_str), Some(""));
    }

    #[test]
    fn test_csv_parser_file_not_found() {
        let result = CsvParser.parse_sheets(Path::new("/nonexistent/manifest.csv"));
        assert!(matches!(result, Err(ImportError::FileNotFound(_))));
    }

    #[test]
    fn test_unsupported_extension() {
        let result = UniversalFileParser.parse_sheets(Path::new("manifest.pdf"));
        assert!(matches!(result, Err(ImportError::UnsupportedFormat(_))));
    }
}
