//! 漫画列表文件解析。
//!
//! 每行一条：`名称,章节数,格式位数`。格式位数 1/2/3 对应章节号补零宽度，
//! 其它数字视为未指定。无法解析的行跳过并告警，不会中断。

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::warn;

use crate::download::models::ChapterFormat;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesEntry {
    pub name: String,
    /// 章节总数；更新流程不使用该字段。
    pub chapter_count: Option<u32>,
    pub hint: Option<ChapterFormat>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineError {
    #[error("expected 3 comma-separated fields, got {0}")]
    FieldCount(usize),
    #[error("series name is empty")]
    EmptyName,
    #[error("invalid chapter count {0:?}")]
    ChapterCount(String),
    #[error("invalid format digits {0:?}")]
    FormatDigits(String),
}

/// 解析单行；空行与 `#` 注释返回 `Ok(None)`。
pub fn parse_line(line: &str) -> Result<Option<SeriesEntry>, LineError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let parts: Vec<&str> = trimmed.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(LineError::FieldCount(parts.len()));
    }

    let name = parts[0];
    if name.is_empty() {
        return Err(LineError::EmptyName);
    }

    let chapter_count = match parts[1] {
        "" => None,
        raw => Some(
            raw.parse::<u32>()
                .map_err(|_| LineError::ChapterCount(raw.to_string()))?,
        ),
    };

    let digits = parts[2]
        .parse::<u32>()
        .map_err(|_| LineError::FormatDigits(parts[2].to_string()))?;

    Ok(Some(SeriesEntry {
        name: name.to_string(),
        chapter_count,
        hint: ChapterFormat::from_digits(digits),
    }))
}

pub fn parse_series_list(raw: &str) -> Vec<SeriesEntry> {
    let mut out = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        match parse_line(line) {
            Ok(Some(entry)) => out.push(entry),
            Ok(None) => {}
            Err(err) => {
                warn!(target: "series_list", line = idx + 1, "跳过无效条目: {err}");
            }
        }
    }
    out
}

/// 读取列表文件；文件缺失或不可读时告警并返回空列表。
pub fn load_series_list(path: &Path) -> Vec<SeriesEntry> {
    if !path.exists() {
        warn!(target: "series_list", "列表文件不存在: {}", path.display());
        return Vec::new();
    }
    match fs::read_to_string(path) {
        Ok(raw) => parse_series_list(&raw),
        Err(err) => {
            warn!(target: "series_list", "读取 {} 失败: {err}", path.display());
            Vec::new()
        }
    }
}

/// 名称 → 声明格式，仅保留指定了格式的条目。
pub fn format_hints(entries: &[SeriesEntry]) -> HashMap<String, ChapterFormat> {
    entries
        .iter()
        .filter_map(|e| e.hint.map(|h| (e.name.clone(), h)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_lines() {
        let entry = parse_line(" One Piece , 120 , 3 ").unwrap().unwrap();
        assert_eq!(entry.name, "One Piece");
        assert_eq!(entry.chapter_count, Some(120));
        assert_eq!(entry.hint, Some(ChapterFormat::ThreeDigits));

        let entry = parse_line("Foo,,1").unwrap().unwrap();
        assert_eq!(entry.chapter_count, None);
        assert_eq!(entry.hint, Some(ChapterFormat::Unpadded));
    }

    #[test]
    fn unknown_digit_count_means_unspecified() {
        let entry = parse_line("Foo,10,4").unwrap().unwrap();
        assert_eq!(entry.hint, None);
    }

    #[test]
    fn malformed_lines_are_reported() {
        assert_eq!(parse_line("Foo,10"), Err(LineError::FieldCount(2)));
        assert_eq!(parse_line(",10,2"), Err(LineError::EmptyName));
        assert!(matches!(parse_line("Foo,ten,2"), Err(LineError::ChapterCount(_))));
        assert!(matches!(parse_line("Foo,10,x"), Err(LineError::FormatDigits(_))));
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(parse_line("# comment"), Ok(None));
    }

    #[test]
    fn list_skips_bad_lines_and_keeps_order() {
        let raw = "Foo,3,2\nbroken line\nBar,5,x\nBaz,7,1\n";
        let list = parse_series_list(raw);
        let names: Vec<&str> = list.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Foo", "Baz"]);

        let hints = format_hints(&list);
        assert_eq!(hints.get("Foo"), Some(&ChapterFormat::TwoDigits));
        assert_eq!(hints.get("Baz"), Some(&ChapterFormat::Unpadded));
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_series_list(&dir.path().join("data.txt")).is_empty());
    }
}
