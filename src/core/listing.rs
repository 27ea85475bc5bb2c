//! 目录列表解析 - 将服务器返回的 DOS 风格文本列表转换为条目

use crate::core::error::SyncError;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 列表时间戳格式，例如 `01-15-24 10:30AM`
const TIMESTAMP_FORMAT: &str = "%m-%d-%y %I:%M%p";

/// 目录标记，出现在大小列中
const DIR_MARKER: &str = "DIR";

/// 条目类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// 目录列表中的一个条目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// 最后修改时间，解析失败时为零时间
    pub last_modified: NaiveDateTime,
    /// 文件大小，目录恒为 0
    pub size: u64,
    pub kind: EntryKind,
    /// 文件扩展名（含点），目录为空
    pub extension: String,
    pub name: String,
}

impl Entry {
    pub fn file(name: impl Into<String>, size: u64, last_modified: NaiveDateTime) -> Self {
        let name = name.into();
        Self {
            last_modified,
            size,
            kind: EntryKind::File,
            extension: extension_of(&name).to_string(),
            name,
        }
    }

    pub fn directory(name: impl Into<String>, last_modified: NaiveDateTime) -> Self {
        Self {
            last_modified,
            size: 0,
            kind: EntryKind::Directory,
            extension: String::new(),
            name: name.into(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// 零时间（0001-01-01 00:00:00），用于无法解析的时间戳
pub fn zero_timestamp() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// 取最后一个点开始的后缀；没有点或点在末尾时返回空
fn extension_of(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx + 1 < name.len() => &name[idx..],
        _ => "",
    }
}

/// 解析一次完整的列表响应
///
/// 少于 4 列的行会被丢弃，时间戳解析失败时回退为零时间；
/// 只有文件大小无法转换为整数时才返回错误。
pub fn parse_listing(raw: &str) -> Result<Vec<Entry>, SyncError> {
    let mut entries = Vec::new();

    for line in raw.split(['\r', '\n']) {
        if line.trim().is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            debug!("跳过无法识别的列表行: {:?}", line);
            continue;
        }

        let stamp = format!("{} {}", parts[0], parts[1]);
        let last_modified = NaiveDateTime::parse_from_str(&stamp, TIMESTAMP_FORMAT)
            .unwrap_or_else(|_| zero_timestamp());

        let name = parts[3..].join(" ");
        let marker = parts[2];

        let entry = if marker.contains(DIR_MARKER) {
            Entry::directory(name, last_modified)
        } else {
            let size = marker.parse::<u64>().map_err(|e| {
                SyncError::InvalidListing(format!("文件 '{}' 的大小 '{}' 无效: {}", name, marker, e))
            })?;
            Entry::file(name, size, last_modified)
        };

        entries.push(entry);
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_directory_with_spaces() {
        let entries = parse_listing("01-15-24 10:30AM <DIR> Sub Folder").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::Directory);
        assert_eq!(entries[0].size, 0);
        assert_eq!(entries[0].name, "Sub Folder");
        assert_eq!(entries[0].extension, "");
    }

    #[test]
    fn test_parse_file() {
        let entries = parse_listing("01-15-24 10:30AM 1024 report.pdf").unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.kind, EntryKind::File);
        assert_eq!(entry.size, 1024);
        assert_eq!(entry.extension, ".pdf");
        assert_eq!(entry.name, "report.pdf");

        let expected = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        assert_eq!(entry.last_modified, expected);
    }

    #[test]
    fn test_parse_pm_timestamp() {
        let entries = parse_listing("12-31-23 09:05PM 5 late.txt").unwrap();
        assert_eq!(entries[0].last_modified.hour(), 21);
        assert_eq!(entries[0].last_modified.minute(), 5);
    }

    #[test]
    fn test_garbage_yields_nothing() {
        assert!(parse_listing("garbage").unwrap().is_empty());
        assert!(parse_listing("a b c").unwrap().is_empty());
    }

    #[test]
    fn test_empty_listing() {
        assert!(parse_listing("").unwrap().is_empty());
        assert!(parse_listing("\r\n\r\n  \n").unwrap().is_empty());
    }

    #[test]
    fn test_bad_date_falls_back_to_zero() {
        let entries = parse_listing("not-a date 12 a.txt").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].last_modified, zero_timestamp());
        assert_eq!(entries[0].last_modified.year(), 1);
        assert_eq!(entries[0].size, 12);

        let json = serde_json::to_value(&entries[0]).unwrap();
        assert_eq!(json["lastModified"], "0001-01-01T00:00:00");
    }

    #[test]
    fn test_bad_size_is_an_error() {
        let err = parse_listing("01-15-24 10:30AM 12kb a.txt").unwrap_err();
        assert!(matches!(err, SyncError::InvalidListing(_)));
    }

    #[test]
    fn test_mixed_line_endings_and_multiple_spaces() {
        let raw = "01-15-24  10:30AM       <DIR>          docs\r\n\
                   01-16-24  11:00AM                  42 my   notes.txt\r\
                   01-17-24  01:00PM                   0 archive.tar.gz\n";
        let entries = parse_listing(raw).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "docs");
        assert!(entries[0].is_dir());
        assert_eq!(entries[1].name, "my notes.txt");
        assert_eq!(entries[1].size, 42);
        assert_eq!(entries[2].extension, ".gz");
    }

    #[test]
    fn test_extension_edge_cases() {
        assert_eq!(extension_of("Makefile"), "");
        assert_eq!(extension_of("trailing."), "");
        assert_eq!(extension_of(".bashrc"), ".bashrc");
        assert_eq!(extension_of("a.b.c"), ".c");
    }

    #[test]
    fn test_entry_serializes_camel_case() {
        let entry = Entry::file("a.txt", 3, zero_timestamp());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "file");
        assert_eq!(json["size"], 3);
        assert!(json.get("lastModified").is_some());
    }
}
