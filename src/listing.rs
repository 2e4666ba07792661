//! Parsing of `LIST` output.
//!
//! Servers answer `LIST` with whatever their platform's directory listing looks
//! like. Three shapes cover almost everything found in the wild:
//!
//! - Unix `ls -l`: `-rw-r--r--   1 owner group  1234 Jan  1 12:00 file.txt`
//! - Windows/IIS: `01-01-26  12:00AM       1234 file.txt`
//! - RFC 3659 facts: `type=file;size=1234;modify=20260101120000; file.txt`

use chrono::offset::TimeZone;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

lazy_static! {
    static ref UNIX_RE: Regex = Regex::new(
        r"(?x)
        ^([bcdlps-])[rwxsStTL-]{9}[.+@]?\s+  # type and permissions
        \d+\s+                               # link count
        \S+\s+                               # owner
        (?:\S+\s+)?                          # group
        (\d+)\s+                             # size
        ([A-Za-z]{3})\s+(\d{1,2})\s+         # month and day
        (\d{1,2}:\d{2}|\d{4})\s              # time or year
        (.+)$                                # name
        "
    )
    .unwrap();
    static ref WINDOWS_RE: Regex = Regex::new(
        r"(?x)
        ^(\d{2}-\d{2}-\d{2,4})\s+            # date
        (\d{1,2}:\d{2}\s*(?:AM|PM)?)\s+      # time
        (<DIR>|\d+)\s+                       # size or <DIR>
        (.+)$                                # name
        "
    )
    .unwrap();
    static ref FACTS_RE: Regex = Regex::new(r"^(?:[A-Za-z][\w.-]*=[^;]*;)*[A-Za-z][\w.-]*=[^;]*;?$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Unknown,
}

/// One parsed listing line.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub name: String,
    pub kind: FileKind,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    /// Target of a symbolic link, when the listing shows one.
    pub link_target: Option<String>,
    pub raw: String,
}

impl FileRecord {
    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

/// Parses a whole listing, dropping blank lines, `total` headers and the
/// `.` and `..` entries.
pub fn parse_listing<S: AsRef<str>>(lines: &[S]) -> Vec<FileRecord> {
    let now = Utc::now();
    lines
        .iter()
        .map(|line| line.as_ref().trim_end())
        .filter(|line| !line.trim().is_empty() && !line.starts_with("total "))
        .filter_map(|line| parse_line_at(line, now))
        .filter(|record| record.name != "." && record.name != "..")
        .collect()
}

/// Parses a single listing line. Lines matching no known shape come back as
/// [`FileKind::Unknown`] with the whole line as the name.
pub fn parse_line(line: &str) -> Option<FileRecord> {
    parse_line_at(line, Utc::now())
}

fn parse_line_at(line: &str, now: DateTime<Utc>) -> Option<FileRecord> {
    if line.trim().is_empty() {
        return None;
    }
    parse_facts(line)
        .or_else(|| parse_unix(line, now))
        .or_else(|| parse_windows(line))
        .or_else(|| {
            Some(FileRecord {
                name: line.trim().to_string(),
                kind: FileKind::Unknown,
                size: None,
                modified: None,
                link_target: None,
                raw: line.to_string(),
            })
        })
}

fn parse_facts(line: &str) -> Option<FileRecord> {
    let (facts, name) = line.split_once("; ")?;
    if name.is_empty() || !FACTS_RE.is_match(facts) {
        return None;
    }

    let mut record = FileRecord {
        name: name.to_string(),
        kind: FileKind::Unknown,
        size: None,
        modified: None,
        link_target: None,
        raw: line.to_string(),
    };
    for fact in facts.split(';') {
        let Some((key, value)) = fact.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "type" => {
                record.kind = match value.to_ascii_lowercase().as_str() {
                    "file" => FileKind::File,
                    "dir" | "cdir" | "pdir" => FileKind::Directory,
                    v if v.starts_with("os.unix=slink") || v.starts_with("os.unix=symlink") => {
                        FileKind::Symlink
                    }
                    _ => FileKind::Unknown,
                }
            }
            "size" => record.size = value.parse().ok(),
            "modify" => {
                record.modified = value
                    .get(..14)
                    .and_then(|ts| NaiveDateTime::parse_from_str(ts, "%Y%m%d%H%M%S").ok())
                    .map(|dt| Utc.from_utc_datetime(&dt))
            }
            _ => {}
        }
    }
    Some(record)
}

fn parse_unix(line: &str, now: DateTime<Utc>) -> Option<FileRecord> {
    let caps = UNIX_RE.captures(line)?;

    let kind = match &caps[1] {
        "-" => FileKind::File,
        "d" => FileKind::Directory,
        "l" => FileKind::Symlink,
        _ => FileKind::Unknown,
    };
    let (name, link_target) = match (kind, caps[6].split_once(" -> ")) {
        (FileKind::Symlink, Some((name, target))) => (name.to_string(), Some(target.to_string())),
        _ => (caps[6].to_string(), None),
    };

    Some(FileRecord {
        name,
        kind,
        size: caps[2].parse().ok(),
        modified: unix_timestamp(&caps[3], &caps[4], &caps[5], now),
        link_target,
        raw: line.to_string(),
    })
}

/// `ls` prints `Mon DD HH:MM` for the last six months and `Mon DD YYYY`
/// otherwise. A time-only stamp that would land in the future belongs to
/// the previous year.
fn unix_timestamp(month: &str, day: &str, time_or_year: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let month = month_number(month)?;
    let day: u32 = day.parse().ok()?;
    let naive = match time_or_year.split_once(':') {
        Some((hour, minute)) => {
            let (hour, minute) = (hour.parse().ok()?, minute.parse().ok()?);
            let this_year = NaiveDate::from_ymd_opt(now.year(), month, day)
                .and_then(|d| d.and_hms_opt(hour, minute, 0));
            match this_year {
                Some(dt) if Utc.from_utc_datetime(&dt) <= now + Duration::days(1) => dt,
                _ => NaiveDate::from_ymd_opt(now.year() - 1, month, day)?.and_hms_opt(hour, minute, 0)?,
            }
        }
        None => NaiveDate::from_ymd_opt(time_or_year.parse().ok()?, month, day)?.and_hms_opt(0, 0, 0)?,
    };
    Some(Utc.from_utc_datetime(&naive))
}

fn month_number(month: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let month = month.to_ascii_lowercase();
    MONTHS.iter().position(|m| *m == month).map(|i| i as u32 + 1)
}

fn parse_windows(line: &str) -> Option<FileRecord> {
    let caps = WINDOWS_RE.captures(line)?;

    let (kind, size) = match &caps[3] {
        "<DIR>" => (FileKind::Directory, None),
        size => (FileKind::File, size.parse().ok()),
    };
    let stamp = format!("{} {}", &caps[1], caps[2].replace(' ', ""));
    let modified = ["%m-%d-%y %I:%M%p", "%m-%d-%Y %I:%M%p", "%m-%d-%y %H:%M", "%m-%d-%Y %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&stamp, fmt).ok())
        .map(|dt| Utc.from_utc_datetime(&dt));

    Some(FileRecord {
        name: caps[4].to_string(),
        kind,
        size,
        modified,
        link_target: None,
        raw: line.to_string(),
    })
}
