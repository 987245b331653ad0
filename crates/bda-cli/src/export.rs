//! JSON export of BDA reports

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::ser::{Formatter, PrettyFormatter};
use serde_json::{Map, Value};
use std::io;
use std::path::{Path, PathBuf};

/// Report headers and the JSON section they open
pub const SECTION_HEADERS: &[(&str, &str)] = &[
    ("PHYSICAL DAMAGE ASSESSMENT:", "physical"),
    ("FUNCTIONAL DAMAGE ASSESSMENT:", "functional"),
    ("TASK ASSESSMENT:", "assessment"),
    ("THREAT LEVEL RECOMMENDATION:", "recommendation"),
];

/// Section for bullets that appear before any header
pub const UNSET_SECTION: &str = "unset";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%SZ";

/// Four-space pretty printing with every non-ASCII character written as a
/// `\uXXXX` escape, so exported files are plain ASCII
struct AsciiPrettyFormatter<'a> {
    inner: PrettyFormatter<'a>,
}

impl<'a> AsciiPrettyFormatter<'a> {
    fn new() -> Self {
        Self {
            inner: PrettyFormatter::with_indent(b"    "),
        }
    }
}

impl Formatter for AsciiPrettyFormatter<'_> {
    fn begin_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_array(writer)
    }

    fn end_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_array(writer)
    }

    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.inner.begin_array_value(writer, first)
    }

    fn end_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_array_value(writer)
    }

    fn begin_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_object(writer)
    }

    fn end_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_object(writer)
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.inner.begin_object_key(writer, first)
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_object_value(writer)
    }

    fn end_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_object_value(writer)
    }

    fn write_string_fragment<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        let mut units = [0u16; 2];
        for c in fragment.chars() {
            if c.is_ascii() {
                writer.write_all(&[c as u8])?;
            } else {
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

/// Structure report text into `section -> label -> analysis`.
///
/// A bullet without a `label: analysis` pair makes the whole report
/// malformed and yields an empty object.
pub fn to_sections(report: &str) -> Map<String, Value> {
    let mut sections = Map::new();
    let mut current = UNSET_SECTION;

    for line in report.lines() {
        let line = line.trim();

        if let Some((_, section)) = SECTION_HEADERS.iter().find(|(header, _)| *header == line) {
            current = section;
            continue;
        }

        let Some(bullet) = line.strip_prefix("- ") else {
            continue;
        };
        let Some((label, analysis)) = bullet.split_once(": ") else {
            return Map::new();
        };

        let entry = sections
            .entry(current)
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(fields) = entry {
            fields.insert(label.to_lowercase(), Value::String(analysis.to_string()));
        }
    }

    sections
}

/// `<image stem>_<YYYY-MM-DD_HHMMSSZ>.json`
pub fn export_file_name(image_path: &Path, timestamp: DateTime<Utc>) -> String {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_else(|| "report".into());
    format!("{}_{}.json", stem, timestamp.format(TIMESTAMP_FORMAT))
}

/// Write the structured report into `output_dir`, returning the file path
pub fn save_json(report: &str, image_path: &Path, output_dir: &Path) -> Result<PathBuf> {
    save_json_at(report, image_path, output_dir, Utc::now())
}

/// [`save_json`] with an explicit timestamp
pub fn save_json_at(
    report: &str,
    image_path: &Path,
    output_dir: &Path,
    timestamp: DateTime<Utc>,
) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output folder {}", output_dir.display()))?;

    let path = output_dir.join(export_file_name(image_path, timestamp));
    let document = Value::Object(to_sections(report));

    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, AsciiPrettyFormatter::new());
    document
        .serialize(&mut serializer)
        .context("Failed to serialize report")?;

    std::fs::write(&path, buf).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
