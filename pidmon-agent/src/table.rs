//! Append-only tab-separated log writer
//!
//! Every metric stream and one-time snapshot is a plain table: a header row
//! naming the columns, then one row per record. Rows are flushed as they are
//! written so that a run that ends abruptly keeps everything sampled so far.

use crate::error::Result;
use pidmon_common::EntityId;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Writer for one table file
pub struct TableAppender {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl TableAppender {
    /// Create (or truncate) `path` and write the header row
    pub fn create<S: AsRef<str>>(path: &Path, header: &[S]) -> Result<Self> {
        let file = File::create(path)?;
        let mut appender = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        };
        appender.write_row(header)?;
        Ok(appender)
    }

    /// Open `path` for appending, writing the header only if the file is new
    pub fn open_append<S: AsRef<str>>(path: &Path, header: &[S]) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let is_new = file.metadata()?.len() == 0;
        let mut appender = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        };
        if is_new {
            appender.write_row(header)?;
        }
        Ok(appender)
    }

    /// Append a sample row stamped with the current time
    pub fn append(&mut self, fields: &[String]) -> Result<()> {
        let mut row = Vec::with_capacity(fields.len() + 1);
        row.push(timestamp());
        row.extend(fields.iter().cloned());
        self.write_row(&row)
    }

    /// Append a row exactly as given
    pub fn append_fields(&mut self, fields: &[String]) -> Result<()> {
        self.write_row(fields)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_row<S: AsRef<str>>(&mut self, fields: &[S]) -> Result<()> {
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                self.writer.write_all(b"\t")?;
            }
            self.writer.write_all(sanitize(field.as_ref()).as_bytes())?;
        }
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Write a complete one-time table
pub fn write_table<S, I>(path: &Path, header: &[S], rows: I) -> Result<()>
where
    S: AsRef<str>,
    I: IntoIterator<Item = Vec<String>>,
{
    let mut appender = TableAppender::create(path, header)?;
    for row in rows {
        appender.append_fields(&row)?;
    }
    Ok(())
}

/// Wall clock and monotonic clock read together on first use
static CLOCK_ANCHOR: OnceLock<(SystemTime, Instant)> = OnceLock::new();

/// Seconds since the Unix epoch with millisecond precision
///
/// Anchored to the wall clock once, then advanced by the monotonic clock, so
/// timestamps never go backwards when the system time is stepped.
pub fn timestamp() -> String {
    let (wall, start) = *CLOCK_ANCHOR.get_or_init(|| (SystemTime::now(), Instant::now()));
    let now = wall.duration_since(UNIX_EPOCH).unwrap_or_default() + start.elapsed();
    format!("{:.3}", now.as_secs_f64())
}

/// `<basename>.<suffix>`
pub fn run_path(basename: &Path, suffix: &str) -> PathBuf {
    let mut path = basename.as_os_str().to_owned();
    path.push(".");
    path.push(suffix);
    PathBuf::from(path)
}

/// `<basename>.<id>.<suffix>`
pub fn entity_path(basename: &Path, id: EntityId, suffix: &str) -> PathBuf {
    run_path(basename, &format!("{}.{}", id, suffix))
}

/// Tabs and newlines would break the table layout
fn sanitize(field: &str) -> std::borrow::Cow<'_, str> {
    if field.contains(['\t', '\n', '\r']) {
        field.replace(['\t', '\n', '\r'], " ").into()
    } else {
        field.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.tsv");

        let mut appender = TableAppender::create(&path, &["TIME", "VALUE"]).unwrap();
        appender.append(&["42".to_string()]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines[0], "TIME\tVALUE");
        let row: Vec<_> = lines[1].split('\t').collect();
        assert_eq!(row.len(), 2);
        assert!(row[0].parse::<f64>().is_ok());
        assert_eq!(row[1], "42");
    }

    #[test]
    fn test_open_append_keeps_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tsv");

        {
            let mut a = TableAppender::open_append(&path, &["K"]).unwrap();
            a.append_fields(&["1".to_string()]).unwrap();
        }
        {
            let mut a = TableAppender::open_append(&path, &["K"]).unwrap();
            a.append_fields(&["2".to_string()]).unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "K\n1\n2\n");
    }

    #[test]
    fn test_fields_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.tsv");

        write_table(
            &path,
            &["NAME", "VALUE"],
            vec![vec!["A".to_string(), "x\ty\nz".to_string()]],
        )
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "NAME\tVALUE\nA\tx y z\n");
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let mut previous: f64 = timestamp().parse().unwrap();
        assert!(previous > 0.0);
        for _ in 0..200 {
            let next: f64 = timestamp().parse().unwrap();
            assert!(next >= previous);
            previous = next;
        }
    }

    #[test]
    fn test_paths() {
        let base = Path::new("/tmp/out/run");
        assert_eq!(run_path(base, "reg.tsv"), PathBuf::from("/tmp/out/run.reg.tsv"));
        assert_eq!(
            entity_path(base, EntityId::Process(12), "cpu.tsv"),
            PathBuf::from("/tmp/out/run.12.cpu.tsv")
        );
        assert_eq!(
            entity_path(base, EntityId::System, "mem.tsv"),
            PathBuf::from("/tmp/out/run.sys.mem.tsv")
        );
    }
}
