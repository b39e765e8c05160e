//! Memory-mapped event file readers.
//!

use crate::{Error, Result};
use log::debug;
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use trackfit_core::Event;

/// A memory-mapped file reader.
///
/// Uses memmap2 to access file contents without loading the entire
/// file into memory. Empty files are not mapped.
pub struct MappedFileReader {
    mmap: Option<Arc<Mmap>>,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        let mmap = if file.metadata()?.len() == 0 {
            None
        } else {
            // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
            // This is the standard safety contract for memory mapping.
            #[allow(unsafe_code)]
            let mmap = unsafe { Mmap::map(&file)? };
            Some(Arc::new(mmap))
        };
        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.mmap.as_deref().map_or(&[][..], |m| &m[..])
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Path the file was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Non-blank lines with their one-based line numbers.
fn record_lines(data: &[u8]) -> impl Iterator<Item = (usize, &[u8])> {
    data.split(|&b| b == b'\n')
        .enumerate()
        .map(|(i, line)| (i + 1, line.strip_suffix(b"\r").unwrap_or(line)))
        .filter(|(_, line)| line.iter().any(|b| !b.is_ascii_whitespace()))
}

fn parse_event(line: usize, bytes: &[u8]) -> Result<Event> {
    serde_json::from_slice(bytes).map_err(|source| Error::JsonError { line, source })
}

/// Reader for JSON Lines event files.
///
/// Each non-blank line holds one event with its hits and generated
/// particles.
pub struct EventFileReader {
    reader: MappedFileReader,
}

impl EventFileReader {
    /// Opens an event file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = MappedFileReader::open(path)?;
        debug!(
            "opened event file {} ({} bytes)",
            reader.path().display(),
            reader.len()
        );
        Ok(Self { reader })
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn file_size(&self) -> usize {
        self.reader.len()
    }

    /// Number of event records, without parsing them.
    #[must_use]
    pub fn event_count(&self) -> usize {
        record_lines(self.reader.as_bytes()).count()
    }

    /// Streams events in file order.
    pub fn events(&self) -> impl Iterator<Item = Result<Event>> + '_ {
        record_lines(self.reader.as_bytes()).map(|(line, bytes)| parse_event(line, bytes))
    }

    /// Parses every event in parallel.
    ///
    /// # Errors
    /// Returns the first malformed record in file order.
    pub fn read_all(&self) -> Result<Vec<Event>> {
        let lines: Vec<(usize, &[u8])> = record_lines(self.reader.as_bytes()).collect();
        let events = lines
            .par_iter()
            .map(|&(line, bytes)| parse_event(line, bytes))
            .collect::<Result<Vec<Event>>>()?;
        debug!(
            "{}: {} events read",
            self.reader.path().display(),
            events.len()
        );
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_mapped_reader_empty_file() {
        let file = NamedTempFile::new().unwrap();
        let reader = MappedFileReader::open(file.path()).unwrap();
        assert!(reader.is_empty());
        assert_eq!(reader.as_bytes(), b"");
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{\"hits\":[{{\"cell_id\":5,\"position\":[1.0,2.0,3.0]}}]}}").unwrap();
        writeln!(file).unwrap();
        write!(file, "  \r\n{{\"hits\":[]}}\r\n").unwrap();
        file.flush().unwrap();

        let reader = EventFileReader::open(file.path()).unwrap();
        assert_eq!(reader.event_count(), 2);
        let events = reader.read_all().unwrap();
        assert_eq!(events[0].hits[0].cell_id, 5);
        assert!(events[0].particles.is_empty());
        assert!(events[1].is_empty());
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{\"hits\":[]}}").unwrap();
        writeln!(file, "{{\"hits\":[{{\"cell_id\":\"x\"}}]}}").unwrap();
        file.flush().unwrap();

        let reader = EventFileReader::open(file.path()).unwrap();
        let err = reader.read_all().unwrap_err();
        assert!(matches!(err, Error::JsonError { line: 2, .. }));

        let streamed: Vec<Result<Event>> = reader.events().collect();
        assert!(streamed[0].is_ok());
        assert!(streamed[1].is_err());
    }
}
