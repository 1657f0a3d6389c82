//! Statement-aligned splitting of a retired artifact
//!
//! The source is streamed line by line into numbered part files. A part is
//! closed once it holds at least `max_part_bytes` bytes *and* the line just
//! written, trimmed, ends with [`STATEMENT_TERMINATOR`]. A part therefore
//! never ends inside a statement and may overshoot the limit by the tail of
//! one statement. Whatever remains at end of input becomes the final part.
//!
//! Lines are copied as raw bytes, so concatenating the parts in index order
//! reproduces the source exactly.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use dumpcycle_core::{Error, PartFile, Result};
use tracing::debug;

use crate::layout::part_file_name;

/// Byte that ends a SQL statement.
pub const STATEMENT_TERMINATOR: u8 = b';';

const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Split `source` into parts of roughly `max_part_bytes` inside `target_folder`.
///
/// `target_folder` must exist. Parts are named `backup_part_001.sql`,
/// `backup_part_002.sql`, ... and are fsynced before being returned.
///
/// # Errors
///
/// Returns `Error::Split` if the source cannot be read or a part cannot be
/// written. Parts written before the failure are left on disk.
pub fn split(source: &Path, target_folder: &Path, max_part_bytes: u64) -> Result<Vec<PartFile>> {
    let file = File::open(source).map_err(|e| {
        Error::Split(format!("cannot open '{}': {}", source.display(), e))
    })?;
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

    let mut parts = Vec::new();
    let mut open_part: Option<PartWriter> = None;
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line).map_err(|e| {
            Error::Split(format!("cannot read '{}': {}", source.display(), e))
        })?;
        if read == 0 {
            break;
        }

        let mut part = match open_part.take() {
            Some(part) => part,
            None => PartWriter::create(target_folder, parts.len() as u32 + 1)?,
        };
        part.write_line(&line)?;

        if part.written >= max_part_bytes && ends_statement(&line) {
            parts.push(part.finish()?);
        } else {
            open_part = Some(part);
        }
    }

    if let Some(part) = open_part {
        parts.push(part.finish()?);
    }

    debug!(
        target: "dumpcycle::split",
        source = %source.display(),
        parts = parts.len(),
        max_part_bytes,
        "Split complete"
    );
    Ok(parts)
}

/// Whether `line`, with trailing whitespace removed, ends a statement.
pub fn ends_statement(line: &[u8]) -> bool {
    line.iter()
        .rev()
        .find(|b| !b.is_ascii_whitespace())
        .map_or(false, |&b| b == STATEMENT_TERMINATOR)
}

struct PartWriter {
    index: u32,
    name: String,
    path: PathBuf,
    out: BufWriter<File>,
    written: u64,
}

impl PartWriter {
    fn create(folder: &Path, index: u32) -> Result<Self> {
        let name = part_file_name(index);
        let path = folder.join(&name);
        let file = File::create(&path)
            .map_err(|e| Error::Split(format!("cannot create '{}': {}", path.display(), e)))?;
        Ok(PartWriter {
            index,
            name,
            path,
            out: BufWriter::with_capacity(READ_BUFFER_SIZE, file),
            written: 0,
        })
    }

    fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.out
            .write_all(line)
            .map_err(|e| Error::Split(format!("cannot write '{}': {}", self.path.display(), e)))?;
        self.written += line.len() as u64;
        Ok(())
    }

    fn finish(self) -> Result<PartFile> {
        let PartWriter {
            index,
            name,
            path,
            out,
            written,
        } = self;
        let file = out
            .into_inner()
            .map_err(|e| Error::Split(format!("cannot flush '{}': {}", path.display(), e.error())))?;
        file.sync_all()
            .map_err(|e| Error::Split(format!("cannot sync '{}': {}", path.display(), e)))?;

        debug!(target: "dumpcycle::split", part = %name, size_bytes = written, "Part written");
        Ok(PartFile {
            index,
            name,
            path,
            size_bytes: written,
        })
    }
}
