//! Archive builder
//!
//! Streams (name, bytes) entries into a tar container assembled in a
//! temporary spill file. The spill is kept uncompressed so that a write
//! cursor checkpoint taken before an entry can be restored exactly —
//! seeking back and truncating removes a partially written entry without
//! touching entries already committed to the stream. Compression happens
//! later, at commit time, as a pure byte transform.
//!
//! The spill file is exclusively owned by one run and is released when the
//! builder (or the sealed spill) is dropped.

use std::io::{Read, Seek, SeekFrom};
use tar::{Builder, Header};
use tempfile::NamedTempFile;
use tracing::debug;

use histagg_common::Result;

/// Byte offset into the spill file, taken before an entry is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(u64);

/// Incrementally writes named entries into a tar spill file.
pub struct ArchiveBuilder {
    builder: Builder<NamedTempFile>,
    /// Stamped as every entry's modification time
    mtime: u64,
    entries: usize,
}

impl ArchiveBuilder {
    pub fn new(mtime: u64) -> Result<Self> {
        let spill = NamedTempFile::new()?;
        Ok(Self {
            builder: Builder::new(spill),
            mtime,
            entries: 0,
        })
    }

    /// Record the current write cursor. Restoring to this checkpoint
    /// removes everything appended after it.
    pub fn checkpoint(&mut self) -> Result<Checkpoint> {
        Ok(Checkpoint(self.builder.get_mut().stream_position()?))
    }

    /// Append one entry with a declared length and the run's timestamp.
    pub fn append(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(self.mtime);

        self.builder.append_data(&mut header, name, data)?;
        self.entries += 1;

        debug!("Appended archive entry '{}' ({} bytes)", name, data.len());

        Ok(())
    }

    /// Truncate the spill back to `checkpoint`, discarding any partially
    /// written entry.
    pub fn rollback(&mut self, checkpoint: Checkpoint) -> Result<()> {
        let spill = self.builder.get_mut();
        spill.seek(SeekFrom::Start(checkpoint.0))?;
        spill.as_file().set_len(checkpoint.0)?;
        Ok(())
    }

    /// Current byte length of the spill stream.
    pub fn len(&mut self) -> Result<u64> {
        Ok(self.builder.get_mut().stream_position()?)
    }

    /// Number of entries successfully appended.
    pub fn entry_count(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Seal the container (terminating blocks included) and return the
    /// spill file, rewound for reading.
    pub fn finish(self) -> Result<NamedTempFile> {
        let mut spill = self.builder.into_inner()?;
        spill.seek(SeekFrom::Start(0))?;
        Ok(spill)
    }
}

/// Read a sealed spill file's full contents.
pub fn read_spill(spill: &mut NamedTempFile) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    spill.seek(SeekFrom::Start(0))?;
    spill.read_to_end(&mut bytes)?;
    Ok(bytes)
}
