//! Byte sinks behind each table component and the offset bookkeeping the
//! writer reports to observers.
//!
//! ```text
//! SSTableWriter ──▶ PositionTracker ──▶ Box<dyn ComponentSink> ──▶ BufWriter<File>
//!                   (counts bytes)      (from a SinkFactory)
//! ```
//!
//! Offsets are counted rather than queried with `stream_position`, so they
//! stay exact even for sinks that cannot seek.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// A write-only byte sink that can be made durable.
pub trait ComponentSink: Write + Send {
    /// Flushes buffered bytes and forces them to stable storage.
    fn sync(&mut self) -> io::Result<()>;
}

impl ComponentSink for BufWriter<File> {
    fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        self.get_ref().sync_all()
    }
}

/// Creates the sink for one component file.
pub trait SinkFactory: Send + Sync {
    fn create(&self, path: &Path) -> io::Result<Box<dyn ComponentSink>>;
}

/// Default factory: buffered files, truncated on create.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSinkFactory;

impl SinkFactory for FileSinkFactory {
    fn create(&self, path: &Path) -> io::Result<Box<dyn ComponentSink>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Wraps a sink and counts every byte accepted by it.
///
/// `position()` is the offset at which the next byte will land. A failed
/// write leaves the count at the bytes actually accepted, but the writer
/// treats any failure as fatal so the value is not reused after an error.
pub struct PositionTracker<W: Write = Box<dyn ComponentSink>> {
    inner: W,
    position: u64,
}

impl<W: Write> PositionTracker<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, position: 0 }
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl PositionTracker<Box<dyn ComponentSink>> {
    pub fn sync(&mut self) -> io::Result<()> {
        self.inner.sync()
    }
}

impl<W: Write> Write for PositionTracker<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};

    #[test]
    fn counts_every_byte() -> io::Result<()> {
        let mut t = PositionTracker::new(Vec::new());
        assert_eq!(t.position(), 0);
        t.write_all(b"abc")?;
        assert_eq!(t.position(), 3);
        t.write_u64::<LittleEndian>(7)?;
        t.write_u16::<LittleEndian>(1)?;
        assert_eq!(t.position(), 13);
        assert_eq!(t.get_ref().len(), 13);
        Ok(())
    }

    #[test]
    fn short_writes_are_counted_as_accepted() -> io::Result<()> {
        struct Trickle(Vec<u8>);
        impl Write for Trickle {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                let n = buf.len().min(2);
                self.0.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut t = PositionTracker::new(Trickle(Vec::new()));
        t.write_all(b"hello world")?;
        assert_eq!(t.position(), 11);
        assert_eq!(t.into_inner().0, b"hello world");
        Ok(())
    }

    #[test]
    fn file_sink_round_trip() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("component");
        let mut t = PositionTracker::new(FileSinkFactory.create(&path)?);
        t.write_all(&[1u8; 100])?;
        t.sync()?;
        assert_eq!(t.position(), 100);
        assert_eq!(std::fs::metadata(&path)?.len(), 100);
        Ok(())
    }
}
