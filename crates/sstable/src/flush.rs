use config::SSTableConfig;
use log::debug;
use memtable::Memtable;

use crate::descriptor::Descriptor;
use crate::error::{Result, SSTableError};
use crate::observer::FlushObserver;
use crate::reader::SSTableReader;
use crate::writer::SSTableWriter;

/// Writes every partition of `mem` to a new table and opens it.
///
/// The memtable is left untouched; clearing it after a successful flush is
/// the caller's job.
///
/// # Errors
///
/// [`SSTableError::Empty`] for an empty memtable, otherwise whatever the
/// writer reports. A failed flush leaves no files behind.
pub fn flush_memtable<'a>(
    mem: &Memtable,
    descriptor: Descriptor,
    config: &SSTableConfig,
    observers: impl IntoIterator<Item = &'a mut dyn FlushObserver>,
) -> Result<SSTableReader> {
    if mem.is_empty() {
        return Err(SSTableError::Empty);
    }
    debug!(
        "flushing {} partitions (~{} bytes) to {}",
        mem.len(),
        mem.approx_size(),
        descriptor
    );

    let mut writer = SSTableWriter::builder(descriptor)
        .key_count(mem.len() as u64)
        .config(config.clone())
        .observers(observers)
        .build()?;
    for partition in mem.iter() {
        writer.append(&partition)?;
    }
    writer.finish_and_open()
}
