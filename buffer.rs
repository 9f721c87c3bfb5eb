use log::{debug, warn};

use crate::storage::StorageSink;
use crate::structs::SampleRecord;
use crate::{Error, Result};

pub const DEFAULT_CAPACITY: usize = 100;

/// Fixed-capacity queue of records in front of a [`StorageSink`].
///
/// Records are kept in arrival order. When the buffer is full the next
/// append flushes the whole batch first; the record that triggered the flush
/// opens the next batch.
pub struct SampleBuffer<S> {
    sink: S,
    records: Vec<SampleRecord>,
    capacity: usize,
    flushes: u64,
    dropped: u64,
}

impl<S: StorageSink> SampleBuffer<S> {
    pub fn new(sink: S, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Configuration(
                "buffer capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            sink,
            records: Vec::with_capacity(capacity),
            capacity,
            flushes: 0,
            dropped: 0,
        })
    }

    /// Queue `record`, flushing first if the buffer is full.
    ///
    /// If that flush fails the buffered records stay where they are and
    /// `record` is not accepted: the error is returned and the record is
    /// counted in [`dropped`](Self::dropped). With no medium mounted this is
    /// [`Error::StorageUnavailable`], which the sampling loop can ignore.
    pub fn append(&mut self, record: SampleRecord) -> Result<()> {
        if self.records.len() >= self.capacity {
            if let Err(e) = self.flush() {
                self.dropped += 1;
                warn!(
                    "Buffer full and flush failed ({}), {} records dropped so far",
                    e, self.dropped
                );
                return Err(e);
            }
        }
        self.records.push(record);
        Ok(())
    }

    /// Write every buffered record to the sink and empty the buffer.
    ///
    /// On failure the buffer is left exactly as it was. An empty buffer
    /// does not touch the sink.
    pub fn flush(&mut self) -> Result<()> {
        if self.records.is_empty() {
            return Ok(());
        }
        self.sink.write_batch(&self.records)?;
        debug!("Flushed {} records", self.records.len());
        self.records.clear();
        self.flushes += 1;
        Ok(())
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of successful flushes.
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// Number of records refused because a full buffer could not be flushed.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}
