//! The unit of work the batch executor moves between the reader and a
//! sink: a bounded group of rows plus enough bookkeeping to retry or
//! report on it independently of any other batch.

/// A bounded group of rows handed to a sink in one call.
#[derive(Debug, Clone)]
pub struct Batch<T> {
    /// Sequence number among the batches produced for one job, used for
    /// logging and circuit-breaker window bookkeeping.
    pub sequence: u64,
    pub rows: Vec<T>,
}

impl<T> Batch<T> {
    pub fn new(sequence: u64, rows: Vec<T>) -> Self {
        Self { sequence, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Groups an iterator of rows into fixed-size batches, the last one
/// possibly short. Used by both the streaming reader (sheet rows) and
/// the staging store (bulk insert chunking).
pub fn chunk<T>(rows: Vec<T>, batch_size: usize) -> Vec<Batch<T>> {
    assert!(batch_size > 0, "batch_size must be positive");
    let mut batches = Vec::with_capacity(rows.len() / batch_size + 1);
    let mut sequence = 0u64;
    let mut iter = rows.into_iter().peekable();
    while iter.peek().is_some() {
        let chunk: Vec<T> = iter.by_ref().take(batch_size).collect();
        batches.push(Batch::new(sequence, chunk));
        sequence += 1;
    }
    batches
}
