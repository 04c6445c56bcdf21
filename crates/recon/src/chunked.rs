//! Windowed execution of store counts for large tables.
//!
//! Each count is split into windows over its driving table and summed. A
//! window that fails is recorded and skipped; the total is then a lower
//! bound and the caller must say so.

use serde::Serialize;

use crate::config::ExecutionOptions;
use crate::error::ReconError;
use crate::runlog::RunLog;
use crate::store::{CountOp, TablePair, TableStore, Window};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkFailure {
    pub operation: String,
    /// Zero-based chunk index.
    pub chunk: u64,
    pub offset: u64,
    pub limit: u64,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChunkedCount {
    pub total: u64,
    pub chunks: u64,
    pub failures: Vec<ChunkFailure>,
}

impl ChunkedCount {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct ChunkedExecutor {
    options: ExecutionOptions,
    log: RunLog,
}

impl ChunkedExecutor {
    pub fn new(options: ExecutionOptions, log: &RunLog) -> Self {
        Self { options, log: log.scoped("chunked") }
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub fn should_chunk(&self, left_rows: u64, right_rows: u64) -> bool {
        left_rows > self.options.chunk_threshold || right_rows > self.options.chunk_threshold
    }

    /// Contiguous windows covering `rows` rows.
    pub fn windows(&self, rows: u64) -> Vec<Window> {
        let size = self.options.chunk_size.max(1);
        (0..rows.div_ceil(size))
            .map(|i| Window { offset: i * size, limit: size })
            .collect()
    }

    /// Sum `op` over windows of its driving table (`driving_rows` rows).
    pub fn count(
        &self,
        store: &dyn TableStore,
        pair: &TablePair,
        op: &CountOp<'_>,
        driving_rows: u64,
    ) -> ChunkedCount {
        let windows = self.windows(driving_rows);
        let chunks = windows.len() as u64;
        let mut result = ChunkedCount { chunks, ..Default::default() };

        for (i, window) in windows.into_iter().enumerate() {
            let chunk = i as u64;
            match store.count(pair, op, Some(window)) {
                Ok(n) => result.total += n,
                Err(e) => {
                    self.log.warn(
                        "chunk_failed",
                        &[
                            ("op", &op.label()),
                            ("chunk", &chunk),
                            ("offset", &window.offset),
                            ("error", &e),
                        ],
                    );
                    result.failures.push(ChunkFailure {
                        operation: op.label().to_string(),
                        chunk,
                        offset: window.offset,
                        limit: window.limit,
                        error: e.to_string(),
                    });
                }
            }
            let done = chunk + 1;
            if done % self.options.progress_every.max(1) == 0 || done == chunks {
                self.log.info(
                    "progress",
                    &[("op", &op.label()), ("chunk", &done), ("of", &chunks), ("running_total", &result.total)],
                );
            }
        }
        result
    }
}

/// Count `op` over whole tables. Failures propagate.
pub fn count_direct(store: &dyn TableStore, pair: &TablePair, op: &CountOp<'_>) -> Result<u64, ReconError> {
    store.count(pair, op, None).map_err(ReconError::from)
}
