/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Error taxonomy for the analysis pipeline.
//!
//! The policy boundaries matter more than the variants themselves:
//! per-file errors never fail a job, per-language errors degrade it,
//! store errors that exhaust their retries fail it (checkpoint preserved).

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the LSP client and server pool.
#[derive(Debug, Error)]
pub enum LspError {
    /// A request did not complete within its deadline.
    #[error("LSP request '{method}' timed out after {timeout:?}")]
    Timeout {
        /// The JSON-RPC method that timed out.
        method: String,
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// A malformed frame was read, or the server closed the stream.
    #[error("LSP protocol error: {0}")]
    Protocol(String),

    /// The language server is permanently gone for this job.
    #[error("language server for '{0}' is unavailable")]
    Unavailable(String),

    /// The server answered with a JSON-RPC error object.
    #[error("LSP error {code}: {message}")]
    Server {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// The server process could not be started.
    #[error("failed to spawn language server '{command}': {source}")]
    Spawn {
        /// The executable that failed to launch.
        command: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// I/O failure on the server's stdin/stdout.
    #[error("I/O error talking to language server: {0}")]
    Io(#[from] std::io::Error),

    /// A response payload did not match the expected shape.
    #[error("failed to decode LSP payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl LspError {
    /// Whether retrying the same file on a fresh request may succeed.
    ///
    /// Timeouts, per-request server errors, a server dying mid-request,
    /// and spawn failures are all transient at file granularity — the pool
    /// respawns within its budget and the file gets another attempt. Only
    /// [`LspError::Unavailable`] (budget spent) is final.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Server { .. }
                | Self::Protocol(_)
                | Self::Spawn { .. }
                | Self::Io(_)
        )
    }
}

/// Errors raised by a graph store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The transaction was rejected and may be retried.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// A batch arrived out of order with respect to the committed checkpoint.
    #[error("sequence conflict: last committed {committed}, batch {offered}")]
    SequenceConflict {
        /// Highest sequence durably applied.
        committed: u64,
        /// Sequence the caller tried to apply.
        offered: u64,
    },

    /// A subgraph read referenced a node the store does not hold.
    #[error("unknown node: {0}")]
    UnknownNode(String),
}

/// Top-level failure taxonomy for an analysis job.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// An LSP-layer failure (see [`LspError::is_transient`] for retry policy).
    #[error(transparent)]
    Lsp(#[from] LspError),

    /// A symbol the mapper could not make sense of. Skip the symbol,
    /// continue the file.
    #[error("malformed symbol: {0}")]
    Mapper(String),

    /// A store failure that survived its retry budget.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The referenced project does not exist. Terminal for the request only.
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// The referenced job does not exist. Terminal for the request only.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// A malformed frame from a subscriber. Closes that subscriber only.
    #[error("malformed client frame: {0}")]
    Protocol(String),

    /// An unrecoverable internal error. Marks the job failed.
    #[error("internal error: {0}")]
    Fatal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_transient() {
        let err = LspError::Timeout {
            method: "textDocument/documentSymbol".to_string(),
            timeout: Duration::from_secs(30),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn unavailable_is_not_transient() {
        assert!(!LspError::Unavailable("python".to_string()).is_transient());
    }

    #[test]
    fn server_death_is_transient_at_file_granularity() {
        assert!(LspError::Protocol("eof".to_string()).is_transient());
    }

    #[test]
    fn analysis_error_wraps_lsp() {
        let err: AnalysisError = LspError::Unavailable("rust".to_string()).into();
        assert!(matches!(err, AnalysisError::Lsp(LspError::Unavailable(_))));
    }
}
