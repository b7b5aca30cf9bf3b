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

//! Client protocol frame definitions.
//!
//! Frames are newline-delimited JSON objects of the shape
//! `{"type": "...", "data": {...}}`, bidirectional on one connection.

use serde::{Deserialize, Serialize};

use crate::graph::model::{AnalysisStats, CodeNode, Edge};
use crate::job::JobStatus;
use crate::store::Subgraph;

/// Frames a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start (or rejoin) analysis of a project.
    StartAnalysis {
        /// The project to analyze.
        project_id: String,
        /// Analyzer kind; only "lsp" is built in.
        #[serde(default = "default_analyzer")]
        analyzer_type: String,
    },
    /// Attach as a subscriber to a job's batch stream.
    Subscribe {
        /// The job to follow.
        job_id: String,
        /// Replay from this sequence; live-only when absent.
        #[serde(default)]
        from_sequence: Option<u64>,
    },
    /// Request cancellation of a job.
    Cancel {
        /// The job to cancel.
        job_id: String,
    },
    /// Liveness probe.
    Ping,
}

fn default_analyzer() -> String {
    "lsp".to_string()
}

/// Frames the server sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Answer to `start_analysis`.
    StartAnalysisResponse {
        /// Job identity (new or rejoined).
        job_id: String,
        /// Current job status.
        status: JobStatus,
        /// Current counters.
        analysis_stats: AnalysisStats,
        /// Full graph snapshot; present only when the job is completed.
        #[serde(skip_serializing_if = "Option::is_none")]
        graph_data: Option<Subgraph>,
    },
    /// One sequenced batch of graph updates.
    BatchUpdate {
        /// Monotonic per-job sequence.
        sequence: u64,
        /// Nodes in this batch.
        nodes: Vec<CodeNode>,
        /// Edges in this batch.
        edges: Vec<Edge>,
        /// Counters at commit time.
        analysis_stats: AnalysisStats,
    },
    /// Job status change.
    StatusUpdate {
        /// New status.
        status: JobStatus,
        /// Counters at the change.
        analysis_stats: AnalysisStats,
    },
    /// Answer to `subscribe`.
    SubscribeResponse {
        /// The followed job.
        job_id: String,
        /// Highest sequence committed so far; replay starts at or after
        /// the requested point.
        last_committed_sequence: u64,
    },
    /// Terminal success notification.
    AnalysisComplete {
        /// The finished job.
        job_id: String,
        /// Final counters.
        statistics: AnalysisStats,
    },
    /// Request-scoped or subscription-scoped failure.
    Error {
        /// Human-readable description.
        message: String,
        /// Machine-readable class.
        error_type: ErrorType,
    },
    /// Answer to `ping`.
    Pong,
}

/// Machine-readable error classes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorType {
    /// Unknown project id.
    ProjectNotFoundError,
    /// Unknown job id.
    JobNotFoundError,
    /// Malformed or unprocessable frame.
    ValueError,
    /// Internal server failure.
    ServerError,
    /// Subscriber dropped for not draining its buffer.
    SlowConsumer,
    /// Requested replay start is below the ring floor.
    ResyncRequired,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test fixtures")]

    use super::*;

    #[test]
    fn parses_start_analysis() {
        let frame = r#"{"type":"start_analysis","data":{"project_id":"p1"}}"#;
        let msg: ClientMessage = serde_json::from_str(frame).unwrap();
        match msg {
            ClientMessage::StartAnalysis { project_id, analyzer_type } => {
                assert_eq!(project_id, "p1");
                assert_eq!(analyzer_type, "lsp");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn parses_subscribe_with_and_without_sequence() {
        let with: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","data":{"job_id":"j","from_sequence":4}}"#)
                .unwrap();
        assert!(matches!(
            with,
            ClientMessage::Subscribe { from_sequence: Some(4), .. }
        ));

        let without: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","data":{"job_id":"j"}}"#).unwrap();
        assert!(matches!(
            without,
            ClientMessage::Subscribe { from_sequence: None, .. }
        ));
    }

    #[test]
    fn parses_ping_without_data() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"reboot"}"#).is_err());
    }

    #[test]
    fn serializes_pong_and_error() {
        let pong = serde_json::to_string(&ServerMessage::Pong).unwrap();
        assert_eq!(pong, r#"{"type":"pong"}"#);

        let err = serde_json::to_string(&ServerMessage::Error {
            message: "no such job".to_string(),
            error_type: ErrorType::JobNotFoundError,
        })
        .unwrap();
        assert!(err.contains(r#""type":"error""#));
        assert!(err.contains(r#""error_type":"JobNotFoundError""#));
    }

    #[test]
    fn batch_update_frame_shape() {
        let frame = serde_json::to_string(&ServerMessage::BatchUpdate {
            sequence: 7,
            nodes: vec![],
            edges: vec![],
            analysis_stats: AnalysisStats::default(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "batch_update");
        assert_eq!(value["data"]["sequence"], 7);
    }
}
