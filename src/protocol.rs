//! Messages exchanged between nodes.
//!
//! The enum is the logical protocol; [`Message::encode`] and
//! [`Message::decode`] give transports that move bytes a JSON framing. The
//! one-byte [`Opcode`] is what logs and diagnostics show.

use crate::error::{Error, ErrorKind, Result};
use crate::ft::table::{TableEntry, TableKey};
use crate::record::WireRecord;
use crate::types::{Failure, NodeId, Payload, Stamp};
use core::fmt;
use serde::{Deserialize, Serialize};

/// How a thief waits for a steal reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StealKind {
    /// The thief blocks until the reply or a timeout.
    Sync,
    /// The reply is picked up by a later client iteration.
    Async,
    /// The victim holds the request until it has work or exits.
    Blocking,
}

/// Result carried back to a job's owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    /// Normal return value.
    Normal(Payload),
    /// The job raised a failure.
    Exception(Failure),
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Ask for a job; `table` asks for the result table as well.
    StealRequest {
        /// How the thief waits.
        kind: StealKind,
        /// The thief still needs the table.
        table: bool,
    },
    /// Answer to a steal request of the same kind.
    StealReply {
        /// Echo of the request kind.
        kind: StealKind,
        /// The stolen job, if any.
        job: Option<WireRecord>,
        /// Table contents when the request asked for them.
        table: Option<Vec<TableEntry>>,
    },
    /// Result of a stolen job, sent to its owner.
    JobResult {
        /// Stamp of the job.
        stamp: Stamp,
        /// Owner of the job.
        owner: NodeId,
        /// Return value or failure.
        outcome: JobOutcome,
    },
    /// Kill every descendant of the stamp.
    Abort {
        /// Subtree root.
        stamp: Stamp,
        /// Owner of the subtree root.
        owner: NodeId,
    },
    /// Kill every descendant of the stamp and store finished work first.
    AbortAndStore {
        /// Subtree root.
        stamp: Stamp,
        /// Owner of the subtree root.
        owner: NodeId,
    },
    /// Ask the holder of a table entry for the result itself.
    ResultRequest {
        /// Table key.
        key: TableKey,
        /// Stamp of the requesting record.
        stamp: Stamp,
        /// Owner of the requesting record.
        owner: NodeId,
    },
    /// The holder no longer has the requested result.
    ResultMissing {
        /// Stamp of the requesting record.
        stamp: Stamp,
        /// Owner of the requesting record.
        owner: NodeId,
    },
    /// Results handed over by a leaving node.
    ResultPush {
        /// Pushed entries.
        entries: Vec<TableEntry>,
    },
    /// Batched table updates.
    TableUpdate {
        /// Updated entries.
        entries: Vec<TableEntry>,
    },
    /// The computation is over.
    Exit,
    /// A worker acknowledges EXIT.
    ExitReply,
    /// A worker reached the barrier.
    BarrierRequest,
    /// Every worker reached the barrier.
    BarrierReply,
}

/// Logical opcode of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Synchronous steal request.
    StealRequest = 1,
    /// Asynchronous steal request.
    AsyncStealRequest = 2,
    /// Blocking steal request.
    BlockingStealRequest = 3,
    /// Synchronous steal request asking for the table.
    StealAndTableRequest = 4,
    /// Asynchronous steal request asking for the table.
    AsyncStealAndTableRequest = 5,
    /// Successful steal reply.
    StealReplySuccess = 6,
    /// Failed steal reply.
    StealReplyFailed = 7,
    /// Successful steal reply carrying the table.
    StealReplySuccessTable = 8,
    /// Failed steal reply carrying the table.
    StealReplyFailedTable = 9,
    /// Successful asynchronous steal reply.
    AsyncStealReplySuccess = 10,
    /// Failed asynchronous steal reply.
    AsyncStealReplyFailed = 11,
    /// Successful asynchronous steal reply carrying the table.
    AsyncStealReplySuccessTable = 12,
    /// Failed asynchronous steal reply carrying the table.
    AsyncStealReplyFailedTable = 13,
    /// Normal job result.
    JobResultNormal = 14,
    /// Exceptional job result.
    JobResultException = 15,
    /// Abort.
    Abort = 16,
    /// Abort and store.
    AbortAndStore = 17,
    /// Result request.
    ResultRequest = 18,
    /// Result missing.
    ResultMissing = 19,
    /// Result push.
    ResultPush = 20,
    /// Table update.
    TableUpdate = 21,
    /// Exit.
    Exit = 22,
    /// Exit reply.
    ExitReply = 23,
    /// Barrier request.
    BarrierRequest = 24,
    /// Barrier reply.
    BarrierReply = 25,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StealRequest => "STEAL_REQUEST",
            Self::AsyncStealRequest => "ASYNC_STEAL_REQUEST",
            Self::BlockingStealRequest => "BLOCKING_STEAL_REQUEST",
            Self::StealAndTableRequest => "STEAL_AND_TABLE_REQUEST",
            Self::AsyncStealAndTableRequest => "ASYNC_STEAL_AND_TABLE_REQUEST",
            Self::StealReplySuccess => "STEAL_REPLY_SUCCESS",
            Self::StealReplyFailed => "STEAL_REPLY_FAILED",
            Self::StealReplySuccessTable => "STEAL_REPLY_SUCCESS_TABLE",
            Self::StealReplyFailedTable => "STEAL_REPLY_FAILED_TABLE",
            Self::AsyncStealReplySuccess => "ASYNC_STEAL_REPLY_SUCCESS",
            Self::AsyncStealReplyFailed => "ASYNC_STEAL_REPLY_FAILED",
            Self::AsyncStealReplySuccessTable => "ASYNC_STEAL_REPLY_SUCCESS_TABLE",
            Self::AsyncStealReplyFailedTable => "ASYNC_STEAL_REPLY_FAILED_TABLE",
            Self::JobResultNormal => "JOB_RESULT_NORMAL",
            Self::JobResultException => "JOB_RESULT_EXCEPTION",
            Self::Abort => "ABORT",
            Self::AbortAndStore => "ABORT_AND_STORE",
            Self::ResultRequest => "RESULT_REQUEST",
            Self::ResultMissing => "RESULT_MISSING",
            Self::ResultPush => "RESULT_PUSH",
            Self::TableUpdate => "GRT_UPDATE",
            Self::Exit => "EXIT",
            Self::ExitReply => "EXIT_REPLY",
            Self::BarrierRequest => "BARRIER_REQUEST",
            Self::BarrierReply => "BARRIER_REPLY",
        };
        f.write_str(name)
    }
}

impl Message {
    /// The logical opcode.
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::StealRequest { kind, table } => match (kind, table) {
                (StealKind::Sync, false) => Opcode::StealRequest,
                (StealKind::Sync, true) => Opcode::StealAndTableRequest,
                (StealKind::Async, false) => Opcode::AsyncStealRequest,
                (StealKind::Async, true) => Opcode::AsyncStealAndTableRequest,
                (StealKind::Blocking, _) => Opcode::BlockingStealRequest,
            },
            Self::StealReply { kind, job, table } => {
                match (*kind == StealKind::Async, job.is_some(), table.is_some()) {
                    (false, true, false) => Opcode::StealReplySuccess,
                    (false, false, false) => Opcode::StealReplyFailed,
                    (false, true, true) => Opcode::StealReplySuccessTable,
                    (false, false, true) => Opcode::StealReplyFailedTable,
                    (true, true, false) => Opcode::AsyncStealReplySuccess,
                    (true, false, false) => Opcode::AsyncStealReplyFailed,
                    (true, true, true) => Opcode::AsyncStealReplySuccessTable,
                    (true, false, true) => Opcode::AsyncStealReplyFailedTable,
                }
            }
            Self::JobResult { outcome, .. } => match outcome {
                JobOutcome::Normal(_) => Opcode::JobResultNormal,
                JobOutcome::Exception(_) => Opcode::JobResultException,
            },
            Self::Abort { .. } => Opcode::Abort,
            Self::AbortAndStore { .. } => Opcode::AbortAndStore,
            Self::ResultRequest { .. } => Opcode::ResultRequest,
            Self::ResultMissing { .. } => Opcode::ResultMissing,
            Self::ResultPush { .. } => Opcode::ResultPush,
            Self::TableUpdate { .. } => Opcode::TableUpdate,
            Self::Exit => Opcode::Exit,
            Self::ExitReply => Opcode::ExitReply,
            Self::BarrierRequest => Opcode::BarrierRequest,
            Self::BarrierReply => Opcode::BarrierReply,
        }
    }

    /// JSON frame for byte transports.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            Error::new(ErrorKind::Codec)
                .with_message(format!("encoding {}", self.opcode()))
                .with_source(e)
        })
    }

    /// Parses a JSON frame. A frame naming no known message is an
    /// `UnknownOpcode` error; a malformed one is a `Codec` error.
    ///
    /// `UnknownOpcode` means the peers disagree on the protocol and must be
    /// handled as a consistency violation. Byte transports hand frames to the
    /// runtime as [`crate::transport::Inbound::Frame`], which does that.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            let kind = if e.is_data() {
                ErrorKind::UnknownOpcode
            } else {
                ErrorKind::Codec
            };
            Error::new(kind).with_source(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn reply_opcode_tracks_request_variant() {
        init_test("reply_opcode_tracks_request_variant");
        let reply = Message::StealReply {
            kind: StealKind::Async,
            job: None,
            table: Some(Vec::new()),
        };
        crate::assert_with_log!(
            reply.opcode() == Opcode::AsyncStealReplyFailedTable,
            "async failed table reply",
            Opcode::AsyncStealReplyFailedTable,
            reply.opcode()
        );
        let request = Message::StealRequest {
            kind: StealKind::Sync,
            table: true,
        };
        assert_eq!(request.opcode().to_string(), "STEAL_AND_TABLE_REQUEST");
        assert_eq!(Opcode::TableUpdate as u8, 21);
        crate::test_complete!("reply_opcode_tracks_request_variant");
    }

    #[test]
    fn job_result_frame_decodes() {
        init_test("job_result_frame_decodes");
        let msg = Message::JobResult {
            stamp: Stamp::root(0).child(1),
            owner: NodeId::new("a"),
            outcome: JobOutcome::Exception(Failure::new("div by zero")),
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
        assert_eq!(msg.opcode(), Opcode::JobResultException);
        crate::test_complete!("job_result_frame_decodes");
    }

    #[test]
    fn unknown_message_is_unknown_opcode() {
        init_test("unknown_message_is_unknown_opcode");
        let err = Message::decode(br#""Reticulate""#).unwrap_err();
        crate::assert_with_log!(
            err.kind() == ErrorKind::UnknownOpcode,
            "unknown variant",
            ErrorKind::UnknownOpcode,
            err.kind()
        );
        let err = Message::decode(b"{").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Codec);
        crate::test_complete!("unknown_message_is_unknown_opcode");
    }
}
