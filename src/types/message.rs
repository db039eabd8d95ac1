//! Monitoring message model.
//!
//! Raw queue payloads carry a two-character type prefix followed by a JSON
//! body, e.g. `ST {"transfer_id": ...}`. The prefix selects the broker
//! destination the message is routed to.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::ids::Ticket;

// Originally the trailing byte was an End-Of-Transmission character (0x04),
// which made the messages invalid JSON. It was later replaced with a space so
// consumers that strip the last byte regardless of its value keep working
// while the message stays valid JSON. The trailing byte cannot be dropped
// until all consumers stop stripping it.
const EOT: char = ' ';

/// The logical message channel a payload is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// `ST`: a transfer started.
    TransferStarted,
    /// `CO`: a transfer completed.
    TransferCompleted,
    /// `SS`: a transfer/file state change.
    TransferState,
    /// `OP`: an optimizer parameter update.
    OptimizerUpdate,
}

impl MessageKind {
    /// Parses the two-character type prefix. Unknown prefixes return `None`
    /// and the message is dropped by the publisher.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "ST" => Some(MessageKind::TransferStarted),
            "CO" => Some(MessageKind::TransferCompleted),
            "SS" => Some(MessageKind::TransferState),
            "OP" => Some(MessageKind::OptimizerUpdate),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageKind::TransferStarted => "transfer-started",
            MessageKind::TransferCompleted => "transfer-completed",
            MessageKind::TransferState => "transfer-state",
            MessageKind::OptimizerUpdate => "optimizer-update",
        };
        write!(f, "{s}")
    }
}

/// One monitoring message pulled off the durable queue.
///
/// Owns the ticket (needed later by the remover) and the raw payload text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    pub ticket: Ticket,
    pub raw: String,
}

/// A payload rewritten for publication: endpoint alias (and optionally the
/// host FQDN) injected, trailing compatibility byte appended, plus the `vo`
/// header value when the body carries a `vo_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedMessage {
    pub kind: MessageKind,
    pub text: String,
    pub vo: Option<String>,
    /// Short description for the post-delivery log line, when the body
    /// carries enough context to produce one.
    pub summary: Option<String>,
}

impl RelayMessage {
    pub fn new(ticket: Ticket, raw: impl Into<String>) -> Self {
        RelayMessage {
            ticket,
            raw: raw.into(),
        }
    }

    /// Returns the message kind from the type prefix, or `None` for unknown
    /// or truncated payloads.
    pub fn kind(&self) -> Option<MessageKind> {
        self.raw.get(..2).and_then(MessageKind::from_prefix)
    }

    /// The JSON body following the type prefix.
    pub fn body(&self) -> &str {
        self.raw.get(2..).unwrap_or("").trim_start()
    }

    /// Rewrites the payload for publication.
    ///
    /// Parses the JSON body, injects `endpnt` (and `fqdn` when requested),
    /// and appends the trailing compatibility byte. Fails on unknown type
    /// prefixes and on bodies that are not JSON objects.
    pub fn prepare(
        &self,
        endpoint: &str,
        fqdn: Option<&str>,
    ) -> Result<PreparedMessage, PrepareError> {
        let kind = self.kind().ok_or_else(|| PrepareError::UnknownType {
            prefix: self.raw.get(..2).unwrap_or("").to_string(),
        })?;

        let mut body: Value = serde_json::from_str(self.body())?;
        let obj = body.as_object_mut().ok_or(PrepareError::NotAnObject)?;

        obj.insert("endpnt".to_string(), Value::String(endpoint.to_string()));
        if let Some(fqdn) = fqdn {
            obj.insert("fqdn".to_string(), Value::String(fqdn.to_string()));
        }

        let vo = obj
            .get("vo_name")
            .and_then(Value::as_str)
            .map(str::to_string);
        let summary = summarize(kind, obj);

        let mut text = serde_json::to_string(&body)?;
        text.push(EOT);

        Ok(PreparedMessage {
            kind,
            text,
            vo,
            summary,
        })
    }
}

/// Errors from preparing a payload for publication.
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("unknown message type prefix: {prefix:?}")]
    UnknownType { prefix: String },

    #[error("message body is not a JSON object")]
    NotAnObject,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Builds the per-kind description logged after delivery.
fn summarize(kind: MessageKind, obj: &serde_json::Map<String, Value>) -> Option<String> {
    let str_field = |name: &str| obj.get(name).and_then(Value::as_str).filter(|s| !s.is_empty());

    match kind {
        MessageKind::TransferStarted => {
            str_field("transfer_id").map(|id| format!("Start message: {id}"))
        }
        MessageKind::TransferCompleted => {
            str_field("tr_id").map(|id| format!("Completion message: {id}"))
        }
        MessageKind::TransferState => {
            let job_id = str_field("job_id")?;
            let file_id = obj.get("file_id").and_then(Value::as_u64)?;
            let state = str_field("file_state").unwrap_or("INVALID");
            Some(format!("State change: {state} {job_id}/{file_id}"))
        }
        MessageKind::OptimizerUpdate => {
            let source = str_field("source_se")?;
            let dest = str_field("dest_se")?;
            Some(format!("Optimizer update: {source} => {dest}"))
        }
    }
}
