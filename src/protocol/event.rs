//! Typed view over management frames.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::protocol::codec::Frame;

/// Fields carrying integers on the management channel
pub const INTEGER_FIELDS: &[&str] = &[
    "Bytescont",
    "FaspFileArgIndex",
    "StartByte",
    "Rate",
    "MinRate",
    "Port",
    "Priority",
    "RateCap",
    "MinRateCap",
    "TCPPort",
    "CreatePolicy",
    "TimePolicy",
    "DatagramSize",
    "XoptFlags",
    "VLinkVersion",
    "PeerVLinkVersion",
    "DSPipelineDepth",
    "PeerDSPipelineDepth",
    "ReadBlockSize",
    "WriteBlockSize",
    "ClusterNumNodes",
    "ClusterNodeId",
    "Size",
    "Written",
    "Loss",
    "FileBytes",
    "PreTransferBytes",
    "TransferBytes",
    "PMTU",
    "Elapsedusec",
    "ArgScansAttempted",
    "ArgScansCompleted",
    "PathScansAttempted",
    "FileScansCompleted",
    "TransfersAttempted",
    "TransfersPassed",
    "Delay",
    "Code",
];

/// Fields carrying `Yes`/`No`
pub const BOOLEAN_FIELDS: &[&str] = &["Encryption", "Remote", "RateLock", "MinRateLock", "PolicyLock"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum EventType {
    Init,
    Session,
    Notification,
    Start,
    Stats,
    Query,
    QueryResponse,
    Rate,
    Stop,
    Cancel,
    ArgStop,
    FileError,
    Done,
    Error,
    Other(String),
    /// Frame without a `Type` field
    #[default]
    Missing,
}

impl EventType {
    pub fn parse(s: &str) -> Self {
        match s {
            "INIT" => Self::Init,
            "SESSION" => Self::Session,
            "NOTIFICATION" => Self::Notification,
            "START" => Self::Start,
            "STATS" => Self::Stats,
            "QUERY" => Self::Query,
            "QUERYRSP" => Self::QueryResponse,
            "RATE" => Self::Rate,
            "STOP" => Self::Stop,
            "CANCEL" => Self::Cancel,
            "ARGSTOP" => Self::ArgStop,
            "FILEERROR" => Self::FileError,
            "DONE" => Self::Done,
            "ERROR" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Init => "INIT",
            Self::Session => "SESSION",
            Self::Notification => "NOTIFICATION",
            Self::Start => "START",
            Self::Stats => "STATS",
            Self::Query => "QUERY",
            Self::QueryResponse => "QUERYRSP",
            Self::Rate => "RATE",
            Self::Stop => "STOP",
            Self::Cancel => "CANCEL",
            Self::ArgStop => "ARGSTOP",
            Self::FileError => "FILEERROR",
            Self::Done => "DONE",
            Self::Error => "ERROR",
            Self::Other(s) => s,
            Self::Missing => "",
        }
    }

    /// DONE and ERROR end a session attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Boolean(bool),
    Text(String),
}

/// Management frame with snake_case keys and typed values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EnhancedEvent {
    fields: BTreeMap<String, FieldValue>,
}

impl EnhancedEvent {
    pub fn from_frame(frame: &Frame) -> Self {
        let fields = frame
            .fields()
            .map(|(key, value)| (snake_case(key), coerce(key, value)))
            .collect();
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.fields.get(key) {
            Some(FieldValue::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn boolean(&self, key: &str) -> Option<bool> {
        match self.fields.get(key) {
            Some(FieldValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.fields.get(key) {
            Some(FieldValue::Text(s)) => Some(s),
            _ => None,
        }
    }
}

fn coerce(key: &str, value: &str) -> FieldValue {
    if INTEGER_FIELDS.contains(&key) {
        if let Ok(n) = value.trim().parse::<i64>() {
            return FieldValue::Integer(n);
        }
    } else if BOOLEAN_FIELDS.contains(&key) {
        if value.eq_ignore_ascii_case("yes") {
            return FieldValue::Boolean(true);
        }
        if value.eq_ignore_ascii_case("no") {
            return FieldValue::Boolean(false);
        }
    }
    FieldValue::Text(value.to_string())
}

/// `SessionId` -> `session_id`, `TCPPort` -> `tcp_port`.
pub fn snake_case(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if c == '-' {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}
