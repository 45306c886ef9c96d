//! Transfer specs and their compilation into executable invocations.
//!
//! A transfer spec is an open JSON object. [`compile`] checks it against a
//! [`ParamSchema`] and renders the argument list and environment for the
//! transfer executable. The caller's spec is never modified: consumed keys
//! and derived values come back in the [`Compilation`].

pub mod compiler;
pub mod file_list;
pub mod schema;

pub use compiler::{compile, CompileOptions, Compilation, MultiSession, DEFAULT_UDP_PORT};
pub use schema::{ParamDef, ParamSchema, Render, Transform, ValueType};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{Result, TransferError};

// =============================================================================
// Transfer spec
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferSpec(Map<String, Value>);

impl TransferSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(TransferError::InvalidSpec(format!(
                "expected a JSON object, got {}",
                ValueType::name_of(&other)
            ))),
            Err(e) => Err(TransferError::InvalidSpec(format!("malformed JSON: {e}"))),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Parse the `paths` array, if present.
    pub fn paths(&self) -> Result<Option<Vec<TransferPath>>> {
        match self.0.get("paths") {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| TransferError::InvalidSpec(format!("paths: {e}"))),
        }
    }
}

impl From<Map<String, Value>> for TransferSpec {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// One entry of the spec's `paths` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPath {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl TransferPath {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: None,
        }
    }

    pub fn pair(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: Some(destination.into()),
        }
    }
}

// =============================================================================
// Invocation
// =============================================================================

/// Which transfer executable runs the invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// `ascp`: destination passed base64-encoded with `--dest64`
    #[default]
    Ascp,
    /// `ascp4`: destination passed verbatim
    Ascp4,
}

impl Variant {
    pub fn executable_name(self) -> &'static str {
        match self {
            Self::Ascp => "ascp",
            Self::Ascp4 => "ascp4",
        }
    }

    pub fn base64_destination(self) -> bool {
        matches!(self, Self::Ascp)
    }
}

/// Arguments, environment and executable for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub variant: Variant,
    pub args: Vec<String>,
    #[serde(serialize_with = "serialize_redacted")]
    pub env: BTreeMap<String, String>,
}

impl Invocation {
    /// Insert `args` in front of the existing arguments, keeping their order.
    pub fn prepend<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let front: Vec<String> = args.into_iter().map(Into::into).collect();
        self.args.splice(0..0, front);
    }

    /// Force the UDP port, dropping any `-O <port>` already present.
    pub fn set_udp_port(&mut self, port: u16) {
        let mut i = 0;
        while i < self.args.len() {
            if self.args[i] == "-O" && i + 1 < self.args.len() {
                self.args.drain(i..i + 2);
            } else {
                i += 1;
            }
        }
        self.prepend(["-O".to_string(), port.to_string()]);
    }

    /// Value following the first occurrence of `switch`.
    pub fn switch_value(&self, switch: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == switch)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// The destination: always the last argument.
    pub fn destination(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }

    pub fn env_names(&self) -> impl Iterator<Item = &str> {
        self.env.keys().map(String::as_str)
    }
}

fn serialize_redacted<S>(env: &BTreeMap<String, String>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeMap;
    let mut map = serializer.serialize_map(Some(env.len()))?;
    for key in env.keys() {
        map.serialize_entry(key, "<redacted>")?;
    }
    map.end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_from_json() {
        let spec = TransferSpec::from_json_str(r#"{"direction":"send","paths":[{"source":"a"}]}"#)
            .unwrap();
        assert_eq!(spec.get("direction"), Some(&json!("send")));
        assert_eq!(spec.paths().unwrap(), Some(vec![TransferPath::new("a")]));
    }

    #[test]
    fn test_spec_must_be_object() {
        assert!(matches!(
            TransferSpec::from_json_str("[1,2]"),
            Err(TransferError::InvalidSpec(_))
        ));
        assert!(TransferSpec::from_json_str("{").is_err());
    }

    #[test]
    fn test_paths_rejects_bad_shape() {
        let spec = TransferSpec::new().with("paths", json!([{"destination": "x"}]));
        assert!(spec.paths().is_err());
    }

    #[test]
    fn test_prepend_keeps_order() {
        let mut inv = Invocation {
            args: vec!["--mode".into(), "send".into()],
            ..Default::default()
        };
        inv.prepend(["-C", "1:2"]);
        assert_eq!(inv.args, ["-C", "1:2", "--mode", "send"]);
    }

    #[test]
    fn test_set_udp_port_replaces() {
        let mut inv = Invocation {
            args: vec!["--host".into(), "h".into(), "-O".into(), "33001".into(), "/".into()],
            ..Default::default()
        };
        inv.set_udp_port(33005);
        assert_eq!(inv.args, ["-O", "33005", "--host", "h", "/"]);
        assert_eq!(inv.switch_value("-O"), Some("33005"));
    }

    #[test]
    fn test_env_redacted_when_serialized() {
        let mut inv = Invocation::default();
        inv.env.insert("ASPERA_SCP_PASS".into(), "secret".into());
        let text = serde_json::to_string(&inv).unwrap();
        assert!(!text.contains("secret"));
        assert!(text.contains("ASPERA_SCP_PASS"));
    }
}
