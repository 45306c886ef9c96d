//! Declarative parameter schema for transfer specs.
//!
//! Each recognized spec key has one [`ParamDef`] describing the JSON types it
//! accepts, whether it is mandatory, its default, legal values, an optional
//! value transform and how it renders for the executable. Schema order is
//! argument order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::error::{Result, TransferError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ValueType {
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// JSON type name of a value, as used in error messages.
    pub fn name_of(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(n) if n.is_f64() => "float",
            Value::Number(_) => "integer",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

/// How a parameter reaches the executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Render {
    /// `env[var] = value`
    Env { var: String },
    /// Bare switch, emitted when the boolean (inverted if `negate`) is true
    Flag {
        switch: String,
        #[serde(default)]
        negate: bool,
    },
    /// `switch value`, repeated once per element for arrays
    Switch { switch: String },
    /// Boolean selecting the `ascp4` executable
    Variant,
    /// Consumed without rendering (or rendered by dedicated compiler logic)
    Ignored,
}

/// Value rewrite applied after validation, before rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Transform {
    /// Remove every occurrence of these characters
    Strip { chars: String },
    /// Replace whole values; unmapped values pass through
    Map { values: BTreeMap<String, String> },
    Base64,
    /// Serialize as JSON, then base64
    JsonBase64,
    /// Booleans as `1`/`0`
    OneZero,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDef {
    pub key: String,
    pub accepted: Vec<ValueType>,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
    pub render: Render,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ParamDef {
    pub fn new(key: &str, accepted: &[ValueType], render: Render) -> Self {
        Self {
            key: key.to_string(),
            accepted: accepted.to_vec(),
            mandatory: false,
            default: None,
            allowed: None,
            transform: None,
            render,
            description: String::new(),
        }
    }

    pub fn env(key: &str, var: &str) -> Self {
        Self::new(key, &[ValueType::String], Render::Env { var: var.to_string() })
    }

    pub fn flag(key: &str, switch: &str) -> Self {
        Self::new(
            key,
            &[ValueType::Boolean],
            Render::Flag {
                switch: switch.to_string(),
                negate: false,
            },
        )
    }

    pub fn switch(key: &str, switch: &str, accepted: &[ValueType]) -> Self {
        Self::new(
            key,
            accepted,
            Render::Switch {
                switch: switch.to_string(),
            },
        )
    }

    pub fn ignored(key: &str, accepted: &[ValueType]) -> Self {
        Self::new(key, accepted, Render::Ignored)
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn allowed(mut self, values: &[&str]) -> Self {
        self.allowed = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn negated(mut self) -> Self {
        if let Render::Flag { negate, .. } = &mut self.render {
            *negate = true;
        }
        self
    }

    pub fn describe(mut self, text: &str) -> Self {
        self.description = text.to_string();
        self
    }

    pub fn accepts(&self, value: &Value) -> bool {
        self.accepted.iter().any(|t| t.matches(value))
    }

    pub fn accepted_names(&self) -> String {
        self.accepted
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSchema {
    params: Vec<ParamDef>,
}

impl ParamSchema {
    pub fn new(params: Vec<ParamDef>) -> Self {
        let mut schema = Self::default();
        for def in params {
            schema.push(def);
        }
        schema
    }

    /// Parameters understood by `ascp`/`ascp4`.
    pub fn builtin() -> &'static ParamSchema {
        static BUILTIN: OnceLock<ParamSchema> = OnceLock::new();
        BUILTIN.get_or_init(builtin_params)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let params: Vec<ParamDef> = serde_json::from_str(text)
            .map_err(|e| TransferError::Config(format!("invalid parameter schema: {e}")))?;
        Ok(Self::new(params))
    }

    /// Add a definition, replacing one with the same key in place.
    pub fn push(&mut self, def: ParamDef) {
        match self.params.iter_mut().find(|d| d.key == def.key) {
            Some(slot) => *slot = def,
            None => self.params.push(def),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParamDef> {
        self.params.iter().find(|d| d.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamDef> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

fn map(pairs: &[(&str, &str)]) -> Transform {
    Transform::Map {
        values: pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

fn builtin_params() -> ParamSchema {
    use ValueType::*;

    ParamSchema::new(vec![
        // Session
        ParamDef::switch("direction", "--mode", &[String])
            .mandatory()
            .allowed(&["send", "receive"])
            .transform(map(&[("receive", "recv")]))
            .describe("Direction of transfer, relative to this host"),
        ParamDef::switch("remote_host", "--host", &[String])
            .mandatory()
            .describe("Transfer server address"),
        ParamDef::switch("remote_user", "--user", &[String])
            .mandatory()
            .describe("SSH user on the transfer server"),
        ParamDef::switch("ssh_port", "-P", &[Integer]).describe("SSH port"),
        ParamDef::switch("fasp_port", "-O", &[Integer]).describe("UDP port"),
        ParamDef::switch("http_fallback", "-y", &[Boolean])
            .transform(Transform::OneZero)
            .describe("Fall back to HTTP when UDP is blocked"),
        ParamDef::switch("http_fallback_port", "-t", &[Integer]),
        // Credentials: environment only
        ParamDef::env("remote_password", "ASPERA_SCP_PASS").describe("SSH password"),
        ParamDef::env("token", "ASPERA_SCP_TOKEN").describe("Authorization token"),
        ParamDef::env("cookie", "ASPERA_SCP_COOKIE").describe("Metadata for transfer"),
        ParamDef::env("ssh_private_key", "ASPERA_SCP_KEY").describe("SSH private key content"),
        ParamDef::env("content_protection_password", "ASPERA_SCP_FILEPASS")
            .describe("Password for client-side encryption at rest"),
        // Rate control
        ParamDef::switch("target_rate_kbps", "-l", &[Integer]),
        ParamDef::switch("min_rate_kbps", "-m", &[Integer]),
        ParamDef::switch("rate_policy", "--policy", &[String]).allowed(&[
            "low", "fair", "high", "fixed",
        ]),
        // Security
        ParamDef::switch("cipher", "-c", &[String])
            .allowed(&[
                "none",
                "aes-128",
                "aes-192",
                "aes-256",
                "aes-128-cfb",
                "aes-192-cfb",
                "aes-256-cfb",
                "aes-128-gcm",
                "aes-192-gcm",
                "aes-256-gcm",
            ])
            .transform(Transform::Strip {
                chars: "-".to_string(),
            }),
        ParamDef::switch("content_protection", "--file-crypt", &[String])
            .allowed(&["encrypt", "decrypt"]),
        ParamDef::flag("check_host_key", "--ignore-host-key")
            .negated()
            .describe("Set to false to skip the SSH host key check"),
        // File handling
        ParamDef::switch("resume_policy", "-k", &[String])
            .allowed(&["none", "attrs", "sparse_csum", "full_csum"])
            .transform(map(&[
                ("none", "0"),
                ("attrs", "1"),
                ("sparse_csum", "2"),
                ("full_csum", "3"),
            ]))
            .default_value("sparse_csum"),
        ParamDef::switch("overwrite", "--overwrite", &[String]).allowed(&[
            "never",
            "always",
            "diff",
            "older",
            "diff+older",
        ]),
        ParamDef::switch("symlink_policy", "--symbolic-links", &[String]).allowed(&[
            "follow",
            "copy",
            "copy+force",
            "skip",
        ]),
        ParamDef::flag("create_dir", "-d"),
        ParamDef::flag("precalculate_job_size", "--precalculate-job-size"),
        ParamDef::flag("keepalive", "--keepalive"),
        ParamDef::flag("delete_before_transfer", "--delete-before-transfer"),
        ParamDef::flag("remove_after_transfer", "--remove-after-transfer"),
        ParamDef::flag("remove_empty_directories", "--remove-empty-directories"),
        ParamDef::flag("preserve_access_time", "--preserve-access-time"),
        ParamDef::flag("preserve_modification_time", "--preserve-modification-time"),
        ParamDef::flag("preserve_creation_time", "--preserve-creation-time"),
        ParamDef::flag("skip_special_files", "--skip-special-files"),
        ParamDef::flag("apply_local_docroot", "--apply-local-docroot"),
        ParamDef::switch("multi_session_threshold", "--multi-session-threshold", &[Integer]),
        ParamDef::switch("exclude_newer_than", "--exclude-newer-than", &[Integer]),
        ParamDef::switch("exclude_older_than", "--exclude-older-than", &[Integer]),
        ParamDef::switch("src_base", "--src-base", &[String]),
        ParamDef::switch("move_after_transfer", "--move-after-transfer", &[String]),
        ParamDef::switch("source_root", "--source-prefix64", &[String])
            .transform(Transform::Base64)
            .describe("Path prefix for sources"),
        ParamDef::switch("tags", "--tags64", &[Object])
            .transform(Transform::JsonBase64)
            .describe("Metadata attached to the transfer"),
        // Executable selection
        ParamDef::new("use_ascp4", &[Boolean], Render::Variant)
            .describe("Run ascp4 instead of ascp"),
        // Handled by dedicated compiler logic
        ParamDef::ignored("paths", &[Array]).describe("Files to transfer"),
        ParamDef::ignored("destination_root", &[String]).describe("Destination folder"),
        ParamDef::ignored("multi_session", &[Integer]).describe("Number of parallel sessions"),
        ParamDef::ignored("EX_ssh_key_paths", &[Array]).describe("SSH private key files"),
        ParamDef::ignored("EX_ascp_args", &[Array]).describe("Extra executable arguments"),
        ParamDef::ignored("EX_file_list", &[String]).describe("Prebuilt file list"),
        ParamDef::ignored("EX_file_pair_list", &[String]).describe("Prebuilt file pair list"),
        // Server-side hints, never rendered
        ParamDef::ignored("authentication", &[String]),
        ParamDef::ignored("lock_rate_policy", &[Boolean]),
        ParamDef::ignored("lock_min_rate", &[Boolean]),
        ParamDef::ignored("lock_target_rate", &[Boolean]),
        ParamDef::ignored("rate_policy_allowed", &[String]),
        ParamDef::ignored("target_rate_cap_kbps", &[Integer]),
        ParamDef::ignored("min_rate_cap_kbps", &[Integer]),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_has_mandatory_keys() {
        let schema = ParamSchema::builtin();
        for key in ["direction", "remote_host", "remote_user"] {
            assert!(schema.get(key).unwrap().mandatory, "{key} should be mandatory");
        }
        assert!(!schema.get("token").unwrap().mandatory);
    }

    #[test]
    fn test_builtin_unique_keys() {
        let schema = ParamSchema::builtin();
        let mut keys: Vec<&str> = schema.iter().map(|d| d.key.as_str()).collect();
        let total = keys.len();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), total);
    }

    #[test]
    fn test_credentials_render_to_env() {
        let schema = ParamSchema::builtin();
        for key in ["remote_password", "token", "cookie", "ssh_private_key"] {
            assert!(
                matches!(schema.get(key).unwrap().render, Render::Env { .. }),
                "{key} must not reach the command line"
            );
        }
    }

    #[test]
    fn test_value_type_matching() {
        assert!(ValueType::Integer.matches(&json!(5)));
        assert!(!ValueType::Integer.matches(&json!(5.5)));
        assert!(!ValueType::Integer.matches(&json!("5")));
        assert!(ValueType::Array.matches(&json!([])));
        assert_eq!(ValueType::name_of(&json!(1.5)), "float");
    }

    #[test]
    fn test_push_replaces() {
        let mut schema = ParamSchema::new(vec![ParamDef::switch("a", "-a", &[ValueType::String])]);
        schema.push(ParamDef::flag("a", "--a"));
        assert_eq!(schema.len(), 1);
        assert!(matches!(schema.get("a").unwrap().render, Render::Flag { .. }));
    }

    #[test]
    fn test_schema_from_json() {
        let schema = ParamSchema::from_json(
            r#"[
                {"key": "remote_host", "accepted": ["string"], "mandatory": true,
                 "render": {"kind": "switch", "switch": "--host"}},
                {"key": "quiet", "accepted": ["boolean"],
                 "render": {"kind": "flag", "switch": "--verbose", "negate": true}},
                {"key": "tags", "accepted": ["object"], "transform": {"op": "json_base64"},
                 "render": {"kind": "switch", "switch": "--tags64"}}
            ]"#,
        )
        .unwrap();
        assert_eq!(schema.len(), 3);
        assert_eq!(
            schema.get("quiet").unwrap().render,
            Render::Flag {
                switch: "--verbose".into(),
                negate: true
            }
        );
        assert_eq!(schema.get("tags").unwrap().transform, Some(Transform::JsonBase64));
    }

    #[test]
    fn test_schema_from_bad_json() {
        assert!(matches!(
            ParamSchema::from_json(r#"[{"key": "x"}]"#),
            Err(TransferError::Config(_))
        ));
    }
}
