//! Transfer spec compiler.
//!
//! Argument layout produced for the executable:
//!
//! ```text
//! [-i key]... <schema switches in schema order> [--dest64] [EX_ascp_args]
//!     <sources | --file-list=... | --file-pair-list=...> <destination>
//! ```
//!
//! `-M <port>` and the multi-session switches are prepended later, per
//! session.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::{Result, TransferError};
use crate::spec::file_list::{write_list, ListKind};
use crate::spec::schema::{ParamDef, ParamSchema, Render, Transform, ValueType};
use crate::spec::{Invocation, TransferSpec, Variant};

/// UDP port used when the spec sets no `fasp_port`
pub const DEFAULT_UDP_PORT: u16 = 33001;

/// Environment variable carrying the authorization token
pub const TOKEN_ENV: &str = "ASPERA_SCP_TOKEN";

const DEFAULT_DESTINATION: &str = "/";

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Where file lists are written; without it sources go on the command line
    pub file_list_dir: Option<PathBuf>,
    /// SSH keys used when the spec authenticates with a token
    pub bypass_keys: Vec<PathBuf>,
}

/// Parallel session plan derived from `multi_session` and `fasp_port`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiSession {
    pub count: u32,
    pub udp_base: u16,
}

#[derive(Debug, Clone)]
pub struct Compilation {
    pub invocation: Invocation,
    pub multi_session: Option<MultiSession>,
    /// Spec keys recognized by the schema, in schema order
    pub consumed: Vec<String>,
    /// Scratch file list written for this compilation
    pub file_list: Option<PathBuf>,
}

/// Compile `spec` against `schema`.
///
/// Validation failures are reported before any file is written.
pub fn compile(
    spec: &TransferSpec,
    schema: &ParamSchema,
    options: &CompileOptions,
) -> Result<Compilation> {
    let mut invocation = Invocation::default();
    let mut consumed = Vec::new();

    for def in schema.iter() {
        let supplied = lookup(spec, &def.key);
        if supplied.is_some() {
            consumed.push(def.key.clone());
        }
        let Some(value) = supplied.or(def.default.as_ref()) else {
            if def.mandatory {
                return Err(TransferError::MissingParameter {
                    key: def.key.clone(),
                });
            }
            continue;
        };
        check_type(def, value)?;
        check_allowed(def, value)?;
        render(def, value, &mut invocation);
    }

    for key in spec.keys() {
        if schema.get(key).is_none() {
            warn!(key, "ignoring unrecognized transfer spec parameter");
        }
    }

    // Token authentication replaces the password with bypass keys.
    let mut key_paths = string_list(spec, "EX_ssh_key_paths")?;
    if spec.contains_key("token") && !spec.contains_key("remote_password") {
        key_paths.extend(options.bypass_keys.iter().map(|p| p.display().to_string()));
    }
    for key in key_paths {
        invocation.prepend(["-i".to_string(), key]);
    }

    if invocation.variant.base64_destination() {
        invocation.args.push("--dest64".to_string());
    }

    let extra_args = string_list(spec, "EX_ascp_args")?;
    let external_list = lookup_str(spec, "EX_file_list").is_some()
        || lookup_str(spec, "EX_file_pair_list").is_some()
        || extra_args
            .iter()
            .any(|a| a.starts_with("--file-list") || a.starts_with("--file-pair-list"));
    invocation.args.extend(extra_args);

    let file_list = match (spec.paths()?, external_list) {
        (Some(_), true) => {
            return Err(TransferError::InvalidSpec(
                "file list provided both in paths and as an executable argument".to_string(),
            ))
        }
        (None, false) => {
            return Err(TransferError::InvalidSpec(
                "nothing to transfer: paths is missing".to_string(),
            ))
        }
        (Some(paths), false) if paths.is_empty() => {
            return Err(TransferError::InvalidSpec(
                "nothing to transfer: paths is empty".to_string(),
            ))
        }
        (Some(paths), false) => match &options.file_list_dir {
            Some(dir) => {
                let kind = ListKind::for_paths(&paths);
                let file = write_list(dir, &paths, kind)?;
                invocation.args.push(kind.argument(&file));
                Some(file)
            }
            None => {
                if paths.iter().any(|p| p.destination.is_some()) {
                    warn!("no file list directory configured, path destinations ignored");
                }
                invocation.args.extend(paths.into_iter().map(|p| p.source));
                None
            }
        },
        (None, true) => {
            if let Some(list) = lookup_str(spec, "EX_file_list") {
                invocation
                    .args
                    .push(format!("{}={}", ListKind::Sources.option(), list));
            }
            if let Some(list) = lookup_str(spec, "EX_file_pair_list") {
                invocation
                    .args
                    .push(format!("{}={}", ListKind::Pairs.option(), list));
            }
            None
        }
    };

    let destination = lookup_str(spec, "destination_root").unwrap_or(DEFAULT_DESTINATION);
    let destination = if invocation.variant.base64_destination() {
        STANDARD.encode(destination)
    } else {
        destination.to_string()
    };
    invocation.args.push(destination);

    let multi_session = multi_session_plan(spec)?;

    debug!(
        variant = ?invocation.variant,
        args = ?invocation.args,
        env = ?invocation.env_names().collect::<Vec<_>>(),
        "compiled transfer spec"
    );

    Ok(Compilation {
        invocation,
        multi_session,
        consumed,
        file_list,
    })
}

/// Spec value, treating `null` and an empty `source_root` as absent.
fn lookup<'a>(spec: &'a TransferSpec, key: &str) -> Option<&'a Value> {
    match spec.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if key == "source_root" && s.is_empty() => None,
        Some(value) => Some(value),
    }
}

fn lookup_str<'a>(spec: &'a TransferSpec, key: &str) -> Option<&'a str> {
    lookup(spec, key).and_then(Value::as_str)
}

fn string_list(spec: &TransferSpec, key: &str) -> Result<Vec<String>> {
    let Some(value) = lookup(spec, key) else {
        return Ok(Vec::new());
    };
    let invalid = |value: &Value| TransferError::InvalidType {
        key: key.to_string(),
        value: value.to_string(),
        actual: ValueType::name_of(value),
        expected: "array of string".to_string(),
    };
    value
        .as_array()
        .ok_or_else(|| invalid(value))?
        .iter()
        .map(|item| item.as_str().map(str::to_string).ok_or_else(|| invalid(item)))
        .collect()
}

fn check_type(def: &ParamDef, value: &Value) -> Result<()> {
    if def.accepts(value) {
        return Ok(());
    }
    Err(TransferError::InvalidType {
        key: def.key.clone(),
        value: value.to_string(),
        actual: ValueType::name_of(value),
        expected: def.accepted_names(),
    })
}

fn check_allowed(def: &ParamDef, value: &Value) -> Result<()> {
    let Some(allowed) = &def.allowed else {
        return Ok(());
    };
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    for item in items {
        let text = plain_text(item);
        if !allowed.iter().any(|a| *a == text) {
            return Err(TransferError::InvalidValue {
                key: def.key.clone(),
                value: text,
                allowed: allowed.join(", "),
            });
        }
    }
    Ok(())
}

fn render(def: &ParamDef, value: &Value, invocation: &mut Invocation) {
    match &def.render {
        Render::Env { var } => {
            invocation.env.insert(var.clone(), rendered_text(def, value));
        }
        Render::Flag { switch, negate } => {
            if value.as_bool().unwrap_or(false) != *negate {
                invocation.args.push(switch.clone());
            }
        }
        Render::Switch { switch } => match value {
            Value::Array(items) if def.transform != Some(Transform::JsonBase64) => {
                for item in items {
                    invocation.args.push(switch.clone());
                    invocation.args.push(rendered_text(def, item));
                }
            }
            _ => {
                invocation.args.push(switch.clone());
                invocation.args.push(rendered_text(def, value));
            }
        },
        Render::Variant => {
            if value.as_bool() == Some(true) {
                invocation.variant = Variant::Ascp4;
            }
        }
        Render::Ignored => {}
    }
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn rendered_text(def: &ParamDef, value: &Value) -> String {
    let text = plain_text(value);
    match &def.transform {
        None => text,
        Some(Transform::Strip { chars }) => text.chars().filter(|c| !chars.contains(*c)).collect(),
        Some(Transform::Map { values }) => values.get(&text).cloned().unwrap_or(text),
        Some(Transform::Base64) => STANDARD.encode(text),
        Some(Transform::JsonBase64) => STANDARD.encode(value.to_string()),
        Some(Transform::OneZero) => match value.as_bool() {
            Some(true) => "1".to_string(),
            Some(false) => "0".to_string(),
            None => text,
        },
    }
}

fn multi_session_plan(spec: &TransferSpec) -> Result<Option<MultiSession>> {
    let Some(count) = integer_param(spec, "multi_session")? else {
        return Ok(None);
    };
    if count < 0 {
        return Err(TransferError::InvalidSpec(format!(
            "multi_session must not be negative, got {count}"
        )));
    }
    if count == 0 {
        return Ok(None);
    }
    let count = u32::try_from(count)
        .map_err(|_| TransferError::InvalidSpec(format!("multi_session too large: {count}")))?;
    let udp_base = match integer_param(spec, "fasp_port")? {
        Some(port) => u16::try_from(port)
            .map_err(|_| TransferError::InvalidSpec(format!("fasp_port out of range: {port}")))?,
        None => DEFAULT_UDP_PORT,
    };
    Ok(Some(MultiSession { count, udp_base }))
}

/// Integer value of `key`, covering the whole `i64` and `u64` ranges.
fn integer_param(spec: &TransferSpec, key: &str) -> Result<Option<i128>> {
    let Some(value) = lookup(spec, key) else {
        return Ok(None);
    };
    value
        .as_i64()
        .map(i128::from)
        .or_else(|| value.as_u64().map(i128::from))
        .map(Some)
        .ok_or_else(|| TransferError::InvalidSpec(format!("{key} must be an integer, got {value}")))
}
