//! Property tests for the transfer spec compiler

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::fs;
use tempfile::TempDir;

use fasprun::spec::{compile, CompileOptions, ParamSchema, TransferSpec};
use fasprun::transfer::fan_out;
use fasprun::TransferError;

fn base_spec(host: &str, user: &str) -> TransferSpec {
    TransferSpec::new()
        .with("direction", "send")
        .with("remote_host", host)
        .with("remote_user", user)
        .with("paths", json!([{"source": "/a/f1"}]))
}

fn compile_default(spec: &TransferSpec) -> fasprun::Result<Vec<String>> {
    compile(spec, ParamSchema::builtin(), &CompileOptions::default()).map(|c| c.invocation.args)
}

fn value_after<'a>(args: &'a [String], switch: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == switch)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn host() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,20}(\\.[a-z]{2,5}){0,2}"
}

fn remote_path() -> impl Strategy<Value = String> {
    "/[A-Za-z0-9 _.-]{1,30}(/[A-Za-z0-9 _.-]{1,30}){0,3}"
}

proptest! {
    #[test]
    fn compile_is_deterministic(
        host in host(),
        user in "[a-z]{1,12}",
        rate in 1u32..10_000_000,
    ) {
        let spec = base_spec(&host, &user).with("target_rate_kbps", rate);
        let first = compile_default(&spec).unwrap();
        let second = compile_default(&spec).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(value_after(&first, "--host"), Some(host.as_str()));
        let rate_text = rate.to_string();
        prop_assert_eq!(value_after(&first, "-l"), Some(rate_text.as_str()));
    }

    #[test]
    fn destination_is_last_and_base64(dest in remote_path()) {
        let spec = base_spec("h", "u").with("destination_root", dest.clone());
        let args = compile_default(&spec).unwrap();
        let last = args.last().unwrap();
        prop_assert_eq!(STANDARD.decode(last).unwrap(), dest.into_bytes());
        prop_assert!(args.contains(&"--dest64".to_string()));
    }

    #[test]
    fn missing_mandatory_is_reported(idx in 0usize..3) {
        let key = ["direction", "remote_host", "remote_user"][idx];
        let mut spec = base_spec("h", "u");
        spec.remove(key);
        match compile_default(&spec) {
            Err(TransferError::MissingParameter { key: missing }) => prop_assert_eq!(missing, key),
            other => prop_assert!(false, "expected MissingParameter, got {:?}", other),
        }
    }

    #[test]
    fn wrong_type_is_rejected(port in "[a-z]{1,6}") {
        let spec = base_spec("h", "u").with("ssh_port", port);
        let is_invalid_type = matches!(
            compile_default(&spec),
            Err(TransferError::InvalidType { .. })
        );
        prop_assert!(is_invalid_type);
    }

    #[test]
    fn inline_sources_keep_order(sources in prop::collection::vec(remote_path(), 1..8)) {
        let paths: Vec<Value> = sources.iter().map(|s| json!({"source": s})).collect();
        let spec = base_spec("h", "u").with("paths", Value::Array(paths));
        let args = compile_default(&spec).unwrap();
        let n = args.len();
        prop_assert_eq!(&args[n - 1 - sources.len()..n - 1], sources.as_slice());
    }

    #[test]
    fn fan_out_covers_every_session(count in 1u32..40, base in 1024u16..60000) {
        let spec = base_spec("h", "u")
            .with("multi_session", count)
            .with("fasp_port", base);
        let compiled = compile(&spec, ParamSchema::builtin(), &CompileOptions::default()).unwrap();
        let plan = compiled.multi_session;
        if count == 1 {
            prop_assert_eq!(plan.map(|p| p.count), Some(1));
        }
        let sessions = fan_out(&compiled.invocation, plan, true).unwrap();
        prop_assert_eq!(sessions.len(), count as usize);
        for (i, session) in sessions.iter().enumerate() {
            let marker = format!("{}:{}", i + 1, count);
            let port = (u32::from(base) + i as u32).to_string();
            prop_assert_eq!(session.switch_value("-C"), Some(marker.as_str()));
            prop_assert_eq!(session.switch_value("-O"), Some(port.as_str()));
            prop_assert_eq!(session.args.iter().filter(|a| *a == "-O").count(), 1);
        }
    }
}

// =============================================================================
// File lists
// =============================================================================

#[test]
fn test_file_list_written_to_directory() {
    let dir = TempDir::new().unwrap();
    let options = CompileOptions {
        file_list_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let spec = base_spec("h", "u").with(
        "paths",
        json!([{"source": "/a/one"}, {"source": "/a/two"}, {"source": "/a/three"}]),
    );

    let compiled = compile(&spec, ParamSchema::builtin(), &options).unwrap();
    let list = compiled.file_list.expect("file list written");
    assert!(list.starts_with(dir.path()));
    assert_eq!(fs::read_to_string(&list).unwrap(), "/a/one\n/a/two\n/a/three\n");

    let args = &compiled.invocation.args;
    assert!(args.contains(&format!("--file-list={}", list.display())));
    assert!(!args.contains(&"/a/one".to_string()));
    assert_eq!(args.last().map(String::as_str), Some("Lw=="));
}

#[test]
fn test_file_pair_list_alternates() {
    let dir = TempDir::new().unwrap();
    let options = CompileOptions {
        file_list_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let spec = base_spec("h", "u").with(
        "paths",
        json!([
            {"source": "/a/one", "destination": "x/one"},
            {"source": "/a/two", "destination": "x/two"}
        ]),
    );

    let compiled = compile(&spec, ParamSchema::builtin(), &options).unwrap();
    let list = compiled.file_list.unwrap();
    assert_eq!(
        fs::read_to_string(&list).unwrap(),
        "/a/one\nx/one\n/a/two\nx/two\n"
    );
    assert!(compiled
        .invocation
        .args
        .contains(&format!("--file-pair-list={}", list.display())));
}

#[test]
fn test_conflicting_path_sources_write_nothing() {
    let dir = TempDir::new().unwrap();
    let options = CompileOptions {
        file_list_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let spec = base_spec("h", "u").with("EX_file_list", "/tmp/list.txt");

    let result = compile(&spec, ParamSchema::builtin(), &options);
    assert!(matches!(result, Err(TransferError::InvalidSpec(_))));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}
