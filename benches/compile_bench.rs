use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fasprun::spec::{compile, CompileOptions, ParamSchema, TransferSpec};
use serde_json::{json, Value};
use tempfile::TempDir;

fn make_spec(path_count: usize) -> TransferSpec {
    let paths: Vec<Value> = (0..path_count)
        .map(|i| json!({"source": format!("/data/dir{}/file{}.bin", i % 16, i)}))
        .collect();
    TransferSpec::new()
        .with("direction", "send")
        .with("remote_host", "demo.example.com")
        .with("remote_user", "bench")
        .with("token", "Bearer abc")
        .with("target_rate_kbps", 100_000)
        .with("cipher", "aes-128")
        .with("tags", json!({"app": {"job": "bench"}}))
        .with("destination_root", "/incoming")
        .with("paths", Value::Array(paths))
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    let schema = ParamSchema::builtin();
    let inline = CompileOptions::default();
    let scratch = TempDir::new().unwrap();
    let with_list = CompileOptions {
        file_list_dir: Some(scratch.path().to_path_buf()),
        ..Default::default()
    };

    for path_count in [1usize, 100, 1000].iter() {
        let spec = make_spec(*path_count);

        group.bench_with_input(BenchmarkId::new("inline", path_count), &spec, |b, spec| {
            b.iter(|| black_box(compile(black_box(spec), schema, &inline).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("file_list", path_count), &spec, |b, spec| {
            b.iter(|| {
                let compiled = compile(black_box(spec), schema, &with_list).unwrap();
                if let Some(list) = compiled.file_list {
                    std::fs::remove_file(list).unwrap();
                }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compile);
criterion_main!(benches);
