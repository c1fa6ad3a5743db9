use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use phasegate::gates::pattern::{Pattern, SortOrder};
use std::fs;
use std::hint::black_box;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const PATTERNS: [&str; 4] = [
    "docs/brief.md",
    "docs/adr/ADR-0001-*.md",
    "docs/planning/v1/tasks/TASK-*.md",
    "{tests,src}/**/*.test.*",
];

/// Source tree with `modules` feature folders, each holding sources and tests.
fn populate(root: &Path, modules: usize) {
    for m in 0..modules {
        let dir = root.join(format!("src/features/mod{m}/components"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("View.tsx"), "export {}").unwrap();
        fs::write(dir.join("View.test.tsx"), "test()").unwrap();
        fs::write(dir.join("index.ts"), "export {}").unwrap();
    }
    let tasks = root.join("docs/planning/v1/tasks");
    fs::create_dir_all(&tasks).unwrap();
    for t in 1..=modules {
        fs::write(tasks.join(format!("TASK-{t:04}-item.md")), "# Task").unwrap();
    }
    let deps = root.join("node_modules/pkg/lib");
    fs::create_dir_all(&deps).unwrap();
    for i in 0..modules * 4 {
        fs::write(deps.join(format!("f{i}.test.js")), "").unwrap();
    }
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern_compile");
    for pattern in PATTERNS {
        group.bench_with_input(BenchmarkId::from_parameter(pattern), pattern, |b, p| {
            b.iter(|| black_box(Pattern::compile(black_box(p)).unwrap()));
        });
    }
    group.finish();
}

fn bench_match(c: &mut Criterion) {
    let pattern = Pattern::compile("{tests,src}/**/*.test.*").unwrap();
    let candidate = "src/features/mod42/components/deep/View.test.tsx";
    c.bench_function("pattern_match_deep_path", |b| {
        b.iter(|| black_box(pattern.matches(black_box(candidate))));
    });
}

fn bench_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern_walk");
    group.measurement_time(Duration::from_secs(5));
    let skip = vec![".git".to_string(), "node_modules".to_string()];

    for modules in [10usize, 100] {
        let tmp = TempDir::new().unwrap();
        populate(tmp.path(), modules);
        let recursive = Pattern::compile("{tests,src}/**/*.test.*").unwrap();
        let tasks = Pattern::compile("docs/planning/v1/tasks/TASK-*.md").unwrap();

        group.bench_with_input(BenchmarkId::new("recursive", modules), &modules, |b, _| {
            b.iter(|| black_box(recursive.walk(tmp.path(), &skip, SortOrder::Lexical)));
        });
        group.bench_with_input(BenchmarkId::new("tasks_numeric", modules), &modules, |b, _| {
            b.iter(|| black_box(tasks.walk(tmp.path(), &skip, SortOrder::Numeric)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compile, bench_match, bench_walk);
criterion_main!(benches);
