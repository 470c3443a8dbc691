// keyword_lookup.rs - Benchmarks for namespace initialization and keyword lookup
//
// Run with: cargo bench --features test-support --bench keyword_lookup
// Compare baselines: cargo bench --features test-support --bench keyword_lookup -- --baseline before

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio_util::sync::CancellationToken;
use url::Url;

use kestrel::state::{scan_workspace, WorldState};
use kestrel::test_utils::{create_fixture_workspace, FixtureConfig};

/// Index every fixture file the way the server does after `initialized`.
fn build_state(workspace_path: &std::path::Path) -> WorldState {
    let root = std::fs::canonicalize(workspace_path).unwrap();
    let folder = Url::from_file_path(&root).unwrap();
    let mut state = WorldState::default();
    state.workspace_folders.push(folder.clone());
    state.apply_workspace_index(scan_workspace(&[folder]));
    state
}

fn suite_uri(workspace_path: &std::path::Path, index: usize) -> Url {
    let root = std::fs::canonicalize(workspace_path).unwrap();
    Url::from_file_path(root.join(format!("suite_{}.robot", index))).unwrap()
}

fn presets() -> Vec<(&'static str, FixtureConfig)> {
    vec![
        ("small", FixtureConfig::small()),
        ("medium", FixtureConfig::medium()),
        ("large", FixtureConfig::large()),
    ]
}

/// Cold namespace: import resolution plus the keyword call pass
fn bench_namespace_diagnostics(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("namespace_diagnostics");

    for (name, config) in presets() {
        let workspace = create_fixture_workspace(&config);
        let state = build_state(workspace.path());
        let state = &state;
        let uri = suite_uri(workspace.path(), 0);

        group.bench_with_input(BenchmarkId::from_parameter(name), &uri, |b, uri| {
            b.to_async(&rt).iter(|| async move {
                state.invalidate_all();
                let namespace = state.namespace(uri).unwrap();
                let diagnostics = namespace.diagnostics(&CancellationToken::new()).await.unwrap();
                black_box(diagnostics)
            });
        });
    }

    group.finish();
}

/// Warm lookups against an initialized namespace
fn bench_find_keyword(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("find_keyword");

    let config = FixtureConfig::medium();
    let workspace = create_fixture_workspace(&config);
    let state = build_state(workspace.path());
    let namespace = state.namespace(&suite_uri(workspace.path(), 0)).unwrap();
    let cancel = CancellationToken::new();
    rt.block_on(namespace.scope(&cancel)).unwrap();
    let (namespace, cancel) = (&namespace, &cancel);

    let cases = [
        ("own", "Suite 0 Helper"),
        ("resource", "Resource 0 Keyword 3"),
        ("library", "Log"),
        ("qualified", "BuiltIn.Log"),
        ("bdd", "Given Resource 0 Keyword 3"),
        ("missing", "No Such Keyword Anywhere"),
    ];
    for (label, name) in cases {
        group.bench_with_input(BenchmarkId::from_parameter(label), name, |b, name| {
            b.to_async(&rt)
                .iter(|| async move { black_box(namespace.find_keyword(name, cancel).await.unwrap()) });
        });
    }

    group.finish();
}

/// Unused keyword scan over the whole workspace
fn bench_workspace_references(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("workspace_references");
    group.sample_size(10);

    for (name, config) in presets() {
        let workspace = create_fixture_workspace(&config);
        let state = build_state(workspace.path());
        let state = &state;
        let resource = {
            let root = std::fs::canonicalize(workspace.path()).unwrap();
            Url::from_file_path(root.join("resource_0.resource")).unwrap()
        };

        group.bench_with_input(BenchmarkId::from_parameter(name), &resource, |b, uri| {
            b.to_async(&rt).iter(|| async move {
                let references = state.references();
                let namespace = state.namespace(uri).unwrap();
                let unused = kestrel::diagnostics::unused_keywords(
                    &namespace,
                    &references,
                    &CancellationToken::new(),
                )
                .await
                .unwrap();
                black_box(unused)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_namespace_diagnostics,
    bench_find_keyword,
    bench_workspace_references
);
criterion_main!(benches);
