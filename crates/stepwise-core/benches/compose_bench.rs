use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stepwise_core::workflow::document::parse_workflow_document;
use stepwise_core::workflow::{
    InMemorySource, Tier, WorkflowComposer, WorkflowRef, WorkflowResolver,
};

fn bench_compose(c: &mut Criterion) {
    let base = r#"
name = "release"
hooks = ["before", "publish"]

[params]
channel = "stable"

[[steps]]
plugin = "git.checkout"

[[steps]]
hook = "before"

[[steps]]
command = "cargo build --release"

[[steps]]
hook = "publish"

[[steps]]
command = "cargo test --workspace"
"#;

    let overlay = r#"
name = "deploy"
extends = "system:release"

[params]
channel = "beta"

[[hooks.before]]
plugin = "std.echo"
params = { message = "building ${channel}" }

[[hooks.publish]]
command = "cargo publish --dry-run"

[[hooks.after]]
plugin = "std.echo"
params = { message = "done" }
"#;

    let origin = std::path::Path::new("bench.toml");
    let base_doc = parse_workflow_document(base, origin).unwrap();
    let overlay_doc = parse_workflow_document(overlay, origin).unwrap();
    let resolver = WorkflowResolver::new()
        .with_source(InMemorySource::new(Tier::System).with(base_doc))
        .with_source(InMemorySource::new(Tier::Project).with(overlay_doc));
    let composer = WorkflowComposer::new(&resolver);
    let reference = WorkflowRef::named("deploy");

    c.bench_function("parse_workflow_document", |b| {
        b.iter(|| parse_workflow_document(black_box(overlay), origin).unwrap())
    });

    c.bench_function("compose_overlay", |b| {
        b.iter(|| composer.compose_ref(black_box(&reference)).unwrap())
    });
}

criterion_group!(benches, bench_compose);
criterion_main!(benches);
