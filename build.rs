use shadow_rs::{BuildPattern, ShadowBuilder};

fn main() {
    // Only package, git and target data end up in `--version`.
    let deny = std::collections::BTreeSet::from([shadow_rs::CARGO_TREE]);
    ShadowBuilder::builder()
        .build_pattern(BuildPattern::Lazy)
        .deny_const(deny)
        .build()
        .expect("failed to retrieve build info");
}
