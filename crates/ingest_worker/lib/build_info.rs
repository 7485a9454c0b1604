/// Build metadata reported by `--version`, the bootstrap log event and `/metrics`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_COMMIT_HASH: &str = env!("INGEST_WORKER_GIT_COMMIT_HASH");
pub const VERSION_WITH_COMMIT: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "+",
    env!("INGEST_WORKER_GIT_COMMIT_HASH")
);

/// Short hash for log context and metric labels. `"unknown"` is returned untouched.
pub fn short_commit_hash() -> &'static str {
    let short_len = 12usize.min(GIT_COMMIT_HASH.len());
    &GIT_COMMIT_HASH[..short_len]
}
