//! 日志初始化

use tracing_subscriber::EnvFilter;

/// 初始化 tracing 日志；级别取 `RUST_LOG`，默认 `info`
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
