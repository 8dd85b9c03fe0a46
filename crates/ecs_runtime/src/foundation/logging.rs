//! Logging utilities and structured logging support

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system
///
/// Honors `RUST_LOG`; calling it twice is harmless.
pub fn init() {
    let _ = env_logger::builder().is_test(false).try_init();
}

/// Initialize logging for tests (captured output, ignores repeat calls)
pub fn init_for_tests() {
    let _ = env_logger::builder().is_test(true).try_init();
}
