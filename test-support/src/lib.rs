pub mod fake_smtp;

/// Routes `tracing` output through the test harness so it shows up for failing tests only.
pub fn setup_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}
