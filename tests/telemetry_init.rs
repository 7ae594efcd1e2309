//! Global tracing setup. Kept in its own test binary: installing the global
//! subscriber is process-wide.

use beam_viewer::telemetry::{self, OutputFormat, TracingConfig};
use tracing::Level;

#[test]
fn test_repeated_init_keeps_first_subscriber() {
    let config = TracingConfig::new(Level::WARN).with_ansi(false);
    telemetry::init(config.clone()).unwrap();
    assert!(tracing::dispatcher::has_been_set());

    // later callers, whatever their format, reuse the installed subscriber
    telemetry::init(config.with_format(OutputFormat::Json)).unwrap();
    telemetry::init_from_config(&beam_viewer::config::ViewerConfig::default()).unwrap();
    tracing::warn!("still logging");
}
