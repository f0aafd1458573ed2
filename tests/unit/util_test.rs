//! Tests for utility functions

use prometheus_async::util::init_tracing;

#[test]
fn test_init_tracing_twice() {
    init_tracing();
    init_tracing();
    tracing::info!("subscriber installed");
}
