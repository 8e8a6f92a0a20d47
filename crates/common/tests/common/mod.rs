//! Shared test utilities for store and queue integration tests
#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use common::config::Config;
use common::testkit::TestNetwork;
use tracing_subscriber::filter::LevelFilter;

static TRACING: Once = Once::new();

/// Install a test subscriber once
///
/// `RUST_LOG` wins; otherwise the level comes from the test config.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let level = test_config().log_level().unwrap();
        let filter = tracing_subscriber::EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(level).into())
            .from_env_lossy();
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A network with the named parties already added
pub fn setup_network(names: &[&str]) -> TestNetwork {
    init_tracing();
    let mut net = TestNetwork::new().with_config(test_config());
    for name in names {
        net.add_party(*name).unwrap();
    }
    net
}

/// Short retry delay so tests stay fast
pub fn test_config() -> Config {
    Config {
        visibility_retry_ms: 20,
        log_level: "warn".into(),
        ..Config::default()
    }
}

pub const WAIT: Duration = Duration::from_secs(3);
