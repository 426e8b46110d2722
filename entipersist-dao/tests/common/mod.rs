//! Shared helpers for persistence access tests.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::sync::Once;

static TRACING: Once = Once::new();

/// Installs a test-writer subscriber once per test binary.
/// Set `RUST_LOG=debug` to see store logs.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub pinned: bool,
}

pub fn note(title: &str) -> Note {
    Note {
        title: title.to_string(),
        body: format!("body of {title}"),
        pinned: false,
    }
}
