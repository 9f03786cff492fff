//! Common test infrastructure
//!
//! Fake enrichment services, scripted extractors, an engine builder and an HTTP test
//! server. Tests should only import from this module, not from internal submodules.

#![allow(dead_code)]

mod constants;
mod fake_services;
mod fixtures;
mod server;

pub use constants::*;
pub use fake_services::FakeService;
pub use fixtures::{
    test_settings, wait_for_state, FlakyStore, wait_until_terminal, ScriptedExtractor, TestEngine,
    TestEngineBuilder,
};
pub use server::TestServer;
