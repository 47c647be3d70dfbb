//! Shared helpers for omega-core integration tests.

pub mod fake_downloader;
