//! Wiring for the `container-metrics` binary: configuration and HTTP API

pub mod api;
pub mod config;
