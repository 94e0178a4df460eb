//! End-to-end verification harness
//!
//! Seeds the in-memory backend, stands up an in-process Director, runs the
//! pipeline services as they would run in deployment, drives device load
//! and polls the sinks. The scenarios live under `tests/`.

pub mod fixtures;
pub mod helpers;
pub mod services;
