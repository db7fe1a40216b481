//! HTTP application hosting the Cortical hub.

pub mod app;
