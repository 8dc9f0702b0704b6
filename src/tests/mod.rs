//! Shared test doubles, fixtures and end-to-end pipeline scenarios

pub mod utils;

mod pipeline;
