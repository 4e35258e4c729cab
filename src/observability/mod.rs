// Observability: metrics

pub mod metrics;

pub use metrics::{init, push_to_gateway};
