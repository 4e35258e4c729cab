pub mod artifact;
pub mod config;
pub mod constants;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod run;
