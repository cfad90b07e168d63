pub mod config;
pub mod errors;
pub mod esl;
pub mod exporter;
pub mod observability;
pub mod web;
