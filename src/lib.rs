pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod otel;
pub mod probe;
pub mod web_server;

#[cfg(test)]
mod test_utils;
