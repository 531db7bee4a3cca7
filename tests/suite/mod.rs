//! Integration test suites.

mod pull;
mod server;
