//! Glue between command-line flags and the proxy library

pub mod background;
pub mod benchmark;
pub mod logging;
pub mod token;
