//! Neon configuration library
//!
//! This module exports the configuration engine and the pieces of the
//! command line tool for testing and integration.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
