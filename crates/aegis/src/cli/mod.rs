//! Command-line interface for the Aegis dispatch coordinator.
//!
//! `run` drives the coordinator loop; the other subcommands are operator
//! tools over the same store.

pub mod config;
pub mod output;

pub mod incident;
pub mod reroute;
pub mod run;
pub mod stations;
pub mod stats;
