//! The casstat Cassandra metrics exporter.
//!
//! This library supports the casstat binary found elsewhere in this project.
//! Casstat polls a Jolokia agent running alongside Cassandra on a fixed
//! interval, decodes the bean-oriented responses into a typed metrics model
//! and serves the latest snapshot to Prometheus in text exposition format.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod exporter;
pub mod jolokia;
pub mod scraper;
pub mod server;
pub mod signals;
