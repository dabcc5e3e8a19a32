//! vendorstore - pluggable storage modules.
//!
//! This library defines the contract every storage module implements, a
//! local filesystem module, and a conformance harness that proves a module
//! can be substituted for any other.
//!
//! # Modules
//!
//! - [`storage`] - Module contract, handles, context and the local module
//! - [`conformance`] - Backend-agnostic contract checks
//! - [`commands`] - Operations behind the CLI
//! - [`config`] - Configuration loading
//! - [`logging`] - Tracing subscriber setup
//! - [`cli`] - Command-line interface definitions

pub mod cli;
pub mod commands;
pub mod config;
pub mod conformance;
pub mod logging;
pub mod storage;
