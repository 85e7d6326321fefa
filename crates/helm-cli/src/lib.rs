//! # helm-cli
//!
//! Command-line interface for the Helm runtime.
//!
//! ## Commands
//!
//! - `helm chat`: interactive chat in the terminal
//! - `helm check`: verify system requirements and configuration
//! - `helm status`: connect devices and print their state
//! - `helm config`: print the effective configuration
//! - `helm cleanup`: delete expired screenshots

pub mod commands;

pub use commands::Cli;
