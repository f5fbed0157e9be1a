//! # Isotool Core Library
//!
//! This crate contains the engine behind the `isotool` CLI: it installs and runs tools shipped as
//! Python wheel archives, each in its own isolated virtual environment, so that tools with
//! conflicting dependencies never share packages.
//!
//! The library is built for the `isotool` binary, but every piece can be embedded on its own.
//!
//! ## Modules Overview
//! - [`archive`] – Reading wheel metadata and entry points without installing anything
//! - [`catalog`] – Discovering archives in wheel and bundle directories, descriptor cache, bundles
//! - [`tools`] – Tool lookup and configuration cache on top of the catalog
//! - [`manifest`] – `pyproject.toml` parsing and conversion into tool configurations
//! - [`requirement`] – Requirement strings and version constraint checks
//! - [`environment`] – Lifecycle of the per-tool environments
//! - [`resolver`] – Missing dependencies, conflicts and the `ensure` flow
//! - [`process`] / [`fs`] – Process spawning and filesystem queries behind small traits
//! - [`config`] – Settings file and `ISOTOOL_*` overrides
//! - [`util`] – Shared utilities (names, platform paths)
//! - [`global`] – Per-user directories

pub mod archive;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod environment;
pub mod error;
pub mod fs;
pub mod global;
pub mod logging;
pub mod manifest;
pub mod process;
pub mod requirement;
pub mod resolver;
pub mod tools;
pub mod util;

#[cfg(test)]
pub(crate) mod test_support;

pub use archive::*;
pub use catalog::*;
pub use config::*;
pub use environment::*;
pub use error::*;
pub use manifest::*;
pub use requirement::*;
pub use resolver::*;
pub use tools::*;
pub use util::*;
