//! Library side of the `solidfs` binary: argument parsing, settings files,
//! the host directory source tree and image extraction.

pub mod cli;
pub mod config;
pub mod extract;
pub mod source_tree;

pub use cli::{build_image, Cli, Command};
pub use config::CliConfig;
pub use extract::{extract, ExtractOptions, ExtractStats};
pub use source_tree::FsSourceTree;
