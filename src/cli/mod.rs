//! Command-line interface definitions for the `gcsvol` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `gcsvol` binary.
#[derive(Debug, Parser)]
#[command(
    name = "gcsvol",
    version,
    about = "Docker volume plugin backing named volumes with Google Cloud Storage buckets",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Reconcile existing volumes and serve the plugin socket.
    #[command(
        name = "serve",
        about = "Reconcile existing volumes and serve the plugin socket"
    )]
    Serve(ServeCommand),
}

/// Arguments for the `gcsvol serve` subcommand. Each flag overrides the
/// matching `GCSVOL_*` variable or `gcsvol.toml` key.
#[derive(Debug, Parser)]
pub(crate) struct ServeCommand {
    /// Service-account JSON key used for the project id and by the mount
    /// helper.
    #[arg(long = "gcp-key-json", value_name = "PATH")]
    pub(crate) key_file: Option<String>,
    /// Directory holding one `<volume>/_data` mountpoint per volume.
    #[arg(long, value_name = "DIR")]
    pub(crate) root_dir: Option<String>,
    /// Unix socket to listen on.
    #[arg(long = "socket", value_name = "PATH")]
    pub(crate) socket_path: Option<String>,
}
