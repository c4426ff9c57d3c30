//! CLI argument definitions using clap derive macros.

use clap::Parser;
use std::path::PathBuf;

/// Sessionware demo server
///
/// Serves a small REST API whose state lives in a signed-cookie or store-backed session.
#[derive(Parser, Debug)]
#[command(name = "sessionware-server")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Config file (default: ~/.sessionware/config.toml)
    #[arg(long, env = "SESSIONWARE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "SESSIONWARE_LISTEN")]
    pub listen: Option<String>,

    /// Cookie signing secrets, comma separated; the first one signs
    #[arg(long, env = "SESSIONWARE_KEYS", value_delimiter = ',', hide_env_values = true)]
    pub keys: Vec<String>,

    /// Generate a throwaway signing secret when none is configured
    #[arg(long)]
    pub dev_key: bool,
}
