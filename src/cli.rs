//! Command line interface for the `rpcwire` binary.
//!
//! The definition is shared with the build script, which renders the man
//! page from it, so it depends on `clap` alone.

use clap::{Parser, Subcommand};

/// Command line arguments for the `rpcwire` binary.
#[derive(Debug, Parser)]
#[command(name = "rpcwire", version, about = "Probe ONC-RPC services over TCP")]
pub struct Cli {
    /// Operation to perform.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands of the `rpcwire` binary.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Call procedure 0 (NULL) of a program and report the outcome.
    Ping {
        /// Server address, for example `127.0.0.1:2049`.
        #[arg(short, long)]
        addr: String,
        /// Program number.
        #[arg(short, long)]
        program: u32,
        /// Program version.
        #[arg(short = 'V', long = "prog-version")]
        version: u32,
        /// Call timeout in milliseconds.
        #[arg(short, long, default_value_t = 5000)]
        timeout_ms: u64,
    },
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn parses_ping() {
        let cli = Cli::parse_from([
            "rpcwire",
            "ping",
            "--addr",
            "127.0.0.1:111",
            "--program",
            "100000",
            "--prog-version",
            "2",
        ]);
        let Command::Ping {
            addr,
            program,
            version,
            timeout_ms,
        } = cli.command;
        assert_eq!(addr, "127.0.0.1:111");
        assert_eq!((program, version, timeout_ms), (100_000, 2, 5000));
    }
}
