//! `rpcwire` command line tool.
//!
//! Opens a connection to an RPC server and calls the NULL procedure.

mod cli;

use std::{net::SocketAddr, process::ExitCode, time::Duration};

use clap::Parser;
use cli::{Cli, Command};
use rpcwire::Connection;

#[tokio::main]
async fn main() -> ExitCode {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let Command::Ping {
        addr,
        program,
        version,
        timeout_ms,
    } = Cli::parse().command;

    let addr: SocketAddr = match addr.parse() {
        Ok(addr) => addr,
        Err(error) => {
            eprintln!("invalid address {addr}: {error}");
            return ExitCode::FAILURE;
        }
    };
    let connection = match Connection::builder(program, version).connect(addr).await {
        Ok(connection) => connection,
        Err(error) => {
            eprintln!("cannot connect to {addr}: {error}");
            return ExitCode::FAILURE;
        }
    };
    let result = connection
        .call(program, version, 0, &[], Some(Duration::from_millis(timeout_ms)))
        .await;
    connection.destroy().await;
    match result {
        Ok(_) => {
            println!("program {program} version {version} at {addr} is alive");
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("program {program} version {version} at {addr}: {error}");
            ExitCode::FAILURE
        }
    }
}
