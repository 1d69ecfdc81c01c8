//! Build script rendering man pages for `rpcwire` and its subcommands.

use std::{fs, path::Path};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli.rs"]
mod cli;

fn render(man: Man, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut page = Vec::new();
    man.render(&mut page)?;
    fs::write(path, page)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=src/cli.rs");

    let out_dir = Path::new("target/generated-man");
    fs::create_dir_all(out_dir)?;

    let command = cli::Cli::command();
    for sub in command.get_subcommands() {
        let name = format!("rpcwire-{}", sub.get_name());
        let page = out_dir.join(format!("{name}.1"));
        render(Man::new(sub.clone()).title(name), &page)?;
    }
    render(Man::new(command), &out_dir.join("rpcwire.1"))
}
