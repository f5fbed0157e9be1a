mod cli;
mod execute;

use clap::Parser;
use crate::cli::CLI;
use anyhow::Result;

fn main() -> Result<()> {
    let cli = CLI::parse();
    let code = execute::execute(cli)?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
