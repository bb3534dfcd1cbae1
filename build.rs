//! Build script rendering the `bbr` man pages.
//!
//! Writes `bbr.1` plus one page per command group (`bbr-deployment.1`,
//! `bbr-director.1`) into `OUT_DIR`, all generated from the clap definitions
//! in `src/cli/mod.rs`.

use std::env;
use std::error::Error;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Command, CommandFactory};
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn render(command: &Command, page: &str, out_dir: &Path) -> Result<(), Box<dyn Error>> {
    let mut buffer = Vec::new();
    Man::new(command.clone()).title(page).render(&mut buffer)?;
    File::create(out_dir.join(format!("{page}.1")))?.write_all(&buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir =
        PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
        })?);

    let command = Cli::command();
    render(&command, "bbr", &out_dir)?;
    for group in command.get_subcommands() {
        render(group, &format!("bbr-{}", group.get_name()), &out_dir)?;
    }

    Ok(())
}
