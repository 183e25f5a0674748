//! Renders the `betwire(1)` man page.
//!
//! The page documents the agency client's flags (agency id, server address,
//! batch size, bets file and the polling knobs) straight from the clap
//! definitions in `cli-defs`, so the page cannot drift from the parser.

use std::{env, fs, io, path::PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;
use cli_defs::Cli;

fn main() -> io::Result<()> {
    println!("cargo::rerun-if-changed=cli-defs/src");

    // Absent during `cargo check` and rust-analyzer runs; nothing to emit then.
    let Some(out_dir) = env::var_os("OUT_DIR").map(PathBuf::from) else {
        return Ok(());
    };

    let page = Man::new(Cli::command().name("betwire"));
    let mut rendered = Vec::new();
    page.render(&mut rendered)?;
    fs::write(out_dir.join("betwire.1"), rendered)
}
