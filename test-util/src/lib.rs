//! Utilities for integration tests.
//!
//! The `test-util` crate provides an in-process lottery server speaking the
//! agency wire protocol and helpers for writing agency bet files into
//! temporary directories.

use std::{fs, io};

use camino::Utf8PathBuf;
use tempfile::TempDir;

pub mod server;

pub use server::{FakeServer, REJECT_REPLY, ServerOptions, WINNING_NUMBER};

/// A temporary directory holding one agency's bets file.
pub struct BetsFile {
    _dir: TempDir,
    path: Utf8PathBuf,
}

impl BetsFile {
    /// Path of the written file.
    #[must_use]
    pub const fn path(&self) -> &Utf8PathBuf { &self.path }
}

/// Write `lines` to `agency-{agency}.csv` inside a fresh temporary directory.
///
/// Each entry is one input record `first,last,document,birthdate,number`.
///
/// # Errors
/// Returns an error if the directory or file cannot be created.
pub fn write_bets_file(agency: u16, lines: &[String]) -> io::Result<BetsFile> {
    let dir = TempDir::new()?;
    let path = Utf8PathBuf::from_path_buf(dir.path().join(format!("agency-{agency}.csv")))
        .map_err(|p| io::Error::new(io::ErrorKind::InvalidInput, format!("non-UTF-8 path {}", p.display())))?;
    let mut contents = lines.join("\n");
    contents.push('\n');
    fs::write(&path, contents)?;
    Ok(BetsFile { _dir: dir, path })
}

/// Generate `count` records; every `winner_every`-th one carries
/// [`WINNING_NUMBER`], and its document is `{agency}{index:05}`.
#[must_use]
pub fn sample_bets(agency: u16, count: usize, winner_every: usize) -> Vec<String> {
    (1..=count)
        .map(|i| {
            let number = if winner_every != 0 && i.is_multiple_of(winner_every) {
                WINNING_NUMBER.to_owned()
            } else {
                i.checked_rem(7000).unwrap_or_default().to_string()
            };
            format!("Name{i},Surname{i},{agency}{i:05},1990-01-01,{number}")
        })
        .collect()
}
