//! Binary entry point for the betwire client.
//!
//! The runtime logic lives in `betwire::client`, so this binary only
//! delegates to the shared library code. The protocol engine runs on a single
//! thread; blocking waits are awaits on that thread.

use anyhow::Result;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> { betwire::client::run().await }
