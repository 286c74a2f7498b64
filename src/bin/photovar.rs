//! photovar CLI
//!
//! Command-line interface for the photovar batch variation and remote
//! background-replacement library.

#[cfg(feature = "cli")]
use photovar::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
