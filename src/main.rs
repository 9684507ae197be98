//! Command-line entry point for the agency client.

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> { agency_client::app::run().await }
