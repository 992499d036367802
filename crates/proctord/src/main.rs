//! Exam Proctoring Daemon - Main Entry Point

use clap::Parser;
use proctord::{run, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run(Args::parse()).await
}
