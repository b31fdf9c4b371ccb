//! Interactive control client
//!
//! Reads commands from stdin, sends them to the sender's control port and
//! prints each reply.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_camera_streamer::{constants::DEFAULT_CONTROL_PORT, control::ControlClient};

#[derive(Parser, Debug)]
#[command(name = "controller", version, about = "Send START/STOP commands to a camera sender")]
struct Args {
    /// Sender host
    #[arg(default_value = "127.0.0.1")]
    host: String,

    /// Control port
    #[arg(short, long, default_value_t = DEFAULT_CONTROL_PORT)]
    port: u16,

    /// Send these commands and exit instead of prompting
    #[arg(short = 'x', long = "exec")]
    commands: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let mut client = ControlClient::connect(addr.as_str())
        .await
        .with_context(|| format!("Cannot connect to {}", addr))?;
    println!("Connected to {}", addr);

    if !args.commands.is_empty() {
        for command in &args.commands {
            println!("{}", client.send_line(command).await?);
        }
        return Ok(());
    }

    println!("Commands: START, STOP, STATUS, QUIT");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = stdin.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }

        let reply = client.send_line(line).await?;
        println!("{}", reply);
    }

    Ok(())
}
