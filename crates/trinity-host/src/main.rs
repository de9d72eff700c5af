use anyhow::Result;
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use trinity_host::{handle_message, init_logging, HostConfig, Incoming, ModuleManager};

/// Feed chat lines from stdin to the loaded modules and print their replies.
#[derive(Parser, Debug)]
#[command(name = "trinity-host", version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "trinity.toml")]
    config: PathBuf,

    /// Sender id attached to every line
    #[arg(long, default_value = "@user:localhost")]
    user: String,

    /// Sender display name (defaults to the id)
    #[arg(long)]
    name: Option<String>,

    #[arg(long, default_value = "!local:localhost")]
    room: String,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = HostConfig::load(&args.config)?;

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(&config.log_filter)?;

    let manager = ModuleManager::from_config(&config)?;
    tracing::info!(modules = ?manager.module_names(), "trinity host ready");

    let author_name = args.name.as_deref().unwrap_or(&args.user);
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let content = line.trim();
        if content.is_empty() {
            continue;
        }

        let incoming = Incoming {
            content,
            author_id: &args.user,
            author_name,
            room: &args.room,
        };
        for reply in handle_message(&manager, config.admin_user_id.as_deref(), &incoming) {
            println!("{} <- {}", reply.to, reply.content);
        }
    }

    Ok(())
}
