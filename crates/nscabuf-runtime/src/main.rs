//! nscabuf: buffering proxy in front of an NSCA-speaking monitoring master.
//! Single process: TCP listener, decision loop and publisher as tokio tasks.

use clap::Parser;

use nscabuf_core::BufferConfig;

mod cli;
mod cmd_send;
mod daemon;
mod decision_loop;
mod health;
mod listener;
mod publish;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    match args.command {
        cli::Command::Daemon(opts) => {
            init_logging(opts.trace);
            tracing::info!(listen = %opts.listen, "nscabuf daemon starting");
            daemon::run_daemon(&opts).await?;
        }
        cli::Command::CheckConfig(opts) => {
            let config = BufferConfig::load(&opts.config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        cli::Command::Send(opts) => {
            cmd_send::cmd_send(&opts).await?;
        }
    }

    Ok(())
}

fn init_logging(trace: bool) {
    let filter = if trace {
        "trace".to_string()
    } else {
        std::env::var("NSCABUF_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string())
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}
