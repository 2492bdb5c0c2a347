use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use weather_mcp::{config::Transport, Config, Result, Server};

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries protocol traffic in stdio mode, so logs go to stderr.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
        .init();

    let config = Config::parse();
    config.validate()?;
    let server = Server::from_config(&config);

    match config.transport {
        Transport::Stdio => {
            info!("Serving weather tool on stdio");
            server.serve_stdio().await?;
            // The pending stdin read sits on a blocking thread that would keep
            // the runtime from shutting down.
            std::process::exit(0);
        }
        Transport::Http => {
            let handle = server.serve_http(&config.bind).await?;
            info!(
                "Serving weather tool on http://{}",
                handle.bound_addr.as_deref().unwrap_or(&config.bind)
            );
            tokio::signal::ctrl_c().await?;
            info!("Shutting down HTTP server");
            handle.stop().await?;
        }
    }
    Ok(())
}
