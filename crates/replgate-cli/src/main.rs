//! `replgate` Client
//!
//! Reads code from stdin and sends it to a `replgate` gateway, e.g.
//!
//! ```text
//! echo '"Hello".postln' | replgate-client
//! ```

use std::time::Duration;

use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing::debug;

use replgate_cli::{ClientOptions, ReplClient};
use replgate_core::Query;
use replgate_core::config::{load_config, parse_duration};

#[derive(Parser, Debug)]
#[command(name = "replgate-client")]
#[command(version, about = "Send code read from stdin to a replgate gateway", long_about = None)]
struct Cli {
    /// Gateway URL
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Gateway port
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the value the REPL returns
    #[arg(short = 'o', long)]
    stdout: bool,

    /// Quit the REPL
    #[arg(short, long)]
    kill: bool,

    /// Reload the REPL
    #[arg(short, long)]
    reload: bool,

    /// Retry failed queries until the retry timeout
    #[arg(long)]
    retry: bool,

    /// HTTP timeout (e.g. "10s")
    #[arg(short, long, value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// How long to keep retrying (e.g. "5s")
    #[arg(long, value_parser = parse_duration)]
    retry_timeout: Option<Duration>,
}

impl Cli {
    fn options(&self) -> anyhow::Result<ClientOptions> {
        let config = load_config()?;
        let mut options = ClientOptions::from(&config.client);
        if let Some(host) = &self.host {
            options.url.clone_from(host);
        }
        if let Some(port) = self.port {
            options.port = port;
        }
        if let Some(timeout) = self.timeout {
            options.timeout = timeout;
        }
        if let Some(retry_timeout) = self.retry_timeout {
            options.retry_timeout = retry_timeout;
        }
        options.retry = self.retry;
        Ok(options)
    }

    async fn query(&self) -> anyhow::Result<Query> {
        let mut code = String::new();
        if !self.kill && !self.reload {
            tokio::io::stdin().read_to_string(&mut code).await?;
        }
        Ok(Query {
            code,
            stdout: self.stdout,
            kill: self.kill,
            reload: self.reload,
        })
    }
}

#[tokio::main]
#[allow(clippy::print_stdout)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    replgate_core::tracing_init::init_tracing("replgate_cli=warn", false);

    let options = cli.options()?;
    let query = cli.query().await?;
    let client = ReplClient::new(&options)?;
    debug!(endpoint = client.endpoint(), bytes = query.code.len(), "Sending query");

    let body = client.send(&query).await?;
    print!("{body}");
    Ok(())
}
