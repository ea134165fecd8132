use anyhow::Result;
use clap::Parser;
use sense_relay::{Config, Credentials};
use std::path::PathBuf;

/// Exchange Sense account credentials for a bearer token and store it where
/// the relay expects to find it.
#[derive(Parser, Debug)]
#[command(name = "sense-login", version)]
struct Args {
    /// Account email.
    #[arg(long, env = "SENSE_EMAIL")]
    email: String,

    /// Account password.
    #[arg(long, env = "SENSE_PASSWORD", hide_env_values = true)]
    password: String,

    /// Where to write the credentials. Defaults to SENSE_CREDENTIAL_FILE.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let output = match args.output {
        Some(path) => path,
        None => Config::from_env()?.credential_file,
    };

    let http = reqwest::Client::new();
    let creds = Credentials::fetch(&http, &args.email, &args.password).await?;
    creds.store(&output)?;

    println!(
        "stored credentials for monitor {} ({}) in {}",
        creds.monitor_id,
        creds.time_zone,
        output.display()
    );
    Ok(())
}
