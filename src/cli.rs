// Command-line surface: argument definitions and one handler per
// subcommand. Handlers return `anyhow::Result`; `main` maps an error to
// a non-zero exit code.

use crate::api::HttpTransport;
use crate::auth::{self, Credentials, StoredAuth};
use crate::batch::BatchSize;
use crate::config::ImportConfig;
use crate::import::{dry_run, Importer, NewClient};
use crate::loader::load_records;
use crate::retry::ThreadSleeper;
use crate::ui::{self, ConsoleReporter};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "lgp-import")]
#[command(about = "Bulk lead import for LeadGenius Pro", long_about = None)]
pub struct Cli {
    /// More log output (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a client and import leads from a CSV file into it
    Import(ImportArgs),
    /// Authenticate and save the token for later runs
    Login(LoginArgs),
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Path to the CSV file
    #[arg(long)]
    pub csv: PathBuf,

    /// Name for the new client
    #[arg(long)]
    pub client_name: String,

    /// Company website URL (defaults to one derived from the name)
    #[arg(long)]
    pub company_url: Option<String>,

    /// API base URL (defaults to LGP_BASE_URL, then the hosted app)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Leads per request
    #[arg(long)]
    pub batch_size: Option<BatchSize>,

    /// Attempts per request before giving up
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_retries: Option<u32>,

    /// Parse the CSV and show the plan without contacting the server
    #[arg(long)]
    pub dry_run: bool,
}

impl ImportArgs {
    /// Flags win over the environment.
    pub fn apply(&self, mut config: ImportConfig) -> ImportConfig {
        if let Some(url) = &self.base_url {
            config = config.with_base_url(url);
        }
        if let Some(size) = self.batch_size {
            config.batch_size = size;
        }
        if let Some(n) = self.max_retries {
            config.max_retries = n;
        }
        config
    }

    pub fn client(&self) -> NewClient {
        NewClient {
            name: self.client_name.clone(),
            company_url: self.company_url.clone(),
        }
    }
}

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Account email (prompted for when missing)
    #[arg(long)]
    pub email: Option<String>,

    /// Account password (prompted for when missing)
    #[arg(long)]
    pub password: Option<String>,

    /// Application base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// Print the token instead of saving it
    #[arg(long)]
    pub no_save: bool,
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Import(args) => run_import(args),
        Command::Login(args) => run_login(args),
    }
}

pub fn run_import(args: ImportArgs) -> Result<()> {
    let config = args.apply(ImportConfig::from_env()?);
    config.validate()?;

    println!("Reading CSV: {}", args.csv.display());
    let records = load_records(&args.csv)
        .with_context(|| format!("Error reading CSV {}", args.csv.display()))?;
    println!("Loaded {} leads from CSV", records.len());

    if args.dry_run {
        print!("{}", ui::render_dry_run(&dry_run(&records, config.batch_size))?);
        return Ok(());
    }

    let credentials = Credentials::resolve()?;
    let headers = credentials.headers()?;
    let transport = HttpTransport::new(config.http_timeout)?;
    let reporter = ConsoleReporter::new(&config.base_url);

    let mut importer = Importer::new(transport, ThreadSleeper, config, headers, &reporter);
    importer.run(&args.client(), &records)?;
    Ok(())
}

pub fn run_login(args: LoginArgs) -> Result<()> {
    let base_url = match args.base_url {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => ImportConfig::from_env()?.base_url,
    };
    let (email, password) = ui::prompt_credentials(args.email, args.password)?;

    println!("Authenticating with {}...", base_url);
    let transport = HttpTransport::new(None)?;
    let tokens = auth::login(&transport, &base_url, &email, &password)?;
    println!("Successfully authenticated!");

    if args.no_save {
        println!("{}", tokens.access_token);
        return Ok(());
    }

    let path = auth::auth_file_path();
    // Keep an API key or user id saved by an earlier setup.
    let previous = auth::load_stored_auth(&path)
        .ok()
        .flatten()
        .unwrap_or_default();
    let stored = StoredAuth {
        token: Some(tokens.access_token),
        refresh_token: tokens.refresh_token,
        email: Some(email),
        base_url: Some(base_url),
        ..previous
    };
    auth::save_stored_auth(&path, &stored)?;
    println!("Credentials saved to {}", path.display());
    Ok(())
}
