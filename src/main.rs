//! kurl CLI - run curl-syntax commands

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use kurl::cookies::{parse_netscape, render_netscape};
use kurl::{
    Cancellation, CommandParser, Executor, FixSuggestion, KurlError, ProcessEnv, RequestConfig,
    Response, Settings, VarMap,
};

/// Exit code for `-f` on an HTTP error status.
const EXIT_HTTP_ERROR: u8 = 22;

#[derive(Parser)]
#[command(name = "kurl")]
#[command(about = "kurl - HTTP requests written in curl command syntax")]
#[command(version)]
struct Cli {
    /// Debug logging for kurl itself (KURL_LOG overrides the default level)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one command given as a single string
    Run {
        /// The command, e.g. 'curl -sL https://example.com'
        command: String,

        #[command(flatten)]
        vars: VarArgs,
    },

    /// Run a command given as separate arguments
    Exec {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },

    /// Parse and validate only, then print the redacted command
    Check {
        command: String,

        #[command(flatten)]
        vars: VarArgs,
    },
}

#[derive(Args, Default)]
struct VarArgs {
    /// Read variables from a dotenv file
    #[arg(long = "env-file", value_name = "PATH")]
    env_files: Vec<PathBuf>,

    /// Set a variable (repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE")]
    vars: Vec<String>,
}

impl VarArgs {
    /// Explicit variables first, then the process environment.
    fn lookup(&self) -> Result<VarMap, KurlError> {
        let mut map = VarMap::new();
        for path in &self.env_files {
            map.load_env_file(path)?;
        }
        map.extend_pairs(&self.vars)?;
        Ok(map.with_fallback(ProcessEnv))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "warn,kurl=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env("KURL_LOG").unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => return report(&e, true),
    };
    let parser = CommandParser::with_limits(settings.limits());

    let parsed = match &cli.command {
        Commands::Run { command, vars } | Commands::Check { command, vars } => vars
            .lookup()
            .and_then(|env| parser.parse_command(command, &env)),
        Commands::Exec { args } => parser.parse_args(args),
    };
    let config = match parsed {
        Ok(config) => settings.apply(&config),
        Err(e) => return report(&e, true),
    };

    if let Commands::Check { .. } = cli.command {
        println!("{}", config.to_redacted_command());
        return ExitCode::SUCCESS;
    }

    let show_errors = !config.output().silent || config.output().show_error;
    let executor = settings.executor().build();
    match run(&executor, &config).await {
        Ok(code) => code,
        Err(e) => report(&e, show_errors),
    }
}

async fn run(executor: &Executor, config: &RequestConfig) -> Result<ExitCode, KurlError> {
    let cancel = Cancellation::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = executor.execute(config, &cancel).await;
    interrupt.abort();
    let response = result?;

    let output = config.output();
    if output.verbose {
        eprint!("{}", response.header_block());
    }

    if let Some(jar) = &config.cookies().jar {
        write_cookie_jar(jar, config, &response).await?;
    }

    if output.fail_on_error && response.status.as_u16() >= 400 {
        if !output.silent || output.show_error {
            eprintln!(
                "{} The requested URL returned error: {}",
                "Error:".red().bold(),
                response.status.as_u16()
            );
        }
        return Ok(ExitCode::from(EXIT_HTTP_ERROR));
    }

    let mut rendered = Vec::with_capacity(response.body.len() + 256);
    if output.include_headers || config.is_head() {
        rendered.extend_from_slice(response.header_block().as_bytes());
    }
    rendered.extend_from_slice(&response.body);

    match &output.path {
        Some(path) => tokio::fs::write(path, &rendered).await?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&rendered)?;
            stdout.flush()?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Cookies read from `-b` files followed by those the server set.
async fn write_cookie_jar(
    path: &Path,
    config: &RequestConfig,
    response: &Response,
) -> Result<(), KurlError> {
    let mut records = Vec::new();
    for file in &config.cookies().files {
        if let Ok(text) = tokio::fs::read_to_string(file).await {
            records.extend(parse_netscape(&text));
        }
    }
    records.extend(response.cookies.iter().cloned());
    tokio::fs::write(path, render_netscape(&records)).await?;
    Ok(())
}

fn report(e: &KurlError, show: bool) -> ExitCode {
    if show {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
    }
    ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
}
