mod cli;
mod error;
mod monitor;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use qserver_api::{PlansAllowedResponse, RunEngineService};
use qserver_config::{Config, Settings};

use crate::cli::{Cli, Command, ConfigCommand, GlobalOpts, PlansArgs};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "qserver-monitor", &mut std::io::stdout());
            Ok(())
        }

        Command::Config(ConfigCommand::Path) => {
            println!("{}", config_file(&cli.global).display());
            Ok(())
        }

        Command::Config(ConfigCommand::Show) => {
            let cfg = load_config(&cli.global)?;
            print!("{}", qserver_config::render_config(&cfg)?);
            Ok(())
        }

        Command::Status => {
            let settings = load_config(&cli.global)?.to_settings()?;
            let service = monitor::build_service(&settings)?;
            let status = service
                .status()
                .await
                .map_err(|e| CliError::from_core(e.into(), &settings.url))?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }

        Command::Plans(ref args) => {
            let settings = load_config(&cli.global)?.to_settings()?;
            list_plans(&settings, args).await
        }

        Command::Watch(ref args) => {
            let mut cfg = load_config(&cli.global)?;
            if args.poll {
                cfg.use_websockets = false;
            }
            if let Some(ms) = args.interval_ms {
                cfg.update_interval_ms = ms;
            }
            let settings = cfg.to_settings()?;
            monitor::watch(&settings, args).await
        }
    }
}

async fn list_plans(settings: &Settings, args: &PlansArgs) -> Result<(), CliError> {
    let service = monitor::build_service(settings)?;
    let raw = service
        .plans_allowed_raw()
        .await
        .map_err(|e| CliError::from_core(e.into(), &settings.url))?;
    let plans = PlansAllowedResponse::from_raw(raw)?.into_plans()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
        return Ok(());
    }

    for (name, meta) in &plans {
        match meta.get("description").and_then(serde_json::Value::as_str) {
            Some(description) => println!("{name}\t{}", first_line(description)),
            None => println!("{name}"),
        }
    }
    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}

fn config_file(global: &GlobalOpts) -> std::path::PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(qserver_config::config_path)
}

/// Load the config file and environment, then apply command-line overrides.
fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    let mut cfg = qserver_config::load_config_from(&config_file(global))?;

    if let Some(ref url) = global.url {
        cfg.url.clone_from(url);
    }
    if let Some(ref key) = global.api_key {
        cfg.api_key = Some(key.clone());
        cfg.api_key_env = None;
    }
    if let Some(secs) = global.timeout {
        cfg.timeout_secs = secs;
    }
    if global.insecure {
        cfg.insecure = true;
    }
    Ok(cfg)
}
