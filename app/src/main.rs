use std::error::Error;
use std::fs::{self, OpenOptions};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use d1v_adapters::d1::DEFAULT_API_BASE;
use d1v_adapters::keyring_store::KeyringCredentialStore;
use d1v_core::fetch::DEFAULT_LOCAL_DELAY;
use d1v_core::pagination::PageLimit;
use d1v_core::storage::{default_config_dir, CredentialStore, FileCredentialStore, ModeStore};
use d1v_relay::{RelayConfig, DEFAULT_LISTEN, DEFAULT_PREFIX, DEFAULT_UPSTREAM};
use d1v_tui::ViewerConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "d1v.log";

#[derive(Debug, Parser)]
#[command(
    name = "d1v",
    version,
    about = "Browse Cloudflare D1 databases and local SQLite files",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    #[command(flatten)]
    view: ViewArgs,
}

impl Cli {
    fn into_command(self) -> Command {
        self.command.unwrap_or(Command::View(self.view))
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Open the terminal viewer (default).
    View(ViewArgs),
    /// Run the `/api` relay in front of the Cloudflare API.
    Relay(RelayArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    File,
    Keyring,
}

#[derive(Debug, Args)]
struct ViewArgs {
    /// Base URL of the Cloudflare API, or of a relay such as http://127.0.0.1:8788/api.
    #[arg(long, env = "D1V_API_BASE", default_value = DEFAULT_API_BASE)]
    api_base: String,
    #[arg(long, value_enum, env = "D1V_CREDENTIAL_STORE", default_value_t = StoreKind::File)]
    credential_store: StoreKind,
    /// Rows per page: 10, 25, 50, 100, 200 or 500.
    #[arg(long, default_value = "50", value_parser = parse_limit)]
    limit: PageLimit,
    /// Artificial delay before each local database query.
    #[arg(long, env = "D1V_LOCAL_DELAY_MS")]
    local_delay_ms: Option<u64>,
    #[arg(long, env = "D1V_LOG_LEVEL", default_value = "info")]
    log_level: String,
    /// Defaults to d1v.log in the config directory.
    #[arg(long, env = "D1V_LOG_FILE")]
    log_file: Option<PathBuf>,
    #[arg(long)]
    json_logs: bool,
    /// SQLite file to open in Local mode.
    file: Option<PathBuf>,
}

impl ViewArgs {
    fn viewer_config(&self) -> ViewerConfig {
        ViewerConfig {
            api_base: self.api_base.clone(),
            limit: self.limit,
            local_delay: self
                .local_delay_ms
                .map_or(DEFAULT_LOCAL_DELAY, Duration::from_millis),
            initial_file: self.file.clone(),
        }
    }
}

#[derive(Debug, Args)]
struct RelayArgs {
    #[arg(long, env = "D1V_RELAY_LISTEN", default_value = DEFAULT_LISTEN)]
    listen: SocketAddr,
    #[arg(long, env = "D1V_RELAY_UPSTREAM", default_value = DEFAULT_UPSTREAM)]
    upstream: String,
    #[arg(long, env = "D1V_RELAY_PREFIX", default_value = DEFAULT_PREFIX)]
    prefix: String,
    #[arg(long, env = "D1V_LOG_LEVEL", default_value = "info")]
    log_level: String,
    #[arg(long)]
    json_logs: bool,
}

fn parse_limit(raw: &str) -> Result<PageLimit, String> {
    let rows = raw
        .parse::<u32>()
        .map_err(|error| format!("invalid page size {raw:?}: {error}"))?;
    PageLimit::try_from(rows).map_err(|error| error.to_string())
}

fn init_tracing(level: &str, json: bool, log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let builder = builder.with_ansi(false).with_writer(Mutex::new(file));
            if json {
                builder.json().try_init().map_err(|e| e as Box<dyn Error>)?;
            } else {
                builder.try_init().map_err(|e| e as Box<dyn Error>)?;
            }
        }
        None if json => builder.json().try_init().map_err(|e| e as Box<dyn Error>)?,
        None => builder.try_init().map_err(|e| e as Box<dyn Error>)?,
    }
    Ok(())
}

fn run_viewer(args: ViewArgs) -> Result<(), Box<dyn Error>> {
    let log_file = match &args.log_file {
        Some(path) => path.clone(),
        None => default_config_dir()?.join(LOG_FILE_NAME),
    };
    init_tracing(&args.log_level, args.json_logs, Some(&log_file))?;

    let credentials: Box<dyn CredentialStore> = match args.credential_store {
        StoreKind::File => Box::new(FileCredentialStore::load_default()?),
        StoreKind::Keyring => Box::new(KeyringCredentialStore::default()),
    };
    let modes = ModeStore::load_default()
        .map_err(|error| warn!(error = %error, "viewer mode will not be remembered"))
        .ok();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    d1v_tui::run(args.viewer_config(), credentials, modes, runtime.handle())?;
    info!("viewer closed");
    Ok(())
}

fn run_relay(args: RelayArgs) -> Result<(), Box<dyn Error>> {
    init_tracing(&args.log_level, args.json_logs, None)?;
    let config = RelayConfig::new(args.listen, &args.upstream, &args.prefix)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(d1v_relay::serve(config))?;
    Ok(())
}

fn run_app(
    command: Command,
    run_view: impl FnOnce(ViewArgs) -> Result<(), Box<dyn Error>>,
    run_relay: impl FnOnce(RelayArgs) -> Result<(), Box<dyn Error>>,
) -> Result<(), Box<dyn Error>> {
    match command {
        Command::View(args) => run_view(args),
        Command::Relay(args) => run_relay(args),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    run_app(Cli::parse().into_command(), run_viewer, run_relay)
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::PathBuf;
    use std::time::Duration;

    use clap::{CommandFactory, Parser};
    use d1v_core::pagination::PageLimit;
    use d1v_relay::RelayError;

    use super::{run_app, Cli, Command, StoreKind};

    fn parse(args: &[&str]) -> Command {
        Cli::try_parse_from(args).expect("parse").into_command()
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn bare_invocation_opens_the_viewer() {
        let Command::View(args) = parse(&["d1v"]) else {
            panic!("expected view");
        };
        assert_eq!(args.credential_store, StoreKind::File);
        assert_eq!(args.limit, PageLimit::Fifty);
        assert!(args.file.is_none());
    }

    #[test]
    fn file_argument_starts_in_local_mode() {
        let Command::View(args) = parse(&["d1v", "--limit", "100", "data/app.sqlite"]) else {
            panic!("expected view");
        };
        let config = args.viewer_config();
        assert_eq!(config.initial_file, Some(PathBuf::from("data/app.sqlite")));
        assert_eq!(config.limit, PageLimit::Hundred);
    }

    #[test]
    fn view_subcommand_accepts_flags() {
        let Command::View(args) = parse(&[
            "d1v",
            "view",
            "--credential-store",
            "keyring",
            "--local-delay-ms",
            "0",
        ]) else {
            panic!("expected view");
        };
        assert_eq!(args.credential_store, StoreKind::Keyring);
        assert_eq!(args.viewer_config().local_delay, Duration::ZERO);
    }

    #[test]
    fn unsupported_limit_is_rejected() {
        assert!(Cli::try_parse_from(["d1v", "--limit", "7"]).is_err());
    }

    #[test]
    fn relay_subcommand_parses_listen_address() {
        let Command::Relay(args) = parse(&["d1v", "relay", "--listen", "0.0.0.0:9000"]) else {
            panic!("expected relay");
        };
        assert_eq!(args.listen.port(), 9000);
        assert_eq!(args.prefix, "/api");
    }

    #[test]
    fn run_app_dispatches_to_viewer() {
        let result = run_app(parse(&["d1v"]), |_| Ok(()), |_| panic!("relay not expected"));
        assert!(result.is_ok());
    }

    #[test]
    fn run_app_propagates_tui_errors() {
        let result = run_app(
            parse(&["d1v", "view"]),
            |_| Err(d1v_tui::TuiError::Io(io::Error::other("boom")).into()),
            |_| Ok(()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn run_app_propagates_relay_errors() {
        let result = run_app(
            parse(&["d1v", "relay"]),
            |_| Ok(()),
            |_| Err(RelayError::InvalidConfig("bad upstream".to_string()).into()),
        );
        assert!(result
            .expect_err("relay error")
            .to_string()
            .contains("bad upstream"));
    }
}
