use std::future::Future;
use std::io::{stderr, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::{pin, runtime::Builder, select, time::sleep};
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};
use crate::manager::Locations;
use crate::service::AuthService;
use crate::shutdown::Shutdown;
use crate::util::human_duration;

/// Keeps a Kerberos credential cache filled with a valid ticket from a keytab.
#[derive(Parser, Debug)]
#[command(name = "ccache-keeper", version)]
pub struct Cli {
    /// Path to the configuration file. Default: "keeper.toml"
    #[arg(short, long, default_value = "keeper.toml")]
    pub config: PathBuf,
    /// Keytab to use instead of the one picked by the run mode.
    #[arg(short, long)]
    pub keytab: Option<String>,
    /// Credential cache to use instead of the one picked by the run mode.
    #[arg(long)]
    pub ccache: Option<String>,
    /// Log in JSON.
    #[arg(long)]
    pub log_json: bool,
    /// Subcommand.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Put a new ticket from the keytab into the cache.
    Create,

    /// Renew or replace the cached ticket if it expired.
    Update,

    /// Show the cached ticket.
    Status,

    /// Keep updating the cache until Ctrl-C or SIGTERM.
    Watch {
        /// Seconds between checks.
        #[arg(short, long, default_value_t = 300)]
        interval: u64,
    },
}

impl Cli {
    pub fn locations(&self) -> Locations {
        Locations {
            keytab: self.keytab.clone(),
            ccache: self.ccache.clone(),
        }
    }
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the `info` default.
pub fn logger(json: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let text = (!json).then(|| {
        fmt::layer()
            .with_ansi(stderr().is_terminal())
            .with_writer(stderr)
    });
    let json = json.then(|| fmt::layer().json().with_writer(stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .init();
}

/// Run a subcommand against the installed service. Returns whether it succeeded.
pub fn run(command: &Commands, service: &AuthService) -> Result<bool> {
    match command {
        Commands::Create => Ok(service.create_ccache()),

        Commands::Update => {
            let outcome = service.refresh()?;
            info!("credential cache {}", outcome);
            Ok(true)
        }

        Commands::Status => {
            let status = service.status()?;
            println!("principal: {}", status.principal);
            println!("state: {}", status.state);
            println!(
                "expires in: {}",
                human_duration(Duration::from_secs(status.remaining))
            );
            println!("{}", status.creds.times_info());
            Ok(true)
        }

        Commands::Watch { interval } => {
            let interval = Duration::from_secs((*interval).max(1));
            let runtime = Builder::new_current_thread().enable_all().build()?;

            runtime.block_on(async {
                let mut shutdown = Shutdown::new()?;
                watch(service, interval, shutdown.listen()).await;
                Ok::<_, Error>(true)
            })
        }
    }
}

/// Refresh the cache every `interval` until `stop` completes.
pub async fn watch(
    service: &AuthService,
    interval: Duration,
    stop: impl Future<Output = ()>,
) {
    info!("checking credential cache every {}", human_duration(interval));
    pin!(stop);

    loop {
        match service.refresh() {
            Ok(outcome) => info!("credential cache {}", outcome),
            Err(err) => error!("credential cache update failed: {}", err),
        }

        select! {
            _ = sleep(interval) => (),
            _ = &mut stop => {
                info!("stopping credential cache updates");
                break;
            }
        }
    }
}
