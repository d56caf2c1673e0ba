//! ccache-keeper.

use std::process::ExitCode;

use ccache_keeper::cli::{self, Cli};
use ccache_keeper::config;
use ccache_keeper::manager::Locations;
use ccache_keeper::AuthService;
use clap::Parser;
use tracing::{error, info};

fn main() -> ExitCode {
    let args = Cli::parse();
    cli::logger(args.log_json);

    info!("ccache-keeper v{}", env!("CARGO_PKG_VERSION"));

    if let Err(err) = config::load(&args.config) {
        error!("{}", err);
        return ExitCode::FAILURE;
    }

    if !install(args.locations()) {
        return ExitCode::FAILURE;
    }

    let service = AuthService::instance();
    let result = cli::run(&args.command, service);
    service.shutdown();

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(all(unix, feature = "krb5"))]
fn install(locations: Locations) -> bool {
    AuthService::install_with(ccache_keeper::authority::SystemKrb5::new(), locations)
}

#[cfg(not(all(unix, feature = "krb5")))]
fn install(_locations: Locations) -> bool {
    error!("kerberos support not compiled in, rebuild with --features krb5");
    false
}
