mod config;
mod privileges;
mod socket;

use std::{future::Future, io, path::PathBuf, process::ExitCode, sync::Arc};

use config::Config;
use postgate::{
	directory::{Directory, DirectoryError, SqliteDirectory},
	identity::{self, IdentityError},
	Engine, Service,
};
use socket::Access;
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum StartupError {
	#[error("could not set up logging: {0}")]
	Logging(String),
	#[error("could not bind {}: {source}", .path.display())]
	Bind {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("no user named '{0}'")]
	UnknownUser(String),
	#[error("no group named '{0}'")]
	UnknownGroup(String),
	#[error("must be root to switch to user '{0}'")]
	NotRoot(String),
	#[error("failed to drop privileges: {0}")]
	Privileges(#[source] io::Error),
	#[error("could not open directory store: {0}")]
	Directory(#[from] DirectoryError),
	#[error("could not set up identity provider: {0}")]
	Identity(#[from] IdentityError),
	#[error("could not listen for signals: {0}")]
	Signals(#[source] io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
	let config = match Config::get() {
		Ok(Some(config)) => config,
		Ok(None) => return ExitCode::SUCCESS,
		Err(err) => {
			eprintln!("{err}");
			return ExitCode::FAILURE;
		}
	};

	if let Err(err) = init_logging(&config.log_level) {
		eprintln!("{err}");
		return ExitCode::FAILURE;
	}

	let (service, signals) = match start(&config) {
		Ok(started) => started,
		Err(err) => {
			error!(%err, "startup failed");
			return ExitCode::FAILURE;
		}
	};

	tokio::select! {
		_ = signals => info!("received shutdown signal, beginning graceful shutdown"),
		_ = service.wait() => (),
	}

	service.close();
	service.wait().await;

	for path in [&config.policy_socket, &config.socketmap_socket] {
		// The sockets may belong to root if we dropped privileges
		let _ = std::fs::remove_file(path);
	}

	match service.take_error() {
		Some(err) => {
			error!(%err, "exiting after server failure");
			ExitCode::FAILURE
		}
		None => {
			info!("shutdown complete");
			ExitCode::SUCCESS
		}
	}
}

fn init_logging(level: &str) -> Result<(), StartupError> {
	let filter = EnvFilter::try_from_default_env()
		.or_else(|_| EnvFilter::try_new(level))
		.map_err(|e| StartupError::Logging(e.to_string()))?;

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.try_init()
		.map_err(|e| StartupError::Logging(e.to_string()))
}

fn start(config: &Config) -> Result<(Service, impl Future<Output = ()>), StartupError> {
	let access = Access {
		owner: config.socket_owner.as_deref(),
		group: config.socket_group.as_deref(),
		mode: config.socket_mode,
	};
	let policy = socket::bind(&config.policy_socket, access)?;
	let socketmap = socket::bind(&config.socketmap_socket, access)?;

	if let Some(user) = &config.user {
		privileges::drop_to(user)?;
	}

	let directory: Arc<dyn Directory> = Arc::new(SqliteDirectory::open(&config.database)?);
	let resolver = identity::build(&config.provider)?;
	let engine = Arc::new(Engine::new(
		directory.clone(),
		resolver,
		config.failure_mode,
	));

	let signals = shutdown_signal().map_err(StartupError::Signals)?;
	let service = Service::start(policy, socketmap, directory, engine, config.keep_alive);

	info!(
		policy = %config.policy_socket.display(),
		socketmap = %config.socketmap_socket.display(),
		failure_mode = ?config.failure_mode,
		"postgated started"
	);

	Ok((service, signals))
}

// Resolves on the first of SIGINT, SIGTERM, SIGHUP or SIGQUIT
fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
	let mut signals = (
		signal(SignalKind::interrupt())?,
		signal(SignalKind::terminate())?,
		signal(SignalKind::hangup())?,
		signal(SignalKind::quit())?,
	);

	Ok(async move {
		tokio::select! {
			_ = signals.0.recv() => (),
			_ = signals.1.recv() => (),
			_ = signals.2.recv() => (),
			_ = signals.3.recv() => (),
		};
	})
}
