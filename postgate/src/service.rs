//! Runs both servers side by side and ties their lifetimes together.

use std::sync::{Arc, Once};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::{io, net::UnixListener, sync::watch, task::JoinSet};
use tracing::{error, info};

use crate::{
	directory::Directory,
	net::{listen_policy, listen_socketmap},
	policy::Engine,
};

/// The policy and socketmap servers running on their own tasks.
///
/// If either server fails the other is told to stop as well, and the first
/// failure is kept for [Service::take_error]. Dropping the service does not
/// stop it; call [Service::close].
pub struct Service {
	shutdown: Arc<watch::Sender<bool>>,
	closing: Once,
	error: Arc<Mutex<Option<ServiceError>>>,
	done: watch::Receiver<bool>,
}

#[derive(Debug, Error)]
pub enum ServiceError {
	#[error("policy server failed: {0}")]
	Policy(#[source] io::Error),
	#[error("socketmap server failed: {0}")]
	Socketmap(#[source] io::Error),
	#[error("server task died: {0}")]
	Task(#[from] tokio::task::JoinError),
}

impl Service {
	/// Starts serving on already bound listeners. Must be called from within
	/// a tokio runtime.
	pub fn start(
		policy: UnixListener,
		socketmap: UnixListener,
		directory: Arc<dyn Directory>,
		engine: Arc<Engine>,
		keep_alive: bool,
	) -> Self {
		let (shutdown, shutdown_rx) = watch::channel(false);
		let shutdown = Arc::new(shutdown);
		let (done_tx, done) = watch::channel(false);
		let error = Arc::new(Mutex::new(None));

		let mut servers = JoinSet::new();
		let rx = shutdown_rx.clone();
		servers.spawn(async move {
			listen_policy(policy, engine, keep_alive, rx)
				.await
				.map_err(ServiceError::Policy)
		});
		servers.spawn(async move {
			listen_socketmap(socketmap, directory, shutdown_rx)
				.await
				.map_err(ServiceError::Socketmap)
		});

		let supervisor_shutdown = shutdown.clone();
		let supervisor_error = error.clone();
		tokio::spawn(async move {
			while let Some(joined) = servers.join_next().await {
				let err = match joined {
					Ok(Ok(())) => continue,
					Ok(Err(err)) => err,
					Err(err) => err.into(),
				};

				error!(%err, "server stopped, shutting the other down");
				let mut slot = supervisor_error.lock();
				if slot.is_none() {
					*slot = Some(err);
				}
				drop(slot);

				supervisor_shutdown.send_replace(true);
			}

			info!("service stopped");
			done_tx.send_replace(true);
		});

		Self {
			shutdown,
			closing: Once::new(),
			error,
			done,
		}
	}

	/// Stops accepting connections. Connections already accepted finish
	/// their current request. Calling this more than once does nothing.
	pub fn close(&self) {
		self.closing.call_once(|| {
			info!("closing service");
			self.shutdown.send_replace(true);
		});
	}

	/// Resolves once both servers and all their connections have finished.
	pub async fn wait(&self) {
		let mut done = self.done.clone();
		// The supervisor only drops its sender after marking itself done
		let _ = done.wait_for(|done| *done).await;
	}

	pub fn is_done(&self) -> bool {
		*self.done.borrow()
	}

	/// The first server failure, if any. Later calls return `None`.
	pub fn take_error(&self) -> Option<ServiceError> {
		self.error.lock().take()
	}
}
