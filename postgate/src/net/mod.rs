//! Accept loops for the two unix sockets. Every connection gets its own task;
//! there is no cap on how many run at once.

mod policy;
mod socketmap;

use std::future::Future;

use tokio::{
	io::{self, AsyncBufRead, AsyncBufReadExt},
	net::{UnixListener, UnixStream},
	sync::watch,
	task::JoinSet,
};
use tracing::{debug, error, info};

pub use policy::listen_policy;
pub use socketmap::listen_socketmap;

// Runs until shutdown (or the sender going away), then closes the listener
// and waits out the connections already accepted. Accept errors outside of
// shutdown end the loop.
async fn accept_loop<F, Fut>(
	name: &'static str,
	listener: UnixListener,
	mut shutdown: watch::Receiver<bool>,
	handle: F,
) -> io::Result<()>
where
	F: Fn(UnixStream, watch::Receiver<bool>) -> Fut,
	Fut: Future<Output = ()> + Send + 'static,
{
	let mut connections = JoinSet::new();

	let result = loop {
		if *shutdown.borrow() {
			break Ok(());
		}

		let accepted = tokio::select! {
			changed = shutdown.changed() => {
				if changed.is_err() {
					break Ok(());
				}
				continue;
			},
			// Reap finished connections so the set doesn't grow forever
			Some(_) = connections.join_next(), if !connections.is_empty() => continue,
			accepted = listener.accept() => accepted,
		};

		match accepted {
			Ok((stream, _)) => {
				debug!(server = name, "connection accepted");
				connections.spawn(handle(stream, shutdown.clone()));
			}
			Err(_) if *shutdown.borrow() => break Ok(()),
			Err(err) => {
				error!(server = name, %err, "accept failed");
				break Err(err);
			}
		}
	};

	drop(listener);
	info!(
		server = name,
		in_flight = connections.len(),
		"listener closed, draining connections"
	);

	while connections.join_next().await.is_some() {}

	info!(server = name, "stopped");
	result
}

// Shutdown may only interrupt an idle connection. Once the first byte of a
// request is buffered it gets read and answered in full. False means the
// client hung up or we are shutting down.
async fn client_ready<R>(reader: &mut R, shutdown: &mut watch::Receiver<bool>) -> bool
where
	R: AsyncBufRead + Unpin,
{
	if *shutdown.borrow() {
		return false;
	}

	tokio::select! {
		filled = reader.fill_buf() => matches!(filled, Ok(buf) if !buf.is_empty()),
		_ = shutdown.changed() => false,
	}
}
