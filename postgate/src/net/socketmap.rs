use std::{io::ErrorKind, sync::Arc};

use tokio::{
	io::{self, BufReader},
	net::{UnixListener, UnixStream},
	sync::watch,
};
use tracing::{debug, info, warn};

use crate::{
	directory::Directory,
	socketmap::{lookup, read_frame, write_frame, FramingError},
};

/// Serves socketmap lookups until `shutdown` fires.
pub async fn listen_socketmap(
	listener: UnixListener,
	directory: Arc<dyn Directory>,
	shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
	info!("socketmap server accepting connections");

	super::accept_loop("socketmap", listener, shutdown, move |stream, shutdown| {
		serve(stream, directory.clone(), shutdown)
	})
	.await
}

// The mail server keeps these connections open and sends request after
// request. Shutdown is only honoured between frames.
async fn serve(
	mut stream: UnixStream,
	directory: Arc<dyn Directory>,
	mut shutdown: watch::Receiver<bool>,
) {
	let (read, mut write) = stream.split();
	let mut reader = BufReader::new(read);

	while super::client_ready(&mut reader, &mut shutdown).await {
		let payload = match read_frame(&mut reader).await {
			Ok(payload) => payload,
			Err(FramingError::Closed) => return,
			Err(FramingError::Io(err)) if err.kind() == ErrorKind::UnexpectedEof => {
				debug!("socketmap client hung up mid-frame");
				return;
			}
			Err(err) => {
				warn!(%err, "dropping socketmap connection");
				return;
			}
		};

		let reply = lookup(directory.as_ref(), &String::from_utf8_lossy(&payload)).await;

		if let Err(err) = write_frame(&mut write, reply.to_string()).await {
			debug!(%err, "socketmap client went away before the reply");
			return;
		}
	}
}
