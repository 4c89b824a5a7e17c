use std::{io::ErrorKind, sync::Arc};

use tokio::{
	io::{self, AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
	net::{UnixListener, UnixStream},
	sync::watch,
};
use tracing::{debug, info, warn};

use crate::policy::{Engine, PolicyRequest};

// All lines of one request together
const MAX_REQUEST: u64 = 1024 * 1024;

/// Serves policy delegation requests until `shutdown` fires.
///
/// With `keep_alive` off each connection carries exactly one request, which
/// is what the mail server's policy client expects by default. With it on,
/// requests are answered until the client hangs up.
pub async fn listen_policy(
	listener: UnixListener,
	engine: Arc<Engine>,
	keep_alive: bool,
	shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
	info!(keep_alive, "policy server accepting connections");

	super::accept_loop("policy", listener, shutdown, move |stream, shutdown| {
		serve(stream, engine.clone(), keep_alive, shutdown)
	})
	.await
}

async fn serve(
	mut stream: UnixStream,
	engine: Arc<Engine>,
	keep_alive: bool,
	mut shutdown: watch::Receiver<bool>,
) {
	let (read, mut write) = stream.split();
	let mut reader = BufReader::new(read);

	while super::client_ready(&mut reader, &mut shutdown).await {
		let request = match read_request(&mut reader).await {
			Ok(Some(request)) => request,
			Ok(None) => return,
			Err(err) if err.kind() == ErrorKind::InvalidData => {
				warn!(%err, "dropping policy connection");
				return;
			}
			Err(err) => {
				debug!(%err, "policy client read failed");
				return;
			}
		};

		let action = engine.evaluate(&request).await;
		info!(
			state = request.protocol_state(),
			sasl_username = request.sasl_username(),
			sender = request.get("sender"),
			recipient = request.get("recipient"),
			client_address = request.get("client_address"),
			helo_name = request.get("helo_name"),
			%action,
			"policy decision"
		);

		let written = async {
			write.write_all(action.as_response().as_bytes()).await?;
			write.flush().await
		};
		if let Err(err) = written.await {
			debug!(%err, "policy client went away before the reply");
			return;
		}

		if !keep_alive {
			return;
		}
	}
}

// Returns None when the client hangs up first; a partial request is never
// answered.
async fn read_request<R>(reader: &mut R) -> io::Result<Option<PolicyRequest>>
where
	R: AsyncBufRead + Unpin,
{
	let mut request = PolicyRequest::default();
	let mut line = Vec::new();
	let mut remaining = MAX_REQUEST;

	loop {
		line.clear();
		let read = (&mut *reader)
			.take(remaining)
			.read_until(b'\n', &mut line)
			.await?;
		remaining -= read as u64;

		if line.last() != Some(&b'\n') {
			if remaining == 0 {
				return Err(io::Error::new(
					ErrorKind::InvalidData,
					format!("policy request longer than {MAX_REQUEST} bytes"),
				));
			}

			// End of stream, possibly in the middle of a line
			return Ok(None);
		}

		let text = String::from_utf8_lossy(&line);
		let text = text.trim_end_matches(['\r', '\n']);
		if text.is_empty() {
			return Ok(Some(request));
		}

		request.push_line(text);
	}
}
