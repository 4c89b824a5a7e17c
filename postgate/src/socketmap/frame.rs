use std::io::ErrorKind;

use thiserror::Error;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload a peer may announce.
pub const MAX_PAYLOAD: u64 = 1024 * 1024;

const MAX_DIGITS: usize = 10;

/// Reads one `<len>:<payload>,` frame and returns the payload bytes.
///
/// A clean end of stream before the first length digit is reported as
/// [FramingError::Closed] so callers can tell a hangup apart from garbage.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FramingError>
where
	R: AsyncRead + Unpin,
{
	let mut digits = String::with_capacity(MAX_DIGITS);

	loop {
		let byte = match reader.read_u8().await {
			Ok(byte) => byte,
			Err(err) if err.kind() == ErrorKind::UnexpectedEof && digits.is_empty() => {
				return Err(FramingError::Closed)
			}
			Err(err) => return Err(err.into()),
		};

		if byte == b':' {
			break;
		}

		if !byte.is_ascii_digit() {
			return Err(FramingError::BadLengthByte(byte));
		}

		digits.push(byte as char);
		if digits.len() > MAX_DIGITS {
			return Err(FramingError::LengthTooLong);
		}
	}

	if digits.is_empty() {
		return Err(FramingError::EmptyLength);
	}

	// Ten digits always fit in a u64
	let length: u64 = digits.parse().map_err(|_| FramingError::LengthTooLong)?;
	if length > MAX_PAYLOAD {
		return Err(FramingError::PayloadTooLarge(length));
	}

	let mut payload = vec![0; length as usize];
	reader.read_exact(&mut payload).await?;

	match reader.read_u8().await? {
		b',' => Ok(payload),
		other => Err(FramingError::MissingTerminator(other)),
	}
}

/// Frames a payload. The announced length counts bytes, not characters.
pub fn encode<P: AsRef<[u8]>>(payload: P) -> Vec<u8> {
	let payload = payload.as_ref();
	let header = format!("{}:", payload.len());

	let mut framed = Vec::with_capacity(header.len() + payload.len() + 1);
	framed.extend_from_slice(header.as_bytes());
	framed.extend_from_slice(payload);
	framed.push(b',');
	framed
}

pub async fn write_frame<W, P>(writer: &mut W, payload: P) -> io::Result<()>
where
	W: AsyncWrite + Unpin,
	P: AsRef<[u8]>,
{
	writer.write_all(&encode(payload)).await?;
	writer.flush().await
}

#[derive(Debug, Error)]
pub enum FramingError {
	#[error("peer closed the connection")]
	Closed,
	#[error("unexpected byte {0:#04x} in frame length")]
	BadLengthByte(u8),
	#[error("frame length has more than 10 digits")]
	LengthTooLong,
	#[error("frame length is empty")]
	EmptyLength,
	#[error("frame payload of {0} bytes exceeds the 1MiB limit")]
	PayloadTooLarge(u64),
	#[error("expected ',' after payload but got {0:#04x}")]
	MissingTerminator(u8),
	#[error("failed reading frame")]
	Io(#[from] io::Error),
}
