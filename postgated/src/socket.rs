use std::{
	fs::{self, Permissions},
	io,
	os::unix::fs::{chown, FileTypeExt, PermissionsExt},
	path::Path,
};

use tokio::net::UnixListener;
use tracing::{debug, info};

use crate::StartupError;

/// Who should own a freshly bound socket, and with which mode.
#[derive(Clone, Copy, Debug, Default)]
pub struct Access<'a> {
	pub owner: Option<&'a str>,
	pub group: Option<&'a str>,
	pub mode: Option<u32>,
}

/// Binds a unix listener at `path`, replacing a socket left over from an
/// earlier run. Ownership is only changed when both owner and group are
/// given.
pub fn bind(path: &Path, access: Access) -> Result<UnixListener, StartupError> {
	let bind_err = |source: io::Error| StartupError::Bind {
		path: path.to_owned(),
		source,
	};

	match fs::symlink_metadata(path) {
		Ok(meta) if meta.file_type().is_socket() => {
			debug!(path = %path.display(), "removing stale socket");
			fs::remove_file(path).map_err(bind_err)?;
		}
		Ok(_) => {
			return Err(bind_err(io::Error::new(
				io::ErrorKind::AlreadyExists,
				"path exists and is not a socket",
			)))
		}
		Err(err) if err.kind() == io::ErrorKind::NotFound => (),
		Err(err) => return Err(bind_err(err)),
	}

	let listener = UnixListener::bind(path).map_err(bind_err)?;

	if let (Some(owner), Some(group)) = (access.owner, access.group) {
		let user = users::get_user_by_name(owner)
			.ok_or_else(|| StartupError::UnknownUser(owner.into()))?;
		let group = users::get_group_by_name(group)
			.ok_or_else(|| StartupError::UnknownGroup(group.into()))?;

		chown(path, Some(user.uid()), Some(group.gid())).map_err(bind_err)?;
	}

	if let Some(mode) = access.mode {
		fs::set_permissions(path, Permissions::from_mode(mode)).map_err(bind_err)?;
	}

	info!(path = %path.display(), "listening");
	Ok(listener)
}
