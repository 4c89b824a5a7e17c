use std::ffi::CString;

use nix::unistd::{initgroups, Gid};
use tracing::info;
use users::switch::{set_current_gid, set_current_uid};

use crate::StartupError;

/// Switches the process to `name`'s uid, primary gid and supplementary
/// groups. Nothing happens if we already run as that user; otherwise we have
/// to be root.
pub fn drop_to(name: &str) -> Result<(), StartupError> {
	let user = users::get_user_by_name(name).ok_or_else(|| StartupError::UnknownUser(name.into()))?;

	let euid = users::get_effective_uid();
	if euid == user.uid() {
		return Ok(());
	}

	if euid != 0 {
		return Err(StartupError::NotRoot(name.into()));
	}

	// Groups first, none of them can change after giving up root
	reset_groups(name, user.primary_group_id())?;
	set_current_gid(user.primary_group_id()).map_err(StartupError::Privileges)?;
	set_current_uid(user.uid()).map_err(StartupError::Privileges)?;

	info!(user = name, uid = user.uid(), gid = user.primary_group_id(), "dropped privileges");
	Ok(())
}

// Replaces root's supplementary groups with the ones listed for `name`
fn reset_groups(name: &str, gid: u32) -> Result<(), StartupError> {
	let cname = CString::new(name).map_err(|_| StartupError::UnknownUser(name.into()))?;

	initgroups(&cname, Gid::from_raw(gid)).map_err(|errno| StartupError::Privileges(errno.into()))
}
