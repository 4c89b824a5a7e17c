use std::fmt::Display;

use tracing::{error, info, warn};

use crate::{address::domain_of, directory::Directory};

/// The only table answered; every other table name is NOTFOUND.
pub const ALIAS_TABLE: &str = "alias";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
	Ok(String),
	NotFound,
	Temp,
}

impl Display for Reply {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Ok(value) => write!(f, "OK {}", value),
			Self::NotFound => f.write_str("NOTFOUND"),
			Self::Temp => f.write_str("TEMP"),
		}
	}
}

/// Answers one `<table> <key>` request payload.
pub async fn lookup(directory: &dyn Directory, payload: &str) -> Reply {
	let payload = payload.trim().to_lowercase();
	if payload.is_empty() {
		info!("socketmap request: empty payload");
		return Reply::NotFound;
	}

	let Some((table, key)) = payload.split_once(' ') else {
		warn!(%payload, "socketmap request: malformed payload");
		return Reply::Temp;
	};
	let key = key.trim();

	info!(table, key, "socketmap request");

	let reply = if table == ALIAS_TABLE {
		resolve_alias(directory, key).await
	} else {
		Reply::NotFound
	};

	info!(table, key, %reply, "socketmap decision");
	reply
}

// alias -> <target user>@<alias domain>
async fn resolve_alias(directory: &dyn Directory, alias: &str) -> Reply {
	let Some(domain) = domain_of(alias) else {
		return Reply::NotFound;
	};

	match directory.domain_enabled(&domain).await {
		Ok(true) => (),
		Ok(false) => return Reply::NotFound,
		Err(err) => {
			error!(alias, %err, "socketmap domain lookup failed");
			return Reply::Temp;
		}
	}

	match directory.alias_owner(alias).await {
		Ok(Some(user)) => Reply::Ok(format!("{}@{}", user, domain)),
		Ok(None) => Reply::NotFound,
		Err(err) => {
			error!(alias, %err, "socketmap alias lookup failed");
			Reply::Temp
		}
	}
}
