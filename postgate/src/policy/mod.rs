//! The access-policy delegation protocol and the decision engine behind it.

mod engine;
mod request;

use std::{fmt::Display, str::FromStr};

use thiserror::Error;

pub use engine::Engine;
pub use request::PolicyRequest;

/// What the mail server should do with the transaction being checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
	/// No opinion, let the mail server continue with its own checks.
	Dunno,
	NoSuchUser,
	RecipientNotLocal,
	LocalSenderNeedsAuth,
	SenderNotOwned,
	UnsupportedAuthMethod,
	LookupFailure,
	InternalError,
}

impl Action {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Dunno => "DUNNO",
			Self::NoSuchUser => "550 5.1.1 No such user",
			Self::RecipientNotLocal => "550 5.7.1 Recipient domain not local",
			Self::LocalSenderNeedsAuth => {
				"553 5.7.1 Sending from local domains requires authentication"
			}
			Self::SenderNotOwned => "553 5.7.1 Sender not owned by authenticated user",
			Self::UnsupportedAuthMethod => "553 5.7.1 Unsupported authentication method",
			Self::LookupFailure => "451 4.3.0 Temporary authentication/lookup failure",
			Self::InternalError => "451 4.3.0 Temporary internal error",
		}
	}

	/// The full response block written back to the mail server.
	pub fn as_response(&self) -> String {
		format!("action={}\n\n", self.as_str())
	}
}

impl Display for Action {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// How identity provider failures degrade. Directory failures are always
/// temporary errors regardless of this setting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailureMode {
	#[default]
	TempFail,
	Dunno,
}

impl FailureMode {
	pub(crate) fn action(&self) -> Action {
		match self {
			Self::TempFail => Action::LookupFailure,
			Self::Dunno => Action::Dunno,
		}
	}
}

impl FromStr for FailureMode {
	type Err = ParseFailureModeError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_lowercase().as_str() {
			"tempfail" => Ok(Self::TempFail),
			"dunno" => Ok(Self::Dunno),
			_ => Err(ParseFailureModeError(s.into())),
		}
	}
}

#[derive(Debug, Error)]
#[error("'{0}' is not a failure mode, expected 'tempfail' or 'dunno'")]
pub struct ParseFailureModeError(String);
