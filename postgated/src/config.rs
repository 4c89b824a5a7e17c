use std::{num::ParseIntError, path::PathBuf, time::Duration};

use confindent::{Confindent, Value};
use getopts::Options;
use postgate::{
	identity::{AuthentikConfig, KeycloakConfig, ProviderConfig},
	policy::ParseFailureModeError,
	FailureMode,
};
use thiserror::Error;

const DEFAULT_CONFIG: &str = "/etc/postgate/postgate.conf";
const FALLBACK_CONFIG: &str = "postgate.conf";

pub struct Config {
	pub policy_socket: PathBuf,
	pub socketmap_socket: PathBuf,
	pub socket_owner: Option<String>,
	pub socket_group: Option<String>,
	pub socket_mode: Option<u32>,
	pub user: Option<String>,
	pub database: PathBuf,
	pub failure_mode: FailureMode,
	pub keep_alive: bool,
	pub log_level: String,
	pub provider: ProviderConfig,
}

#[allow(clippy::or_fun_call)]
impl Config {
	fn print_usage<S: AsRef<str>>(prgm: S, opts: &Options) {
		let brief = format!("Usage: {} [options]", prgm.as_ref());
		println!("{}", opts.usage(&brief));
	}

	/// Reads the command line and the config file. `None` means the program
	/// was only asked for its help or version and should exit.
	pub fn get() -> Result<Option<Self>, ConfigError> {
		let args: Vec<String> = std::env::args().collect();

		let mut opts = Options::new();
		opts.optflag("h", "help", "Print this help message");
		opts.optflag("V", "version", "Print the version and exit");
		opts.optopt(
			"c",
			"config",
			"An alternate location to read the config from\nDefault: /etc/postgate/postgate.conf",
			"PATH",
		);
		opts.optopt(
			"p",
			"policy-socket",
			"Where to listen for policy delegation requests\nDefault: /run/postgate/policy.sock",
			"PATH",
		);
		opts.optopt(
			"s",
			"socketmap-socket",
			"Where to listen for socketmap lookups\nDefault: /run/postgate/socketmap.sock",
			"PATH",
		);

		let matches = opts.parse(&args[1..])?;

		if matches.opt_present("help") {
			Self::print_usage(&args[0], &opts);
			return Ok(None);
		}

		if matches.opt_present("version") {
			println!("postgated {}", env!("CARGO_PKG_VERSION"));
			return Ok(None);
		}

		let conf_path = matches
			.opt_str("config")
			.unwrap_or(DEFAULT_CONFIG.into());

		let config = match Confindent::from_file(&conf_path) {
			Ok(c) => c,
			Err(_) => Confindent::from_file(FALLBACK_CONFIG).map_err(|err| ConfigError::Read {
				path: conf_path,
				reason: err.to_string(),
			})?,
		};

		Self::from_confindent(&config, |cli_key| matches.opt_str(cli_key)).map(Some)
	}

	/// Builds the config from a parsed file. `cli` is asked first for the
	/// keys that can also be given on the command line.
	pub fn from_confindent<F>(config: &Confindent, cli: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		// Options specified on the command line take priority. Only the
		// cli_key is named, the config key is derived from it so the two
		// stay consistent.
		let find_value = |cli_key: &str| -> Option<String> {
			let conf_key: String = cli_key
				.split('-')
				.map(|word| {
					let mut c = word.chars();
					match c.next() {
						None => String::new(),
						Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
					}
				})
				.collect();

			cli(cli_key).or(config.child_value(conf_key).map(|s| s.into()))
		};

		let policy_socket = find_value("policy-socket")
			.unwrap_or("/run/postgate/policy.sock".into())
			.into();
		let socketmap_socket = find_value("socketmap-socket")
			.unwrap_or("/run/postgate/socketmap.sock".into())
			.into();

		let socket_mode = match find_value("socket-mode") {
			None => None,
			Some(mode) => Some(
				u32::from_str_radix(mode.trim(), 8)
					.map_err(|err| ConfigError::SocketMode(mode.clone(), err))?,
			),
		};

		let database = find_value("database").ok_or(ConfigError::Missing("Database"))?;

		let failure_mode = match find_value("failure-mode") {
			None => FailureMode::default(),
			Some(mode) => mode.parse()?,
		};

		let keep_alive = match find_value("policy-keep-alive") {
			None => false,
			Some(value) => parse_bool(&value).ok_or(ConfigError::Bool("PolicyKeepAlive", value))?,
		};

		let provider = find_value("provider").ok_or(ConfigError::Missing("Provider"))?;
		let provider = match provider.trim().to_lowercase().as_str() {
			"keycloak" => {
				let section = section(config, "Keycloak")?;
				ProviderConfig::Keycloak(KeycloakConfig {
					base_url: required(section, "Keycloak", "BaseUrl")?,
					realm: required(section, "Keycloak", "Realm")?,
					client_id: optional(section, "ClientId"),
					client_secret: optional(section, "ClientSecret"),
					cache_ttl: cache_ttl(section, "Keycloak")?,
				})
			}
			"authentik" => {
				let section = section(config, "Authentik")?;
				ProviderConfig::Authentik(AuthentikConfig {
					base_url: required(section, "Authentik", "BaseUrl")?,
					api_token: required(section, "Authentik", "ApiToken")?,
					cache_ttl: cache_ttl(section, "Authentik")?,
				})
			}
			_ => return Err(ConfigError::Provider(provider)),
		};

		Ok(Self {
			policy_socket,
			socketmap_socket,
			socket_owner: find_value("socket-owner"),
			socket_group: find_value("socket-group"),
			socket_mode,
			user: find_value("user"),
			database: database.into(),
			failure_mode,
			keep_alive,
			log_level: find_value("log-level").unwrap_or("info".into()),
			provider,
		})
	}
}

fn section<'a>(config: &'a Confindent, name: &'static str) -> Result<&'a Value, ConfigError> {
	config.child(name).ok_or(ConfigError::Missing(name))
}

fn optional(section: &Value, key: &str) -> String {
	section.child_value(key).unwrap_or_default().trim().into()
}

fn required(section: &Value, name: &'static str, key: &'static str) -> Result<String, ConfigError> {
	match optional(section, key) {
		value if value.is_empty() => Err(ConfigError::MissingIn(name, key)),
		value => Ok(value),
	}
}

// Zero means "use the default", the providers log that once logging is up
fn cache_ttl(section: &Value, name: &'static str) -> Result<Duration, ConfigError> {
	let Some(raw) = section.child_value("CacheTtl") else {
		return Ok(Duration::ZERO);
	};

	let seconds: i64 = raw
		.trim()
		.parse()
		.map_err(|err| ConfigError::CacheTtl(name, raw.into(), err))?;

	Ok(Duration::from_secs(seconds.max(0) as u64))
}

fn parse_bool(value: &str) -> Option<bool> {
	match value.trim().to_lowercase().as_str() {
		"yes" | "true" | "on" | "1" => Some(true),
		"no" | "false" | "off" | "0" => Some(false),
		_ => None,
	}
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("{0}")]
	Usage(#[from] getopts::Fail),
	#[error("failed to read config '{path}' (or ./postgate.conf): {reason}")]
	Read { path: String, reason: String },
	#[error("'{0}' not found in config")]
	Missing(&'static str),
	#[error("'{1}' not found in the {0} section")]
	MissingIn(&'static str, &'static str),
	#[error("unknown Provider '{0}', expected 'keycloak' or 'authentik'")]
	Provider(String),
	#[error("{0}")]
	FailureMode(#[from] ParseFailureModeError),
	#[error("SocketMode '{0}' is not an octal mode: {1}")]
	SocketMode(String, #[source] ParseIntError),
	#[error("{0} CacheTtl '{1}' is not a number of seconds: {2}")]
	CacheTtl(&'static str, String, #[source] ParseIntError),
	#[error("{0} should be 'yes' or 'no', not '{1}'")]
	Bool(&'static str, String),
}
