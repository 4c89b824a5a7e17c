use std::collections::HashMap;

/// The attributes of one policy delegation request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PolicyRequest {
	attributes: HashMap<String, String>,
}

impl PolicyRequest {
	/// Adds one `name=value` line. Lines without an `=`, or with an empty
	/// name, are ignored. Later duplicates win.
	pub fn push_line(&mut self, line: &str) {
		let line = line.trim_end_matches(['\r', '\n']);

		if let Some((name, value)) = line.split_once('=') {
			if !name.is_empty() {
				self.attributes.insert(name.into(), value.into());
			}
		}
	}

	pub fn get(&self, name: &str) -> &str {
		self.attributes.get(name).map_or("", String::as_str)
	}

	pub fn protocol_state(&self) -> &str {
		self.get("protocol_state")
	}

	pub fn sasl_method(&self) -> String {
		self.get("sasl_method").to_lowercase()
	}

	pub fn sasl_username(&self) -> &str {
		self.get("sasl_username")
	}

	pub fn sender(&self) -> String {
		self.get("sender").to_lowercase()
	}

	pub fn recipient(&self) -> String {
		self.get("recipient").to_lowercase()
	}
}

impl<'a> FromIterator<&'a str> for PolicyRequest {
	fn from_iter<T: IntoIterator<Item = &'a str>>(lines: T) -> Self {
		let mut request = Self::default();
		for line in lines {
			request.push_line(line);
		}
		request
	}
}
