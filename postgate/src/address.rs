/// Returns the lowercased domain of an address, or None when there's no
/// `@`, or when it sits at either end of the string.
pub fn domain_of(address: &str) -> Option<String> {
	let at = address.rfind('@')?;

	if at == 0 || at == address.len() - 1 {
		return None;
	}

	Some(address[at + 1..].to_lowercase())
}
