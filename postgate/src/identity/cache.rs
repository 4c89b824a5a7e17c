use std::{
	collections::HashMap,
	time::{Duration, Instant},
};

use parking_lot::Mutex;

/// A source of the current time, so expiry can be tested without sleeping.
pub trait Clock: Send + Sync {
	fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> Instant {
		Instant::now()
	}
}

/// A remembered answer. `found` is false for a cached negative result, in
/// which case `value` is empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cached {
	pub value: String,
	pub found: bool,
}

struct Entry {
	cached: Cached,
	expires: Instant,
}

/// An expiring string memo, safe to share between connection tasks.
///
/// Entries are never swept; a stale entry is dropped when it is next read
/// or replaced when it is next written.
pub struct TtlCache<C = SystemClock> {
	ttl: Duration,
	clock: C,
	entries: Mutex<HashMap<String, Entry>>,
}

impl TtlCache<SystemClock> {
	pub fn new(ttl: Duration) -> Self {
		Self::with_clock(ttl, SystemClock)
	}
}

impl<C: Clock> TtlCache<C> {
	pub fn with_clock(ttl: Duration, clock: C) -> Self {
		Self {
			ttl,
			clock,
			entries: Mutex::new(HashMap::new()),
		}
	}

	pub fn get(&self, key: &str) -> Option<Cached> {
		let now = self.clock.now();
		let mut entries = self.entries.lock();

		match entries.get(key) {
			Some(entry) if now > entry.expires => {
				entries.remove(key);
				None
			}
			Some(entry) => Some(entry.cached.clone()),
			None => None,
		}
	}

	pub fn put<K, V>(&self, key: K, value: V, found: bool)
	where
		K: Into<String>,
		V: Into<String>,
	{
		let entry = Entry {
			cached: Cached {
				value: value.into(),
				found,
			},
			expires: self.clock.now() + self.ttl,
		};

		self.entries.lock().insert(key.into(), entry);
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
