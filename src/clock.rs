//! Time sources consulted for token validity decisions.

// self
use crate::_prelude::*;

/// Represents a clock, which can tell the current UTC time.
pub trait Clock
where
	Self: Debug + Send + Sync,
{
	/// Gets the current time according to this clock.
	fn now(&self) -> OffsetDateTime;
}

/// The system clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}
}

/// A manually driven clock; clones share the same instant.
#[derive(Clone, Debug)]
pub struct ManualClock(Arc<Mutex<OffsetDateTime>>);
impl ManualClock {
	/// Creates a clock frozen at `instant`.
	pub fn new(instant: OffsetDateTime) -> Self {
		Self(Arc::new(Mutex::new(instant)))
	}

	/// Creates a clock frozen at the current system time.
	pub fn starting_now() -> Self {
		Self::new(OffsetDateTime::now_utc())
	}

	/// Moves the clock to `instant`.
	pub fn set(&self, instant: OffsetDateTime) {
		*self.0.lock() = instant;
	}

	/// Moves the clock forward by `delta`.
	pub fn advance(&self, delta: Duration) {
		let mut now = self.0.lock();

		*now += delta;
	}
}
impl Clock for ManualClock {
	fn now(&self) -> OffsetDateTime {
		*self.0.lock()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn manual_clock_clones_observe_advances() {
		let clock = ManualClock::new(macros::datetime!(2025-01-01 00:00 UTC));
		let observer = clock.clone();

		clock.advance(Duration::seconds(90));

		assert_eq!(observer.now(), macros::datetime!(2025-01-01 00:01:30 UTC));

		observer.set(macros::datetime!(2025-06-01 12:00 UTC));

		assert_eq!(clock.now(), macros::datetime!(2025-06-01 12:00 UTC));
	}
}
