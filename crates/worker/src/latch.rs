use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct LatchInner<T> {
	slot: Mutex<LatchSlot<T>>,
	released: Condvar,
}

enum LatchSlot<T> {
	Armed,
	Released(T),
	Taken,
}

/// One-shot blocking hand-off between a strand job and a waiting thread.
///
/// The first [`release`](Latch::release) wins; later calls are ignored. Waiting never
/// touches an async runtime, so it is safe from blocking pool threads.
pub struct Latch<T> {
	inner: Arc<LatchInner<T>>,
}

impl<T> Clone for Latch<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T> Default for Latch<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> Latch<T> {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(LatchInner {
				slot: Mutex::new(LatchSlot::Armed),
				released: Condvar::new(),
			}),
		}
	}

	/// Stores `value` and wakes every waiter. Returns `false` if already released.
	pub fn release(&self, value: T) -> bool {
		let mut slot = self.inner.slot.lock();
		if !matches!(*slot, LatchSlot::Armed) {
			return false;
		}
		*slot = LatchSlot::Released(value);
		self.inner.released.notify_all();
		true
	}

	/// Blocks until released and takes the value. A second taker gets `None`.
	pub fn wait(&self) -> Option<T> {
		let mut slot = self.inner.slot.lock();
		while matches!(*slot, LatchSlot::Armed) {
			self.inner.released.wait(&mut slot);
		}
		take(&mut slot)
	}

	/// Like [`wait`](Latch::wait) but gives up after `timeout`.
	pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
		let deadline = Instant::now() + timeout;
		let mut slot = self.inner.slot.lock();
		while matches!(*slot, LatchSlot::Armed) {
			if self.inner.released.wait_until(&mut slot, deadline).timed_out() {
				break;
			}
		}
		take(&mut slot)
	}

	pub fn is_released(&self) -> bool {
		!matches!(*self.inner.slot.lock(), LatchSlot::Armed)
	}
}

fn take<T>(slot: &mut LatchSlot<T>) -> Option<T> {
	match std::mem::replace(slot, LatchSlot::Taken) {
		LatchSlot::Released(value) => Some(value),
		LatchSlot::Armed => {
			*slot = LatchSlot::Armed;
			None
		}
		LatchSlot::Taken => None,
	}
}
