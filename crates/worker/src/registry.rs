use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::TaskClass;

/// Snapshot for one registered strand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrandRecord {
	pub name: String,
	pub class: TaskClass,
	pub pending: usize,
	pub executed: u64,
	pub panics: u64,
	pub last_panic: Option<String>,
	pub closed: bool,
}

/// Type-erased view of a strand, independent of its job tag type.
pub(crate) trait StrandProbe: Send + Sync {
	fn record(&self) -> StrandRecord;

	fn is_current(&self) -> bool;

	/// Waits until every job queued before the call has run. `false` on timeout.
	fn flush_until(self: Arc<Self>, deadline: Option<Instant>) -> bool;
}

#[derive(Default)]
struct RegistryInner {
	strands: RwLock<HashMap<u64, Weak<dyn StrandProbe>>>,
	submitted: AtomicU64,
}

/// Registry of live strands for status snapshots and whole-system quiescence.
#[derive(Default, Clone)]
pub struct StrandRegistry {
	inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for StrandRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StrandRegistry")
			.field("strands", &self.inner.strands.read().len())
			.field("submitted", &self.submitted())
			.finish()
	}
}

impl StrandRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	pub(crate) fn register(&self, id: u64, probe: Weak<dyn StrandProbe>) {
		self.inner.strands.write().insert(id, probe);
	}

	pub(crate) fn remove(&self, id: u64) {
		self.inner.strands.write().remove(&id);
	}

	pub(crate) fn note_submit(&self) {
		self.inner.submitted.fetch_add(1, Ordering::AcqRel);
	}

	/// Total jobs submitted to strands attached to this registry.
	pub fn submitted(&self) -> u64 {
		self.inner.submitted.load(Ordering::Acquire)
	}

	fn live(&self) -> Vec<Arc<dyn StrandProbe>> {
		let mut guard = self.inner.strands.write();
		guard.retain(|_, probe| probe.strong_count() > 0);
		guard.values().filter_map(Weak::upgrade).collect()
	}

	/// Returns snapshots sorted by name.
	pub fn snapshots(&self) -> Vec<StrandRecord> {
		let mut records: Vec<_> = self.live().iter().map(|probe| probe.record()).collect();
		records.sort_by(|a, b| a.name.cmp(&b.name));
		records
	}

	/// Flushes every strand until no new job was submitted during a full pass.
	///
	/// Jobs routinely enqueue work on other strands (a published service wakes its
	/// consumers), so a single pass is not enough. Returns `false` on timeout.
	pub fn quiesce(&self, timeout: Option<Duration>) -> bool {
		let deadline = timeout.map(|t| Instant::now() + t);
		loop {
			let before = self.submitted();
			for probe in self.live() {
				if probe.is_current() {
					continue;
				}
				if !probe.flush_until(deadline) {
					return false;
				}
			}
			if self.submitted() == before {
				return true;
			}
		}
	}
}
