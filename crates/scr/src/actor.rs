use keel_worker::{Strand, StrandError, StrandRecord, StrandRegistry, TaskClass};

/// What a queued actor task does. Used to purge pending work selectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
	/// Enable, disable, dispose.
	Lifecycle,
	/// Candidate change from a reference tracker.
	Rebind,
	Configure,
	/// Delayed activation or release on behalf of a service consumer.
	Service,
	/// Read-only access to the live instance.
	Inspect,
}

/// Serial task queue of one component configuration.
///
/// Strand names follow `<component>#<id>` so diagnostics can be matched to DTOs.
#[derive(Debug, Clone)]
pub(crate) struct ComponentActor {
	strand: Strand<TaskKind>,
}

impl ComponentActor {
	pub(crate) fn new(component: &str, id: u64, registry: &StrandRegistry) -> Self {
		Self {
			strand: Strand::with_registry(format!("{component}#{id}"), TaskClass::Actor, registry),
		}
	}

	pub(crate) fn submit(&self, kind: TaskKind, job: impl FnOnce() + Send + 'static) -> Result<(), StrandError> {
		let result = self.strand.submit(kind, job);
		if result.is_err() {
			tracing::trace!(actor = self.strand.name(), ?kind, "scr.actor.closed");
		}
		result
	}

	/// Drops queued rebind and configure tasks. A running task completes.
	pub(crate) fn cancel_pending(&self) -> usize {
		let purged = self.strand.purge(|kind| matches!(kind, TaskKind::Rebind | TaskKind::Configure));
		if purged > 0 {
			tracing::debug!(actor = self.strand.name(), purged, "scr.actor.purge");
		}
		purged
	}

	pub(crate) fn close(&self) {
		self.strand.close();
	}

	pub(crate) fn is_current(&self) -> bool {
		self.strand.is_current()
	}

	pub(crate) fn flush_blocking(&self) -> bool {
		self.strand.flush_blocking()
	}

	pub(crate) async fn flush(&self) {
		self.strand.flush().await;
	}

	pub(crate) fn record(&self) -> StrandRecord {
		self.strand.record()
	}
}
