//! Serial executor backing component actors.
//!
//! # Role
//!
//! A [`Strand`] runs submitted jobs one at a time, in submission order, on the shared
//! blocking pool. Producers are arbitrary threads (registry notifications, API
//! callers, other strands) and never block on submission.
//!
//! # Invariants
//!
//! - At most one drain loop is scheduled per strand; it exits only after observing an
//!   empty queue under the state lock.
//! - Jobs run in FIFO order. [`Strand::purge`] removes queued jobs only; a running job
//!   always completes.
//! - A panicking job is logged and counted. Later jobs still run.
//! - Flush markers are never purged, and run even after [`Strand::close`].
//!
//! # Concurrency
//!
//! | State | Guard | Touched by |
//! |---|---|---|
//! | queue, draining, closed | `parking_lot::Mutex` | producers, drain loop |
//! | counters | atomics | drain loop, snapshot readers |
//! | current strand | thread local | drain loop thread |

use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use crate::registry::{StrandProbe, StrandRecord};
use crate::{Latch, StrandRegistry, TaskClass, panic_message, spawn_detached_blocking};

/// Strand submission error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrandError {
	/// The strand was closed; the job was dropped.
	Closed,
}

impl std::fmt::Display for StrandError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Closed => f.write_str("strand is closed"),
		}
	}
}

impl std::error::Error for StrandError {}

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Entry<K> {
	Job { kind: K, job: Job },
	Marker(Job),
}

struct StrandState<K> {
	queue: VecDeque<Entry<K>>,
	draining: bool,
	closed: bool,
	last_panic: Option<String>,
}

struct StrandInner<K> {
	id: u64,
	name: Arc<str>,
	class: TaskClass,
	state: Mutex<StrandState<K>>,
	executed: AtomicU64,
	panics: AtomicU64,
	registry: Option<StrandRegistry>,
}

thread_local! {
	static CURRENT: Cell<u64> = const { Cell::new(0) };
}

struct CurrentGuard(u64);

impl CurrentGuard {
	fn enter(id: u64) -> Self {
		Self(CURRENT.with(|c| c.replace(id)))
	}
}

impl Drop for CurrentGuard {
	fn drop(&mut self) {
		CURRENT.with(|c| c.set(self.0));
	}
}

/// Strictly ordered single-consumer job queue.
///
/// `K` tags each job so pending work of one kind can be cancelled with
/// [`purge`](Strand::purge).
pub struct Strand<K> {
	inner: Arc<StrandInner<K>>,
}

impl<K> Clone for Strand<K> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<K> std::fmt::Debug for Strand<K> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Strand").field("id", &self.inner.id).field("name", &self.inner.name).finish()
	}
}

impl<K: Copy + Send + 'static> Strand<K> {
	/// Creates a detached strand.
	pub fn new(name: impl Into<Arc<str>>, class: TaskClass) -> Self {
		Self::build(name.into(), class, None)
	}

	/// Creates a strand visible to `registry` snapshots and quiescence.
	pub fn with_registry(name: impl Into<Arc<str>>, class: TaskClass, registry: &StrandRegistry) -> Self {
		Self::build(name.into(), class, Some(registry.clone()))
	}

	fn build(name: Arc<str>, class: TaskClass, registry: Option<StrandRegistry>) -> Self {
		static NEXT_ID: AtomicU64 = AtomicU64::new(1);
		let inner = Arc::new(StrandInner {
			id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
			name,
			class,
			state: Mutex::new(StrandState {
				queue: VecDeque::new(),
				draining: false,
				closed: false,
				last_panic: None,
			}),
			executed: AtomicU64::new(0),
			panics: AtomicU64::new(0),
			registry,
		});
		if let Some(registry) = &inner.registry {
			let probe: Weak<dyn StrandProbe> = Arc::<StrandInner<K>>::downgrade(&inner);
			registry.register(inner.id, probe);
		}
		tracing::trace!(strand = %inner.name, id = inner.id, "worker.strand.create");
		Self { inner }
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}

	/// Queues `job` behind everything already submitted.
	pub fn submit(&self, kind: K, job: impl FnOnce() + Send + 'static) -> Result<(), StrandError> {
		if let Some(registry) = &self.inner.registry {
			registry.note_submit();
		}
		self.inner.push(Entry::Job { kind, job: Box::new(job) }, false)
	}

	/// Drops queued jobs whose tag matches `pred`. Returns how many were dropped.
	pub fn purge(&self, mut pred: impl FnMut(&K) -> bool) -> usize {
		let mut state = self.inner.state.lock();
		let before = state.queue.len();
		state.queue.retain(|entry| match entry {
			Entry::Job { kind, .. } => !pred(kind),
			Entry::Marker(_) => true,
		});
		let purged = before - state.queue.len();
		if purged > 0 {
			tracing::debug!(strand = %self.inner.name, purged, "worker.strand.purge");
		}
		purged
	}

	/// Rejects further submissions and detaches from the registry. Queued jobs still run.
	pub fn close(&self) {
		self.inner.state.lock().closed = true;
		if let Some(registry) = &self.inner.registry {
			registry.remove(self.inner.id);
		}
		tracing::trace!(strand = %self.inner.name, "worker.strand.close");
	}

	pub fn is_closed(&self) -> bool {
		self.inner.state.lock().closed
	}

	/// True when the calling thread is currently running one of this strand's jobs.
	pub fn is_current(&self) -> bool {
		self.inner.is_current()
	}

	pub fn pending(&self) -> usize {
		self.inner.state.lock().queue.len()
	}

	/// Blocks until every job submitted before this call has run.
	///
	/// Returns `false` without waiting when called from one of the strand's own jobs,
	/// since the queue cannot advance while the caller holds it.
	pub fn flush_blocking(&self) -> bool {
		if self.is_current() {
			return false;
		}
		Arc::clone(&self.inner).flush_until(None)
	}

	/// Async variant of [`flush_blocking`](Strand::flush_blocking).
	pub async fn flush(&self) {
		if self.is_current() {
			return;
		}
		let (tx, rx) = tokio::sync::oneshot::channel();
		let marker = Entry::Marker(Box::new(move || {
			let _ = tx.send(());
		}));
		if self.inner.push(marker, true).is_ok() {
			let _ = rx.await;
		}
	}

	pub fn record(&self) -> StrandRecord {
		self.inner.record()
	}
}

impl<K: Copy + Send + 'static> StrandInner<K> {
	fn push(self: &Arc<Self>, entry: Entry<K>, allow_closed: bool) -> Result<(), StrandError> {
		let schedule = {
			let mut state = self.state.lock();
			if state.closed && !allow_closed {
				return Err(StrandError::Closed);
			}
			state.queue.push_back(entry);
			!std::mem::replace(&mut state.draining, true)
		};
		if schedule {
			let inner = Arc::clone(self);
			spawn_detached_blocking(self.class, move || inner.drain());
		}
		Ok(())
	}

	fn is_current(&self) -> bool {
		CURRENT.with(|c| c.get() == self.id)
	}

	fn drain(self: Arc<Self>) {
		let _current = CurrentGuard::enter(self.id);
		loop {
			let job = {
				let mut state = self.state.lock();
				match state.queue.pop_front() {
					Some(Entry::Job { job, .. }) => job,
					Some(Entry::Marker(marker)) => {
						drop(state);
						marker();
						continue;
					}
					None => {
						state.draining = false;
						return;
					}
				}
			};
			if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
				let message = panic_message(payload.as_ref());
				tracing::warn!(strand = %self.name, panic = %message, "worker.strand.panic");
				self.panics.fetch_add(1, Ordering::AcqRel);
				self.state.lock().last_panic = Some(message);
			}
			self.executed.fetch_add(1, Ordering::AcqRel);
		}
	}
}

impl<K: Copy + Send + 'static> StrandProbe for StrandInner<K> {
	fn record(&self) -> StrandRecord {
		let state = self.state.lock();
		StrandRecord {
			name: self.name.to_string(),
			class: self.class,
			pending: state.queue.len(),
			executed: self.executed.load(Ordering::Acquire),
			panics: self.panics.load(Ordering::Acquire),
			last_panic: state.last_panic.clone(),
			closed: state.closed,
		}
	}

	fn is_current(&self) -> bool {
		StrandInner::is_current(self)
	}

	fn flush_until(self: Arc<Self>, deadline: Option<Instant>) -> bool {
		let latch = Latch::new();
		let remote = latch.clone();
		let marker = Entry::Marker(Box::new(move || {
			remote.release(());
		}));
		if self.push(marker, true).is_err() {
			return false;
		}
		match deadline {
			None => latch.wait().is_some(),
			Some(deadline) => latch.wait_timeout(deadline.saturating_duration_since(Instant::now())).is_some(),
		}
	}
}
