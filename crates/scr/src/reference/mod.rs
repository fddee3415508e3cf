//! Reference tracking.
//!
//! # Role
//!
//! One [`ReferenceManager`] per declared reference of a configuration. It keeps the
//! live candidate list (interface plus target filter, priority order) and hands a
//! [`CandidateView`] to its [`CandidateSink`] whenever that list changes.
//!
//! # Invariants
//!
//! - The candidate list is updated on the notifying thread, under the tracker lock,
//!   and the resulting view is handed to the sink before the lock is released: views
//!   reach the actor queue in the order they were computed.
//! - Every change bumps the view version; a retarget also bumps the epoch. Consumers
//!   drop views that are older than the one they hold.
//! - A property update is only a change when the entry generation differs.
//!
//! # Concurrency
//!
//! | State | Guard | Touched by |
//! |---|---|---|
//! | target, candidates, epoch | tracker `Mutex` | registry dispatch, owning actor |
//! | sink | `Weak` | registry dispatch |

use std::sync::{Arc, Weak};

use keel_registry::{
	FilterEvaluator, Interest, PropValue, Properties, ServiceEntry, ServiceEvent, ServiceEventKind, ServiceListener, ServiceRegistry,
	Subscription, TargetFilter, cmp_priority,
};
use parking_lot::Mutex;

use crate::ReferenceMetadata;
use crate::policy::BindingShape;

/// Target filter in effect for a reference.
#[derive(Debug, Clone)]
pub(crate) enum Target {
	All,
	Filter(Arc<dyn TargetFilter>),
	/// A configured filter that does not parse. Matches nothing.
	Invalid(String),
}

impl Target {
	fn as_str(&self) -> Option<&str> {
		match self {
			Self::All => None,
			Self::Filter(filter) => Some(filter.as_str()),
			Self::Invalid(expr) => Some(expr),
		}
	}
}

/// A reference with its configuration overrides applied.
#[derive(Debug, Clone)]
pub(crate) struct EffectiveReference {
	pub meta: ReferenceMetadata,
	pub interest: Interest,
	pub target: Target,
	pub min: usize,
}

impl EffectiveReference {
	/// Applies `<name>.target` and `<name>.cardinality.minimum` from `props`.
	pub(crate) fn resolve(meta: &ReferenceMetadata, props: &Properties, evaluator: &dyn FilterEvaluator) -> Self {
		let expr = props
			.get(&format!("{}.target", meta.name))
			.and_then(PropValue::as_str)
			.map(str::to_string)
			.or_else(|| meta.target.clone());
		let target = match expr {
			None => Target::All,
			Some(expr) => match evaluator.parse(&expr) {
				Ok(filter) => Target::Filter(filter),
				Err(error) => {
					tracing::warn!(reference = %meta.name, %error, "scr.reference.invalid_target");
					Target::Invalid(expr)
				}
			},
		};

		let declared = meta.cardinality.lower_bound();
		let min = props
			.get(&format!("{}.cardinality.minimum", meta.name))
			.and_then(PropValue::as_i64)
			.map_or(declared, |value| declared.max(usize::try_from(value).unwrap_or(0)));
		let min = if meta.cardinality.is_multiple() { min } else { min.min(1) };

		Self {
			meta: meta.clone(),
			interest: Interest::for_interface(&meta.interface),
			target,
			min,
		}
	}

	pub(crate) fn name(&self) -> &str {
		&self.meta.name
	}

	pub(crate) fn target_str(&self) -> Option<&str> {
		self.target.as_str()
	}

	pub(crate) fn shape(&self) -> BindingShape {
		BindingShape::new(&self.meta, self.min)
	}

	pub(crate) fn matches(&self, entry: &ServiceEntry) -> bool {
		if !self.interest.matches(entry) {
			return false;
		}
		match &self.target {
			Target::All => true,
			Target::Filter(filter) => filter.matches(entry.properties()),
			Target::Invalid(_) => false,
		}
	}

	/// Whether both select the same services.
	pub(crate) fn same_target(&self, other: &Self) -> bool {
		self.interest == other.interest && self.target_str() == other.target_str()
	}

	/// Candidates in `registry` for this reference, priority order.
	pub(crate) fn scan(&self, registry: &ServiceRegistry) -> Vec<Arc<ServiceEntry>> {
		registry.entries(&self.interest).into_iter().filter(|e| self.matches(e)).collect()
	}
}

/// Candidate list as of one tracker change.
#[derive(Debug, Clone)]
pub(crate) struct CandidateView {
	pub epoch: u64,
	pub version: u64,
	pub candidates: Arc<[Arc<ServiceEntry>]>,
}

impl CandidateView {
	/// Whether `self` supersedes `current`.
	pub(crate) fn is_newer_than(&self, current: &Self) -> bool {
		self.epoch == current.epoch && self.version > current.version
	}
}

/// Receiver of candidate changes, normally a component configuration.
pub(crate) trait CandidateSink: Send + Sync {
	/// Called on the notifying thread with the tracker lock held. Must not block.
	fn candidates_changed(self: Arc<Self>, index: usize, view: CandidateView);
}

struct Tracker {
	reference: Arc<EffectiveReference>,
	epoch: u64,
	version: u64,
	candidates: Vec<Arc<ServiceEntry>>,
}

impl Tracker {
	fn view(&self) -> CandidateView {
		CandidateView {
			epoch: self.epoch,
			version: self.version,
			candidates: Arc::from(self.candidates.as_slice()),
		}
	}

	fn apply(&mut self, event: &ServiceEvent) -> bool {
		let entry = &event.entry;
		let position = self.candidates.iter().position(|c| c.id() == entry.id());
		let keep = event.kind != ServiceEventKind::Withdrawn && self.reference.matches(entry);
		match (position, keep) {
			(Some(at), true) => {
				if self.candidates[at].generation() == entry.generation() {
					return false;
				}
				self.candidates[at] = Arc::clone(entry);
			}
			(None, true) => self.candidates.push(Arc::clone(entry)),
			(Some(at), false) => {
				self.candidates.remove(at);
			}
			(None, false) => return false,
		}
		self.candidates.sort_by(|a, b| cmp_priority(a, b));
		self.version += 1;
		true
	}
}

/// Live candidate tracker for one reference.
pub(crate) struct ReferenceManager {
	index: usize,
	tracker: Mutex<Tracker>,
}

impl ReferenceManager {
	pub(crate) fn new(index: usize, reference: Arc<EffectiveReference>) -> Arc<Self> {
		Arc::new(Self {
			index,
			tracker: Mutex::new(Tracker {
				reference,
				epoch: 0,
				version: 0,
				candidates: Vec::new(),
			}),
		})
	}

	/// Subscribes to the registry. The initial candidates are seeded before this returns.
	pub(crate) fn open(self: &Arc<Self>, registry: &ServiceRegistry, sink: Weak<dyn CandidateSink>) -> Subscription {
		let interest = self.tracker.lock().reference.interest.clone();
		let listener = ReferenceListener {
			manager: Arc::clone(self),
			sink,
		};
		registry.subscribe(interest, Arc::new(listener))
	}

	pub(crate) fn view(&self) -> CandidateView {
		self.tracker.lock().view()
	}

	/// Switches to a new target and recomputes the candidates from the registry.
	///
	/// The registry snapshot may run ahead of in-flight notifications; those are
	/// absorbed by the generation check when they arrive.
	pub(crate) fn retarget(&self, registry: &ServiceRegistry, reference: Arc<EffectiveReference>) -> CandidateView {
		let mut tracker = self.tracker.lock();
		tracker.candidates = reference.scan(registry);
		tracker.reference = reference;
		tracker.epoch += 1;
		tracker.version += 1;
		tracing::debug!(
			reference = self.index,
			epoch = tracker.epoch,
			candidates = tracker.candidates.len(),
			"scr.reference.retarget"
		);
		tracker.view()
	}

	fn seed(&self, initial: &[Arc<ServiceEntry>]) {
		let mut tracker = self.tracker.lock();
		let candidates: Vec<_> = initial.iter().filter(|e| tracker.reference.matches(e)).cloned().collect();
		tracker.candidates = candidates;
		tracker.version += 1;
	}
}

struct ReferenceListener {
	manager: Arc<ReferenceManager>,
	sink: Weak<dyn CandidateSink>,
}

impl ServiceListener for ReferenceListener {
	fn opened(&self, initial: &[Arc<ServiceEntry>]) {
		self.manager.seed(initial);
	}

	fn service_changed(&self, event: &ServiceEvent) {
		let mut tracker = self.manager.tracker.lock();
		if !tracker.apply(event) {
			return;
		}
		tracing::trace!(
			reference = self.manager.index,
			service = %event.entry.id(),
			kind = ?event.kind,
			candidates = tracker.candidates.len(),
			"scr.reference.changed"
		);
		let view = tracker.view();
		if let Some(sink) = self.sink.upgrade() {
			sink.candidates_changed(self.manager.index, view);
		}
		drop(tracker);
	}
}
