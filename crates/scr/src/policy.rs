//! Binding policy decisions.
//!
//! Pure functions over candidate lists: [`select`] computes the bound set a
//! reference wants, [`decide`] turns a candidate change on an active instance into
//! a [`Decision`]. Candidate slices are always in priority order (ranking
//! descending, then id ascending).

use std::collections::HashMap;
use std::sync::Arc;

use keel_registry::{ServiceEntry, ServiceId};

use crate::ReferenceMetadata;

/// The parts of a reference that drive binding decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BindingShape {
	pub multiple: bool,
	pub dynamic: bool,
	pub greedy: bool,
	/// Effective lower bound after configuration overrides.
	pub min: usize,
}

impl BindingShape {
	pub(crate) fn new(meta: &ReferenceMetadata, min: usize) -> Self {
		Self {
			multiple: meta.cardinality.is_multiple(),
			dynamic: meta.is_dynamic() && !meta.is_constructor_bound(),
			greedy: meta.is_greedy(),
			min,
		}
	}

	pub(crate) fn is_satisfied(&self, candidates: usize) -> bool {
		candidates >= self.min
	}
}

/// Entries the reference should be bound to, in priority order.
///
/// A reluctant unary reference keeps its bound entry for as long as that entry is a
/// candidate. Multiple references take every candidate.
pub(crate) fn select(shape: BindingShape, candidates: &[Arc<ServiceEntry>], bound: &[ServiceId]) -> Vec<Arc<ServiceEntry>> {
	if shape.multiple {
		return candidates.to_vec();
	}
	if !shape.greedy
		&& let Some(kept) = bound.first().and_then(|id| candidates.iter().find(|c| c.id() == *id))
	{
		return vec![Arc::clone(kept)];
	}
	candidates.first().cloned().into_iter().collect()
}

/// Order in which selected entries are bound: lowest priority first.
pub(crate) fn binding_order<T>(selected: &[T]) -> impl Iterator<Item = &T> {
	selected.iter().rev()
}

/// In-place change to a dynamic binding.
#[derive(Debug, Clone, Default)]
pub(crate) struct RebindPlan {
	/// Entries to unbind, ascending id.
	pub unbind: Vec<Arc<ServiceEntry>>,
	/// Entries to bind, lowest priority first.
	pub bind: Vec<Arc<ServiceEntry>>,
	/// Still-bound entries whose properties changed.
	pub updated: Vec<Arc<ServiceEntry>>,
	/// Bound set after the change, priority order.
	pub next: Vec<Arc<ServiceEntry>>,
}

impl RebindPlan {
	pub(crate) fn is_update_only(&self) -> bool {
		self.unbind.is_empty() && self.bind.is_empty()
	}
}

/// Outcome of a candidate change on an active instance.
#[derive(Debug, Clone)]
pub(crate) enum Decision {
	/// Nothing bound is affected.
	NoOp,
	/// Apply the plan to the live instance.
	Rebind(RebindPlan),
	/// Tear the instance down and activate again.
	Reactivate,
	/// The reference fell below its lower bound.
	Unsatisfied,
}

/// Decides how an active instance absorbs a new candidate list for one reference.
pub(crate) fn decide(shape: BindingShape, candidates: &[Arc<ServiceEntry>], bound: &[Arc<ServiceEntry>]) -> Decision {
	if !shape.is_satisfied(candidates.len()) {
		return Decision::Unsatisfied;
	}

	let bound_ids: Vec<ServiceId> = bound.iter().map(|e| e.id()).collect();
	let proposed = select(shape, candidates, &bound_ids);
	let current: HashMap<ServiceId, &Arc<ServiceEntry>> = bound.iter().map(|e| (e.id(), e)).collect();
	let next_ids: HashMap<ServiceId, &Arc<ServiceEntry>> = proposed.iter().map(|e| (e.id(), e)).collect();

	let mut unbind: Vec<Arc<ServiceEntry>> = bound.iter().filter(|e| !next_ids.contains_key(&e.id())).cloned().collect();
	unbind.sort_by_key(|e| e.id());
	let bind: Vec<Arc<ServiceEntry>> = binding_order(&proposed)
		.filter(|e| !current.contains_key(&e.id()))
		.cloned()
		.collect();
	let updated: Vec<Arc<ServiceEntry>> = proposed
		.iter()
		.filter(|e| current.get(&e.id()).is_some_and(|old| old.generation() != e.generation()))
		.cloned()
		.collect();

	if unbind.is_empty() && bind.is_empty() {
		if updated.is_empty() {
			return Decision::NoOp;
		}
		return Decision::Rebind(RebindPlan {
			updated,
			next: proposed,
			..RebindPlan::default()
		});
	}

	if !shape.dynamic {
		// A reluctant static reference ignores arrivals while its bound set survives.
		if unbind.is_empty() && !shape.greedy {
			if updated.is_empty() {
				return Decision::NoOp;
			}
			let next = bound
				.iter()
				.map(|old| proposed.iter().find(|e| e.id() == old.id()).unwrap_or(old).clone())
				.collect();
			return Decision::Rebind(RebindPlan {
				updated,
				next,
				..RebindPlan::default()
			});
		}
		return Decision::Reactivate;
	}

	Decision::Rebind(RebindPlan {
		unbind,
		bind,
		updated,
		next: proposed,
	})
}
