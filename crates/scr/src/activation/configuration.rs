//! Configuration changes on a live configuration.
//!
//! New configuration data is diffed against the effective properties in force.
//! An active instance with a `modified` callback keeps running when every
//! retargeted reference can absorb its new target; anything else goes through a
//! full deactivate and re-evaluate cycle.

use std::sync::Arc;

use keel_registry::{Properties, ServiceEntry};

use super::ActivationStateMachine;
use crate::metadata::ConfigurationPolicy;
use crate::policy::{Decision, decide};
use crate::reference::EffectiveReference;
use crate::{ComponentState, DeactivationReason};

/// What the caller has to do after [`ActivationStateMachine::configure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConfigureOutcome {
	Unchanged,
	Applied,
	/// Configuration was deleted under policy `require`: dispose the configuration.
	Dispose,
}

impl ActivationStateMachine {
	/// Applies new configuration data; `None` deletes it.
	pub(crate) fn configure(&mut self, config: Option<Properties>) -> ConfigureOutcome {
		if !self.is_live() {
			return ConfigureOutcome::Unchanged;
		}
		if config.is_none() && self.descriptor.configuration_policy == ConfigurationPolicy::Require {
			return ConfigureOutcome::Dispose;
		}
		if config == self.config {
			return ConfigureOutcome::Unchanged;
		}
		let properties = self.effective_properties(config.as_ref());
		self.config = config;
		if *self.properties == properties {
			tracing::trace!(component = %self.name, id = self.id, "scr.config.unchanged");
			return ConfigureOutcome::Unchanged;
		}

		let next = self.resolve_references(&properties);
		let changed: Vec<usize> = next
			.iter()
			.zip(&self.references)
			.enumerate()
			.filter(|(_, (new, old))| !new.same_target(old) || new.min != old.min)
			.map(|(index, _)| index)
			.collect();
		tracing::debug!(component = %self.name, id = self.id, state = %self.state, changed = changed.len(), "scr.config");

		let absorbs = changed.iter().all(|&index| self.absorbs(index, &next[index]));
		if self.state == ComponentState::Active && absorbs && self.class.modified.is_some() {
			self.modify(properties, &next, &changed);
			return ConfigureOutcome::Applied;
		}

		self.deactivate(DeactivationReason::ConfigurationModified, false);
		self.properties = Arc::new(properties);
		for &index in &changed {
			self.retarget(index, Arc::clone(&next[index]));
		}
		self.bindings = self.fresh_bindings();
		if self.state == ComponentState::Satisfied {
			self.update_service_properties();
		}
		self.evaluate();
		ConfigureOutcome::Applied
	}

	/// Keeps the instance: `modified` callback, then the retargeted references.
	fn modify(&mut self, properties: Properties, next: &[Arc<EffectiveReference>], changed: &[usize]) {
		self.properties = Arc::new(properties);
		let ctx = self.context();
		let class = Arc::clone(&self.class);
		if let (Some(modified), Some(instance)) = (&class.modified, self.instance.as_mut()) {
			match super::guarded(|| modified(instance.as_mut(), &ctx)) {
				Ok(()) => tracing::debug!(component = %self.name, id = self.id, "scr.modified"),
				Err(reason) => tracing::error!(component = %self.name, id = self.id, %reason, "scr.modified.failed"),
			}
		}
		for &index in changed {
			self.retarget(index, Arc::clone(&next[index]));
			self.reconcile(index);
			if self.state != ComponentState::Active {
				return;
			}
		}
		self.update_service_properties();
	}

	/// Whether the active instance can keep running with `next` in place of reference `index`.
	fn absorbs(&self, index: usize, next: &EffectiveReference) -> bool {
		let shape = next.shape();
		if shape.dynamic {
			return true;
		}
		let candidates = next.scan(&self.shared.registry);
		let bound: Vec<Arc<ServiceEntry>> = self.bindings[index].iter().map(|b| Arc::clone(&b.entry)).collect();
		match decide(shape, &candidates, &bound) {
			Decision::NoOp => true,
			Decision::Rebind(plan) => plan.is_update_only(),
			Decision::Reactivate | Decision::Unsatisfied => false,
		}
	}

	fn retarget(&mut self, index: usize, reference: Arc<EffectiveReference>) {
		let Some(manager) = self.managers.get(index) else {
			return;
		};
		self.views[index] = manager.retarget(&self.shared.registry, Arc::clone(&reference));
		self.references[index] = reference;
	}
}
