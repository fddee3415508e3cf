//! One component configuration and its public handle.
//!
//! A [`ComponentConfiguration`] pairs an [`ActivationStateMachine`] with the actor
//! that serializes every operation on it. Callers outside the actor only ever see
//! the last published status snapshot.

use std::any::Any;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use keel_registry::{Properties, ServiceEntry, ServiceFactory, ServiceInstance};
use keel_worker::{Latch, StrandRecord};
use parking_lot::Mutex;

use crate::activation::{ActivationStateMachine, ConfigureOutcome, ServiceCell};
use crate::actor::{ComponentActor, TaskKind};
use crate::class::ResolvedClass;
use crate::dto::ComponentConfigurationDto;
use crate::reference::{CandidateSink, CandidateView};
use crate::runtime::RuntimeShared;
use crate::{ComponentDescriptor, ComponentState, DeactivationReason};

pub(crate) struct ComponentConfiguration {
	id: u64,
	name: Arc<str>,
	shared: Arc<RuntimeShared>,
	actor: ComponentActor,
	engine: Mutex<ActivationStateMachine>,
	status: ArcSwap<ComponentConfigurationDto>,
	cell: Arc<ServiceCell>,
}

impl ComponentConfiguration {
	pub(crate) fn new(descriptor: Arc<ComponentDescriptor>, class: Arc<ResolvedClass>, shared: Arc<RuntimeShared>) -> Arc<Self> {
		let id = shared.next_configuration_id();
		let name: Arc<str> = Arc::from(descriptor.name.as_str());
		let actor = ComponentActor::new(&name, id, &shared.strands);
		Arc::new_cyclic(|weak: &Weak<Self>| {
			let cell = Arc::new(ServiceCell::default());
			let sink: Weak<dyn CandidateSink> = weak.clone();
			let factory: Arc<dyn ServiceFactory> = Arc::new(ComponentServiceFactory { component: weak.clone() });
			let engine = ActivationStateMachine::new(id, descriptor, class, Arc::clone(&shared), Arc::clone(&cell), factory, sink);
			let status = ArcSwap::from_pointee(engine.dto());
			Self {
				id,
				name,
				shared,
				actor,
				engine: Mutex::new(engine),
				status,
				cell,
			}
		})
	}

	pub(crate) fn id(&self) -> u64 {
		self.id
	}

	pub(crate) fn state(&self) -> ComponentState {
		self.status.load().state
	}

	pub(crate) fn dto(&self) -> ComponentConfigurationDto {
		ComponentConfigurationDto::clone(&self.status.load())
	}

	/// Queues `op` on the actor. `false` when the actor is closed.
	pub(crate) fn run(self: &Arc<Self>, kind: TaskKind, op: impl FnOnce(&mut ActivationStateMachine) + Send + 'static) -> bool {
		let this = Arc::clone(self);
		self.actor.submit(kind, move || this.step(op)).is_ok()
	}

	fn step(&self, op: impl FnOnce(&mut ActivationStateMachine)) {
		let mut engine = self.engine.lock();
		let before = engine.state();
		op(&mut *engine);
		let after = engine.state();
		let dto = engine.dto();
		drop(engine);

		if before != after {
			tracing::info!(component = %self.name, id = self.id, from = %before, to = %after, "scr.state");
		}
		if **self.status.load() != dto {
			self.status.store(Arc::new(dto));
			self.shared.bump_change_count();
		}
	}

	pub(crate) fn enable(self: &Arc<Self>, config: Option<Properties>) {
		self.run(TaskKind::Lifecycle, move |engine| engine.enable(config));
	}

	pub(crate) fn configure(self: &Arc<Self>, config: Option<Properties>) {
		self.run(TaskKind::Configure, move |engine| {
			if engine.configure(config) == ConfigureOutcome::Dispose {
				engine.dispose(DeactivationReason::ConfigurationDeleted);
			}
		});
	}

	/// Purges queued work, tears down on the actor and closes it behind the teardown.
	pub(crate) fn dispose(self: &Arc<Self>, reason: DeactivationReason) {
		self.actor.cancel_pending();
		let this = Arc::clone(self);
		let queued = self.run(TaskKind::Lifecycle, move |engine| {
			engine.dispose(reason);
			this.actor.close();
		});
		if !queued {
			tracing::trace!(component = %self.name, id = self.id, "scr.dispose.closed");
		}
	}

	/// Produces the service object for a consumer, activating a delayed component.
	fn get_service(self: &Arc<Self>) -> Option<ServiceInstance> {
		if let Some(published) = self.cell.published.load_full() {
			self.cell.use_count.fetch_add(1, Ordering::SeqCst);
			// The actor may have withdrawn the object between the load and the count.
			if self.cell.published.load_full().is_some_and(|current| Arc::ptr_eq(&current, &published)) {
				return Some(Arc::clone(&published.instance));
			}
			let _ = self
				.cell
				.use_count
				.fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
		}
		if self.actor.is_current() {
			tracing::warn!(component = %self.name, id = self.id, "scr.service.circular");
			return None;
		}

		let latch: Latch<Option<ServiceInstance>> = Latch::new();
		let remote = latch.clone();
		let queued = self.run(TaskKind::Service, move |engine| {
			let obtained = engine.acquire();
			let handed_over = obtained.is_some();
			if !remote.release(obtained) && handed_over {
				engine.abandon_use();
			}
		});
		if !queued {
			return None;
		}
		match latch.wait_timeout(self.shared.config.lock_timeout()) {
			Some(obtained) => obtained,
			None if latch.release(None) => {
				tracing::warn!(component = %self.name, id = self.id, timeout_ms = self.shared.config.lock_timeout_ms, "scr.service.timeout");
				None
			}
			None => latch.wait().flatten(),
		}
	}

	fn unget_service(self: &Arc<Self>, instance: &ServiceInstance) {
		if !self.cell.release_use(instance) {
			// The actor may be between withdrawing and restoring the object; decide there.
			let instance = Arc::clone(instance);
			self.run(TaskKind::Service, move |engine| engine.unget(&instance));
			return;
		}
		if self.cell.use_count.load(Ordering::Acquire) == 0 {
			self.run(TaskKind::Service, ActivationStateMachine::release_if_unused);
		}
	}
}

impl CandidateSink for ComponentConfiguration {
	fn candidates_changed(self: Arc<Self>, index: usize, view: CandidateView) {
		self.run(TaskKind::Rebind, move |engine| engine.candidates_changed(index, view));
	}
}

struct ComponentServiceFactory {
	component: Weak<ComponentConfiguration>,
}

impl ServiceFactory for ComponentServiceFactory {
	fn get_service(&self, _entry: &ServiceEntry) -> Option<ServiceInstance> {
		self.component.upgrade()?.get_service()
	}

	fn unget_service(&self, _entry: &ServiceEntry, instance: &ServiceInstance) {
		if let Some(component) = self.component.upgrade() {
			component.unget_service(instance);
		}
	}
}

/// Read-only handle to one component configuration.
#[derive(Clone)]
pub struct ConfigurationHandle {
	inner: Arc<ComponentConfiguration>,
}

impl ConfigurationHandle {
	pub(crate) fn new(inner: Arc<ComponentConfiguration>) -> Self {
		Self { inner }
	}

	/// Runtime-assigned `component.id`.
	pub fn id(&self) -> u64 {
		self.inner.id
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}

	pub fn state(&self) -> ComponentState {
		self.inner.state()
	}

	pub fn dto(&self) -> ComponentConfigurationDto {
		self.inner.dto()
	}

	/// Runs `f` against the live instance on the configuration's actor.
	///
	/// Blocks until queued work ahead of it has run. `None` when no instance of type `C`
	/// exists, or when called from the configuration's own actor.
	pub fn with_instance<C, R>(&self, f: impl FnOnce(&mut C) -> R + Send + 'static) -> Option<R>
	where
		C: Any,
		R: Send + 'static,
	{
		if self.inner.actor.is_current() {
			return None;
		}
		let latch = Latch::new();
		let remote = latch.clone();
		let queued = self.inner.run(TaskKind::Inspect, move |engine| {
			let result = engine.instance_mut().and_then(|instance| instance.downcast_mut::<C>()).map(f);
			remote.release(result);
		});
		if !queued {
			return None;
		}
		latch.wait().flatten()
	}

	/// Number of instances created so far for this configuration.
	pub fn instance_generation(&self) -> Option<u64> {
		self.with_engine(ActivationStateMachine::generation)
	}

	fn with_engine<R: Send + 'static>(&self, f: fn(&ActivationStateMachine) -> R) -> Option<R> {
		if self.inner.actor.is_current() {
			return None;
		}
		let latch = Latch::new();
		let remote = latch.clone();
		let queued = self.inner.run(TaskKind::Inspect, move |engine| {
			remote.release(f(engine));
		});
		if !queued {
			return None;
		}
		latch.wait()
	}

	/// Waits until every task queued before this call has run.
	pub async fn flush(&self) {
		self.inner.actor.flush().await;
	}

	pub fn flush_blocking(&self) -> bool {
		self.inner.actor.flush_blocking()
	}

	pub fn actor_record(&self) -> StrandRecord {
		self.inner.actor.record()
	}
}

impl fmt::Debug for ConfigurationHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConfigurationHandle")
			.field("id", &self.inner.id)
			.field("name", &self.inner.name)
			.field("state", &self.state())
			.finish()
	}
}
