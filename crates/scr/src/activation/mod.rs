//! Lifecycle of one component configuration.
//!
//! # Role
//!
//! [`ActivationStateMachine`] owns everything a configuration has: reference
//! trackers and their subscriptions, the current bindings, the instance while
//! active, and the registration of the component's own service. Every method runs
//! on the configuration's actor.
//!
//! # Invariants
//!
//! - While `Satisfied` or `Active`, every reference has at least its lower bound of
//!   candidates; a violation drives the configuration to `UnsatisfiedReference`
//!   within the same task.
//! - Activation order: service objects for every bound entry, constructor, field
//!   injection, bind methods (lowest priority first), activate callback, own service.
//! - Deactivation order: own service withdrawn, deactivate callback, unbind methods
//!   (reverse binding order), instance dropped, service objects released.
//! - User code never unwinds past this module: errors and panics from callbacks are
//!   caught, logged, and turned into state.
//!
//! # Concurrency
//!
//! | State | Guard | Touched by |
//! |---|---|---|
//! | engine fields | configuration `Mutex`, actor-only | owning actor |
//! | published object, use count | [`ServiceCell`] atomics | actor, consumers of the service |

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use keel_registry::{
	PropValue, Properties, ServiceEntry, ServiceFactory, ServiceId, ServiceInstance, ServiceLease, ServiceObject, ServiceRegistration,
	Subscription,
};
use keel_worker::panic_message;

use crate::class::{Instance, ResolvedClass};
use crate::dto::{ComponentConfigurationDto, SatisfiedReferenceDto, ServiceReferenceDto, UnsatisfiedReferenceDto};
use crate::policy::{Decision, RebindPlan, binding_order, decide, select};
use crate::reference::{CandidateSink, CandidateView, EffectiveReference, ReferenceManager};
use crate::runtime::RuntimeShared;
use crate::{BoundService, ComponentContext, ComponentDescriptor, ComponentError, ComponentState, DeactivationReason, FieldValue, InitArgs};

mod configuration;

pub(crate) use self::configuration::ConfigureOutcome;

pub(crate) const COMPONENT_NAME: &str = "component.name";
pub(crate) const COMPONENT_ID: &str = "component.id";

/// The object handed to consumers of the component's service.
pub(crate) struct PublishedObject {
	pub instance: ServiceInstance,
	pub generation: u64,
}

/// Consumer-visible half of the service state.
#[derive(Default)]
pub(crate) struct ServiceCell {
	pub published: ArcSwapOption<PublishedObject>,
	pub use_count: AtomicUsize,
}

impl ServiceCell {
	/// Drops one use of `instance` if it is still the published object.
	pub fn release_use(&self, instance: &ServiceInstance) -> bool {
		let Some(published) = self.published.load_full() else {
			return false;
		};
		if !Arc::ptr_eq(&published.instance, instance) {
			return false;
		}
		let _ = self.use_count.fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
		true
	}
}

struct Bound {
	entry: Arc<ServiceEntry>,
	service: Option<BoundService>,
	_lease: Option<ServiceLease>,
}

impl Bound {
	fn pending(entry: Arc<ServiceEntry>) -> Self {
		Self {
			entry,
			service: None,
			_lease: None,
		}
	}

	fn leased(lease: ServiceLease) -> Self {
		let entry = Arc::clone(lease.entry());
		Self {
			service: Some(BoundService::new(Arc::clone(&entry), Arc::clone(lease.instance()))),
			entry,
			_lease: Some(lease),
		}
	}

	fn id(&self) -> ServiceId {
		self.entry.id()
	}
}

fn field_value(bindings: &[Bound], multiple: bool) -> FieldValue {
	let mut services = bindings.iter().filter_map(|b| b.service.clone());
	if multiple {
		FieldValue::Multiple(services.collect())
	} else {
		FieldValue::Single(services.next())
	}
}

/// Runs user code, turning errors and panics into a failure message.
fn guarded<R>(f: impl FnOnce() -> Result<R, ComponentError>) -> Result<R, String> {
	match catch_unwind(AssertUnwindSafe(f)) {
		Ok(Ok(value)) => Ok(value),
		Ok(Err(error)) => Err(error.to_string()),
		Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
	}
}

pub(crate) struct ActivationStateMachine {
	name: Arc<str>,
	id: u64,
	descriptor: Arc<ComponentDescriptor>,
	class: Arc<ResolvedClass>,
	shared: Arc<RuntimeShared>,
	cell: Arc<ServiceCell>,
	factory: Arc<dyn ServiceFactory>,
	sink: Weak<dyn CandidateSink>,

	references: Vec<Arc<EffectiveReference>>,
	managers: Vec<Arc<ReferenceManager>>,
	subscriptions: Vec<Subscription>,
	views: Vec<CandidateView>,
	bindings: Vec<Vec<Bound>>,

	state: ComponentState,
	config: Option<Properties>,
	properties: Arc<Properties>,
	instance: Option<Instance>,
	generation: u64,
	registration: Option<ServiceRegistration>,
	failure: Option<String>,
}

impl ActivationStateMachine {
	pub(crate) fn new(
		id: u64,
		descriptor: Arc<ComponentDescriptor>,
		class: Arc<ResolvedClass>,
		shared: Arc<RuntimeShared>,
		cell: Arc<ServiceCell>,
		factory: Arc<dyn ServiceFactory>,
		sink: Weak<dyn CandidateSink>,
	) -> Self {
		let mut engine = Self {
			name: Arc::from(descriptor.name.as_str()),
			id,
			descriptor,
			class,
			shared,
			cell,
			factory,
			sink,
			references: Vec::new(),
			managers: Vec::new(),
			subscriptions: Vec::new(),
			views: Vec::new(),
			bindings: Vec::new(),
			state: ComponentState::Disabled,
			config: None,
			properties: Arc::default(),
			instance: None,
			generation: 0,
			registration: None,
			failure: None,
		};
		engine.properties = Arc::new(engine.effective_properties(None));
		engine
	}

	pub(crate) fn state(&self) -> ComponentState {
		self.state
	}

	pub(crate) fn generation(&self) -> u64 {
		self.generation
	}

	pub(crate) fn instance_mut(&mut self) -> Option<&mut (dyn Any + Send)> {
		self.instance.as_deref_mut()
	}

	fn is_live(&self) -> bool {
		!matches!(self.state, ComponentState::Disabled | ComponentState::Disposed)
	}

	fn context(&self) -> ComponentContext {
		ComponentContext::new(Arc::clone(&self.name), self.id, self.generation, Arc::clone(&self.properties))
	}

	/// Descriptor properties, overlaid with configuration, plus the component identity.
	pub(crate) fn effective_properties(&self, config: Option<&Properties>) -> Properties {
		let mut props = self.descriptor.properties.clone();
		if let Some(config) = config {
			props.extend(config.iter().map(|(k, v)| (k.clone(), v.clone())));
		}
		props.insert(COMPONENT_NAME.to_string(), PropValue::from(self.descriptor.name.as_str()));
		props.insert(COMPONENT_ID.to_string(), PropValue::from(self.id));
		props
	}

	pub(crate) fn resolve_references(&self, props: &Properties) -> Vec<Arc<EffectiveReference>> {
		self.descriptor
			.references
			.iter()
			.map(|meta| Arc::new(EffectiveReference::resolve(meta, props, self.shared.evaluator.as_ref())))
			.collect()
	}

	fn all_satisfied(&self) -> bool {
		self.references
			.iter()
			.zip(&self.views)
			.all(|(reference, view)| reference.shape().is_satisfied(view.candidates.len()))
	}

	fn fresh_bindings(&self) -> Vec<Vec<Bound>> {
		self.references
			.iter()
			.zip(&self.views)
			.map(|(reference, view)| {
				select(reference.shape(), &view.candidates, &[])
					.into_iter()
					.map(Bound::pending)
					.collect()
			})
			.collect()
	}

	/// Opens the reference trackers and evaluates for the first time.
	pub(crate) fn enable(&mut self, config: Option<Properties>) {
		if self.state != ComponentState::Disabled {
			return;
		}
		self.properties = Arc::new(self.effective_properties(config.as_ref()));
		self.config = config;
		self.references = self.resolve_references(&self.properties);
		self.managers = self
			.references
			.iter()
			.enumerate()
			.map(|(index, reference)| ReferenceManager::new(index, Arc::clone(reference)))
			.collect();
		self.subscriptions = self
			.managers
			.iter()
			.map(|manager| manager.open(&self.shared.registry, self.sink.clone()))
			.collect();
		self.views = self.managers.iter().map(|manager| manager.view()).collect();
		self.bindings = self.fresh_bindings();
		self.state = ComponentState::UnsatisfiedReference;
		tracing::debug!(component = %self.name, id = self.id, references = self.references.len(), "scr.enable");
		self.evaluate();
	}

	/// Tears everything down for good. Later tasks find the configuration disposed.
	pub(crate) fn dispose(&mut self, reason: DeactivationReason) {
		if !self.is_live() {
			return;
		}
		self.deactivate(reason, false);
		self.withdraw_service();
		self.subscriptions.clear();
		self.managers.clear();
		self.views.clear();
		self.bindings.clear();
		self.state = ComponentState::Disposed;
		tracing::debug!(component = %self.name, id = self.id, %reason, "scr.dispose");
	}

	/// Applies a tracker view, dropping views that an earlier task already superseded.
	pub(crate) fn candidates_changed(&mut self, index: usize, view: CandidateView) {
		if !self.is_live() {
			return;
		}
		let Some(current) = self.views.get(index) else {
			return;
		};
		if !view.is_newer_than(current) {
			tracing::trace!(component = %self.name, reference = index, epoch = view.epoch, version = view.version, "scr.view.stale");
			return;
		}
		self.views[index] = view;
		self.reconcile(index);
	}

	/// Brings reference `index` in line with its current view.
	pub(crate) fn reconcile(&mut self, index: usize) {
		let shape = self.references[index].shape();
		let candidates = Arc::clone(&self.views[index].candidates);

		if self.state != ComponentState::Active {
			let bound: Vec<ServiceId> = self.bindings[index].iter().map(Bound::id).collect();
			self.bindings[index] = select(shape, &candidates, &bound).into_iter().map(Bound::pending).collect();
			self.evaluate();
			return;
		}

		let bound: Vec<Arc<ServiceEntry>> = self.bindings[index].iter().map(|b| Arc::clone(&b.entry)).collect();
		match decide(shape, &candidates, &bound) {
			Decision::NoOp => {}
			Decision::Rebind(plan) => self.rebind(index, plan),
			Decision::Reactivate => {
				tracing::debug!(component = %self.name, id = self.id, reference = self.references[index].name(), "scr.reactivate");
				self.deactivate(DeactivationReason::ReferenceChanged, false);
				self.evaluate();
			}
			Decision::Unsatisfied => {
				self.deactivate(DeactivationReason::ReferenceChanged, false);
				self.evaluate();
			}
		}
	}

	fn rebind(&mut self, index: usize, plan: RebindPlan) {
		let Some(mut instance) = self.instance.take() else {
			return;
		};
		let class = Arc::clone(&self.class);
		let handlers = &class.references[index];
		let reference = self.references[index].name().to_string();

		for entry in &plan.unbind {
			let Some(at) = self.bindings[index].iter().position(|b| b.id() == entry.id()) else {
				continue;
			};
			let bound = self.bindings[index].remove(at);
			if let (Some(unbind), Some(service)) = (&handlers.unbind, &bound.service) {
				self.call_method(&reference, "unbind", || unbind(instance.as_mut(), service));
			}
		}

		for entry in &plan.bind {
			let Some(lease) = self.shared.registry.get_service(entry.id()) else {
				tracing::warn!(component = %self.name, reference, service = %entry.id(), "scr.bind.unavailable");
				continue;
			};
			let bound = Bound::leased(lease);
			if let (Some(bind), Some(service)) = (&handlers.bind, &bound.service) {
				self.call_method(&reference, "bind", || bind(instance.as_mut(), service));
			}
			self.bindings[index].push(bound);
		}

		for entry in &plan.updated {
			let Some(bound) = self.bindings[index].iter_mut().find(|b| b.id() == entry.id()) else {
				continue;
			};
			bound.entry = Arc::clone(entry);
			if let Some(service) = &mut bound.service {
				*service = BoundService::new(Arc::clone(entry), Arc::clone(service.instance()));
			}
			let service = bound.service.clone();
			if let (Some(updated), Some(service)) = (&handlers.updated, service) {
				self.call_method(&reference, "updated", || updated(instance.as_mut(), &service));
			}
		}

		let order: Vec<ServiceId> = plan.next.iter().map(|e| e.id()).collect();
		self.bindings[index].sort_by_key(|b| order.iter().position(|id| *id == b.id()).unwrap_or(usize::MAX));

		if let Some(field) = &handlers.field {
			let value = field_value(&self.bindings[index], self.references[index].meta.cardinality.is_multiple());
			if let Err(reason) = guarded(|| {
				field(instance.as_mut(), value);
				Ok(())
			}) {
				tracing::error!(component = %self.name, reference, %reason, "scr.field.failed");
			}
		}
		self.instance = Some(instance);

		if self.bindings[index].len() < self.references[index].min {
			self.deactivate(DeactivationReason::ReferenceChanged, false);
			self.evaluate();
		}
	}

	fn call_method(&self, reference: &str, point: &'static str, f: impl FnOnce() -> Result<(), ComponentError>) {
		match guarded(f) {
			Ok(()) => tracing::debug!(component = %self.name, id = self.id, reference, point, "scr.bind"),
			Err(reason) => tracing::error!(component = %self.name, id = self.id, reference, point, %reason, "scr.bind.failed"),
		}
	}

	/// Moves the configuration to wherever its references allow.
	pub(crate) fn evaluate(&mut self) {
		if !self.is_live() {
			return;
		}
		if !self.all_satisfied() {
			if self.state == ComponentState::Active {
				self.deactivate(DeactivationReason::ReferenceChanged, false);
			}
			self.withdraw_service();
			self.state = ComponentState::UnsatisfiedReference;
			return;
		}
		match self.state {
			ComponentState::Active => {}
			_ => {
				if self.state == ComponentState::UnsatisfiedReference {
					self.state = ComponentState::Satisfied;
				}
				if self.descriptor.is_immediate() {
					self.activate();
				} else {
					self.register_service();
				}
			}
		}
	}

	fn activate(&mut self) {
		for index in 0..self.references.len() {
			let mut obtained = Vec::with_capacity(self.bindings[index].len());
			for bound in std::mem::take(&mut self.bindings[index]) {
				match self.shared.registry.get_service(bound.id()) {
					Some(lease) => obtained.push(Bound::leased(lease)),
					None => tracing::warn!(component = %self.name, reference = self.references[index].name(), service = %bound.id(), "scr.activate.unavailable"),
				}
			}
			let short = obtained.len() < self.references[index].min;
			self.bindings[index] = obtained;
			if short {
				let reason = format!("no service could be obtained for reference {:?}", self.references[index].name());
				self.bindings = self.fresh_bindings();
				self.fail(reason);
				return;
			}
		}

		self.generation += 1;
		let ctx = self.context();
		let class = Arc::clone(&self.class);

		let mut args = InitArgs::with_len(class.params);
		for (index, reference) in self.references.iter().enumerate() {
			if let Some(parameter) = reference.meta.parameter {
				args.set(parameter, field_value(&self.bindings[index], reference.meta.cardinality.is_multiple()));
			}
		}
		let mut instance = match guarded(|| (class.construct)(&ctx, &args)) {
			Ok(instance) => instance,
			Err(reason) => {
				self.bindings = self.fresh_bindings();
				self.fail(reason);
				return;
			}
		};

		for (index, handlers) in class.references.iter().enumerate() {
			let Some(field) = &handlers.field else {
				continue;
			};
			let value = field_value(&self.bindings[index], self.references[index].meta.cardinality.is_multiple());
			if let Err(reason) = guarded(|| {
				field(instance.as_mut(), value);
				Ok(())
			}) {
				tracing::error!(component = %self.name, reference = self.references[index].name(), %reason, "scr.field.failed");
			}
		}
		for (index, handlers) in class.references.iter().enumerate() {
			let Some(bind) = &handlers.bind else {
				continue;
			};
			let reference = self.references[index].name();
			for bound in binding_order(&self.bindings[index]) {
				if let Some(service) = &bound.service {
					self.call_method(reference, "bind", || bind(instance.as_mut(), service));
				}
			}
		}

		if let Some(activate) = &class.activate
			&& let Err(reason) = guarded(|| activate(instance.as_mut(), &ctx))
		{
			self.unbind_all(&class, instance.as_mut());
			drop(instance);
			self.bindings = self.fresh_bindings();
			self.fail(reason);
			return;
		}

		let object = class.provider.as_ref().map(|provide| provide(instance.as_ref()));
		self.instance = Some(instance);
		self.failure = None;
		self.state = ComponentState::Active;
		if let Some(object) = object {
			self.cell.use_count.store(0, Ordering::Release);
			self.cell.published.store(Some(Arc::new(PublishedObject {
				instance: object,
				generation: self.generation,
			})));
		}
		tracing::info!(component = %self.name, id = self.id, generation = self.generation, "scr.activate");
		if self.descriptor.is_immediate() {
			self.register_service();
		}
	}

	fn fail(&mut self, reason: String) {
		tracing::error!(component = %self.name, id = self.id, %reason, "scr.activate.failed");
		self.failure = Some(reason);
		self.state = ComponentState::FailedActivation;
	}

	fn unbind_all(&self, class: &ResolvedClass, instance: &mut (dyn Any + Send)) {
		for (index, handlers) in class.references.iter().enumerate().rev() {
			let Some(unbind) = &handlers.unbind else {
				continue;
			};
			let reference = self.references[index].name();
			for bound in &self.bindings[index] {
				if let Some(service) = &bound.service {
					self.call_method(reference, "unbind", || unbind(&mut *instance, service));
				}
			}
		}
	}

	/// Tears the instance down and returns to `Satisfied`. No-op unless active.
	pub(crate) fn deactivate(&mut self, reason: DeactivationReason, keep_registration: bool) {
		if self.state != ComponentState::Active {
			return;
		}
		if !keep_registration {
			self.withdraw_service();
		}
		self.cell.published.store(None);
		self.cell.use_count.store(0, Ordering::Release);

		let ctx = self.context();
		let class = Arc::clone(&self.class);
		if let Some(mut instance) = self.instance.take() {
			if let Some(deactivate) = &class.deactivate
				&& let Err(failure) = guarded(|| {
					deactivate(instance.as_mut(), &ctx, reason);
					Ok(())
				}) {
				tracing::error!(component = %self.name, id = self.id, %failure, "scr.deactivate.failed");
			}
			self.unbind_all(&class, instance.as_mut());
		}
		self.bindings = self.fresh_bindings();
		self.state = ComponentState::Satisfied;
		tracing::info!(component = %self.name, id = self.id, generation = self.generation, %reason, "scr.deactivate");
	}

	/// Activates on behalf of a consumer of the delayed service and counts the use.
	pub(crate) fn acquire(&mut self) -> Option<ServiceInstance> {
		if self.state != ComponentState::Active {
			if !matches!(self.state, ComponentState::Satisfied | ComponentState::FailedActivation) || !self.all_satisfied() {
				return None;
			}
			self.activate();
		}
		let published = self.cell.published.load_full()?;
		self.cell.use_count.fetch_add(1, Ordering::AcqRel);
		Some(Arc::clone(&published.instance))
	}

	/// Returns a use handed out for `instance`, releasing the instance once unused.
	pub(crate) fn unget(&mut self, instance: &ServiceInstance) {
		if self.cell.release_use(instance) {
			self.release_if_unused();
		} else {
			tracing::trace!(component = %self.name, id = self.id, "scr.service.stale_release");
		}
	}

	/// Undoes the use counted for a consumer that gave up waiting.
	pub(crate) fn abandon_use(&mut self) {
		let _ = self
			.cell
			.use_count
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
		self.release_if_unused();
	}

	/// Deactivates a delayed component nobody uses any more.
	///
	/// The published object is taken away before the count is read, so a consumer
	/// on the fast path either is counted here or sees the object gone and queues.
	pub(crate) fn release_if_unused(&mut self) {
		if self.state != ComponentState::Active || self.descriptor.is_immediate() || self.shared.config.keep_instances {
			return;
		}
		let published = self.cell.published.swap(None);
		if self.cell.use_count.load(Ordering::SeqCst) == 0 {
			self.deactivate(DeactivationReason::Unspecified, true);
		} else {
			self.cell.published.store(published);
		}
	}

	fn service_properties(&self) -> Properties {
		self.properties
			.iter()
			.filter(|(key, _)| !key.starts_with('.'))
			.map(|(key, value)| (key.clone(), value.clone()))
			.collect()
	}

	fn register_service(&mut self) {
		if self.registration.is_some() || !self.descriptor.has_service() {
			return;
		}
		let object = ServiceObject::Factory(Arc::clone(&self.factory));
		match self
			.shared
			.registry
			.publish(self.descriptor.service.iter().cloned(), self.service_properties(), object)
		{
			Ok(registration) => {
				tracing::debug!(component = %self.name, id = self.id, service = %registration.id(), "scr.service.register");
				self.registration = Some(registration);
			}
			Err(error) => tracing::error!(component = %self.name, id = self.id, %error, "scr.service.register_failed"),
		}
	}

	fn withdraw_service(&mut self) {
		let Some(registration) = self.registration.take() else {
			return;
		};
		let service = registration.id();
		match registration.withdraw() {
			Ok(()) => tracing::debug!(component = %self.name, id = self.id, %service, "scr.service.withdraw"),
			Err(error) => tracing::warn!(component = %self.name, id = self.id, %service, %error, "scr.service.withdraw_failed"),
		}
	}

	pub(crate) fn update_service_properties(&self) {
		if let Some(registration) = &self.registration
			&& let Err(error) = registration.set_properties(self.service_properties())
		{
			tracing::warn!(component = %self.name, id = self.id, %error, "scr.service.update_failed");
		}
	}

	pub(crate) fn dto(&self) -> ComponentConfigurationDto {
		let mut satisfied_references = Vec::new();
		let mut unsatisfied_references = Vec::new();
		for (index, reference) in self.references.iter().enumerate() {
			let Some(view) = self.views.get(index) else {
				continue;
			};
			let name = reference.name().to_string();
			let target = reference.target_str().map(str::to_string);
			if reference.shape().is_satisfied(view.candidates.len()) {
				satisfied_references.push(SatisfiedReferenceDto {
					name,
					target,
					bound_services: self.bindings[index].iter().map(|b| ServiceReferenceDto::from(b.entry.as_ref())).collect(),
				});
			} else {
				unsatisfied_references.push(UnsatisfiedReferenceDto {
					name,
					target,
					target_services: view.candidates.iter().map(|e| ServiceReferenceDto::from(e.as_ref())).collect(),
				});
			}
		}
		ComponentConfigurationDto {
			id: Some(self.id),
			name: self.descriptor.name.clone(),
			state: self.state,
			properties: Properties::clone(&self.properties),
			satisfied_references,
			unsatisfied_references,
			service: self.registration.as_ref().map(ServiceRegistration::id),
			failure: self.failure.clone(),
		}
	}
}
