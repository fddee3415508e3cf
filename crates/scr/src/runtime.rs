//! Runtime facade.
//!
//! [`ServiceComponentRuntime`] registers descriptors with their classes, routes
//! configuration data to component holders, and exposes inspection snapshots.
//! Mutations return once the work is queued on the affected actors; [`settle`]
//! waits for every actor to go quiet.
//!
//! [`settle`]: ServiceComponentRuntime::settle

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use indexmap::IndexMap;
use keel_registry::{FilterEvaluator, LdapEvaluator, Properties, ServiceRegistry};
use keel_worker::{StrandRecord, StrandRegistry, TaskClass};
use parking_lot::{Mutex, RwLock};

use crate::class::ResolvedClass;
use crate::component::ConfigurationHandle;
use crate::dto::{ComponentConfigurationDto, ComponentDescriptionDto};
use crate::holder::ComponentHolder;
use crate::{ComponentClass, ComponentDescriptor, DeactivationReason, ScrConfig, ScrError};

/// State shared by every configuration of one runtime.
pub(crate) struct RuntimeShared {
	pub registry: ServiceRegistry,
	pub evaluator: Arc<dyn FilterEvaluator>,
	pub config: ScrConfig,
	pub strands: StrandRegistry,
	change_count: AtomicU64,
	next_configuration: AtomicU64,
}

impl RuntimeShared {
	pub(crate) fn next_configuration_id(&self) -> u64 {
		self.next_configuration.fetch_add(1, Ordering::AcqRel)
	}

	pub(crate) fn bump_change_count(&self) {
		self.change_count.fetch_add(1, Ordering::AcqRel);
	}
}

#[derive(Default)]
struct ConfigurationStore {
	singletons: BTreeMap<String, Properties>,
	factories: BTreeMap<String, BTreeMap<String, Properties>>,
}

pub struct ServiceComponentRuntime {
	shared: Arc<RuntimeShared>,
	holders: RwLock<IndexMap<String, Arc<ComponentHolder>>>,
	store: Mutex<ConfigurationStore>,
	stopped: AtomicBool,
}

impl ServiceComponentRuntime {
	/// Runtime over `registry` using LDAP target filters.
	pub fn new(registry: ServiceRegistry, config: ScrConfig) -> Result<Self, ScrError> {
		Self::with_evaluator(registry, config, Arc::new(LdapEvaluator))
	}

	pub fn with_evaluator(registry: ServiceRegistry, config: ScrConfig, evaluator: Arc<dyn FilterEvaluator>) -> Result<Self, ScrError> {
		config.validate()?;
		if !keel_worker::configure_global_runtime(config.actor_thread_name.clone()) {
			tracing::trace!(thread_name = %config.actor_thread_name, "scr.runtime.thread_name_taken");
		}
		tracing::debug!(
			keep_instances = config.keep_instances,
			lock_timeout_ms = config.lock_timeout_ms,
			stop_timeout_ms = config.stop_timeout_ms,
			"scr.runtime.start"
		);
		Ok(Self {
			shared: Arc::new(RuntimeShared {
				registry,
				evaluator,
				config,
				strands: StrandRegistry::new(),
				change_count: AtomicU64::new(0),
				next_configuration: AtomicU64::new(1),
			}),
			holders: RwLock::new(IndexMap::new()),
			store: Mutex::new(ConfigurationStore::default()),
			stopped: AtomicBool::new(false),
		})
	}

	pub fn registry(&self) -> &ServiceRegistry {
		&self.shared.registry
	}

	pub fn config(&self) -> &ScrConfig {
		&self.shared.config
	}

	/// Validates `descriptor`, binds it to `class` and enables it when it is enabled by default.
	pub fn register<C: Send + 'static>(&self, mut descriptor: ComponentDescriptor, class: ComponentClass<C>) -> Result<(), ScrError> {
		if self.stopped.load(Ordering::Acquire) {
			return Err(ScrError::ShutDown);
		}
		descriptor.validate()?;
		for reference in &descriptor.references {
			if let Some(target) = &reference.target {
				self.shared.evaluator.parse(target).map_err(|source| ScrError::InvalidTarget {
					component: descriptor.name.clone(),
					reference: reference.name.clone(),
					source,
				})?;
			}
		}
		let class = ResolvedClass::resolve(&descriptor, class)?;

		let name = descriptor.name.clone();
		let holder = Arc::new(ComponentHolder::new(Arc::new(descriptor), Arc::new(class), Arc::clone(&self.shared)));
		{
			let mut holders = self.holders.write();
			if holders.contains_key(&name) {
				return Err(ScrError::DuplicateComponent(name));
			}
			holders.insert(name.clone(), Arc::clone(&holder));
		}

		let pid = holder.descriptor().pid().to_string();
		let (singleton, factory) = {
			let store = self.store.lock();
			(store.singletons.get(&pid).cloned(), store.factories.get(&pid).cloned().unwrap_or_default())
		};
		holder.set_configuration(singleton);
		for (instance, config) in factory {
			holder.set_factory_configuration(&instance, Some(config));
		}

		tracing::info!(component = %name, class = %holder.descriptor().implementation, "scr.register");
		if holder.descriptor().enabled {
			holder.enable();
		}
		Ok(())
	}

	/// Disposes every configuration of `name` and forgets the descriptor.
	pub fn unregister(&self, name: &str) -> Result<(), ScrError> {
		let holder = self
			.holders
			.write()
			.shift_remove(name)
			.ok_or_else(|| ScrError::UnknownComponent(name.to_string()))?;
		holder.disable(DeactivationReason::Disposed);
		tracing::info!(component = %name, "scr.unregister");
		Ok(())
	}

	fn holder(&self, name: &str) -> Result<Arc<ComponentHolder>, ScrError> {
		self.holders
			.read()
			.get(name)
			.cloned()
			.ok_or_else(|| ScrError::UnknownComponent(name.to_string()))
	}

	fn holders(&self) -> Vec<Arc<ComponentHolder>> {
		self.holders.read().values().cloned().collect()
	}

	/// Enables `name`. Returns once the work is queued.
	pub fn enable(&self, name: &str) -> Result<(), ScrError> {
		if self.stopped.load(Ordering::Acquire) {
			return Err(ScrError::ShutDown);
		}
		self.holder(name)?.enable();
		Ok(())
	}

	/// Disables `name`. Idempotent; returns once the work is queued.
	pub fn disable(&self, name: &str) -> Result<(), ScrError> {
		self.holder(name)?.disable(DeactivationReason::Disabled);
		Ok(())
	}

	pub fn is_enabled(&self, name: &str) -> Result<bool, ScrError> {
		Ok(self.holder(name)?.is_enabled())
	}

	/// Sets (`Some`) or deletes (`None`) the configuration stored under `pid`.
	pub fn update_configuration(&self, pid: &str, config: Option<Properties>) {
		{
			let mut store = self.store.lock();
			match &config {
				Some(config) => store.singletons.insert(pid.to_string(), config.clone()),
				None => store.singletons.remove(pid),
			};
		}
		tracing::debug!(pid, present = config.is_some(), "scr.config.update");
		for holder in self.holders().into_iter().filter(|h| h.descriptor().pid() == pid) {
			holder.set_configuration(config.clone());
		}
	}

	/// Sets or deletes one instance of the factory configuration `factory_pid`.
	pub fn update_factory_configuration(&self, factory_pid: &str, instance: &str, config: Option<Properties>) {
		{
			let mut store = self.store.lock();
			let instances = store.factories.entry(factory_pid.to_string()).or_default();
			match &config {
				Some(config) => instances.insert(instance.to_string(), config.clone()),
				None => instances.remove(instance),
			};
		}
		tracing::debug!(factory_pid, instance, present = config.is_some(), "scr.config.factory_update");
		for holder in self.holders().into_iter().filter(|h| h.descriptor().pid() == factory_pid) {
			holder.set_factory_configuration(instance, config.clone());
		}
	}

	pub fn description(&self, name: &str) -> Option<ComponentDescriptionDto> {
		self.holder(name).ok().map(|h| ComponentDescriptionDto::from(h.descriptor().as_ref()))
	}

	/// Descriptions in registration order.
	pub fn descriptions(&self) -> Vec<ComponentDescriptionDto> {
		self.holders()
			.iter()
			.map(|h| ComponentDescriptionDto::from(h.descriptor().as_ref()))
			.collect()
	}

	/// Configuration snapshots of `name`. Empty while the component is disabled.
	pub fn configurations(&self, name: &str) -> Result<Vec<ComponentConfigurationDto>, ScrError> {
		Ok(self.holder(name)?.dtos())
	}

	pub fn handles(&self, name: &str) -> Result<Vec<ConfigurationHandle>, ScrError> {
		Ok(self.holder(name)?.configurations().into_iter().map(ConfigurationHandle::new).collect())
	}

	/// Bumped whenever any configuration snapshot changes.
	pub fn change_count(&self) -> u64 {
		self.shared.change_count.load(Ordering::Acquire)
	}

	pub fn actor_records(&self) -> Vec<StrandRecord> {
		self.shared.strands.snapshots()
	}

	/// Blocks until every actor is idle. `false` after `stop_timeout`.
	pub fn settle(&self) -> bool {
		self.shared.strands.quiesce(Some(self.shared.config.stop_timeout()))
	}

	/// Async variant of [`settle`](Self::settle), run on the blocking pool.
	pub async fn settle_async(&self) -> bool {
		let strands = self.shared.strands.clone();
		let timeout = self.shared.config.stop_timeout();
		keel_worker::spawn_blocking(TaskClass::Background, move || strands.quiesce(Some(timeout)))
			.await
			.unwrap_or(false)
	}

	/// Disables every component and waits for the teardown. Later registrations fail.
	pub fn shutdown(&self) -> bool {
		if self.stopped.swap(true, Ordering::AcqRel) {
			return true;
		}
		self.stop_all();
		let settled = self.settle();
		tracing::info!(settled, "scr.runtime.stop");
		settled
	}

	fn stop_all(&self) {
		for holder in self.holders() {
			holder.disable(DeactivationReason::RuntimeStopped);
		}
	}
}

impl Drop for ServiceComponentRuntime {
	fn drop(&mut self) {
		if !self.stopped.swap(true, Ordering::AcqRel) {
			self.stop_all();
		}
	}
}

impl std::fmt::Debug for ServiceComponentRuntime {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ServiceComponentRuntime")
			.field("components", &self.holders.read().len())
			.field("change_count", &self.change_count())
			.finish()
	}
}
