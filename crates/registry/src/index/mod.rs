//! Service registry with synchronous fan-out.
//!
//! # Role
//!
//! Owns the published service entries and the listener table. Every mutation
//! (publish, property update, withdrawal) builds a new snapshot and notifies
//! matching listeners on the mutating thread before returning.
//!
//! # Invariants
//!
//! - Service ids come from a monotonic counter and are never reused.
//! - Mutations and their notifications are serialized by the dispatch lock, so every
//!   listener observes events in the same order the snapshots were published.
//! - A subscriber's `opened` callback runs under the dispatch lock: no event can fall
//!   between the initial view and the first notification.
//! - Once [`Subscription::cancel`] (or drop) returns, no new notification starts for
//!   that listener.
//!
//! # Concurrency
//!
//! | State | Guard | Notes |
//! |---|---|---|
//! | entries snapshot | `ArcSwap` | wait-free reads from any thread, including listeners |
//! | mutation + fan-out | dispatch `Mutex` | listeners must not publish, update or withdraw |
//! | listener table | listeners `Mutex` | held only to copy the table, never across callbacks |

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::{
	Interest, OBJECT_CLASS, PropValue, Properties, RegistryError, SERVICE_ID, SERVICE_RANKING, ServiceEntry, ServiceId, ServiceLease,
	ServiceObject, cmp_priority, ranking_of,
};

/// What happened to a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEventKind {
	Published,
	Modified,
	Withdrawn,
}

/// One registry change as seen by listeners.
#[derive(Debug, Clone)]
pub struct ServiceEvent {
	pub kind: ServiceEventKind,
	/// The entry after the change (the last snapshot for withdrawals).
	pub entry: Arc<ServiceEntry>,
}

/// Receives registry changes for one [`Interest`].
///
/// Callbacks run on the mutating thread while the registry is mid-dispatch: they may
/// read the registry but must not mutate it.
pub trait ServiceListener: Send + Sync {
	/// Called once at subscription with the currently matching entries, in priority order.
	fn opened(&self, _initial: &[Arc<ServiceEntry>]) {}

	fn service_changed(&self, event: &ServiceEvent);
}

#[derive(Default, Clone)]
struct Snapshot {
	entries: BTreeMap<ServiceId, Arc<ServiceEntry>>,
}

struct ListenerSlot {
	id: u64,
	interest: Interest,
	listener: Arc<dyn ServiceListener>,
	active: AtomicBool,
}

struct RegistryInner {
	snapshot: ArcSwap<Snapshot>,
	dispatch: Mutex<()>,
	listeners: Mutex<Vec<Arc<ListenerSlot>>>,
	next_service: AtomicU64,
	next_listener: AtomicU64,
}

/// Cloneable handle to one shared registry.
#[derive(Clone)]
pub struct ServiceRegistry {
	inner: Arc<RegistryInner>,
}

impl Default for ServiceRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for ServiceRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ServiceRegistry")
			.field("services", &self.len())
			.field("listeners", &self.inner.listeners.lock().len())
			.finish()
	}
}

impl ServiceRegistry {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(RegistryInner {
				snapshot: ArcSwap::from_pointee(Snapshot::default()),
				dispatch: Mutex::new(()),
				listeners: Mutex::new(Vec::new()),
				next_service: AtomicU64::new(1),
				next_listener: AtomicU64::new(1),
			}),
		}
	}

	/// Publishes `object` under `interfaces`.
	///
	/// `service.id` and `objectClass` are set by the registry and override any value in `props`.
	pub fn publish<I, S>(&self, interfaces: I, props: Properties, object: ServiceObject) -> Result<ServiceRegistration, RegistryError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let interfaces: Arc<[String]> = interfaces.into_iter().map(Into::into).collect();
		if interfaces.is_empty() {
			return Err(RegistryError::NoInterfaces);
		}

		let _dispatch = self.inner.dispatch.lock();
		let id = ServiceId::new(self.inner.next_service.fetch_add(1, Ordering::AcqRel));
		let entry = Arc::new(build_entry(id, interfaces, props, 0, object));
		self.store(|snap| {
			snap.entries.insert(id, Arc::clone(&entry));
		});
		tracing::debug!(service = %id, interfaces = ?entry.interfaces(), ranking = entry.ranking(), "registry.publish");
		self.notify(ServiceEventKind::Published, entry);

		Ok(ServiceRegistration {
			id,
			registry: Arc::downgrade(&self.inner),
		})
	}

	/// Replaces the properties of a published service.
	pub fn update_properties(&self, id: ServiceId, props: Properties) -> Result<Arc<ServiceEntry>, RegistryError> {
		self.modify(id, |_| props)
	}

	/// Sets `service.ranking` on a published service, keeping its other properties.
	pub fn set_ranking(&self, id: ServiceId, ranking: i32) -> Result<Arc<ServiceEntry>, RegistryError> {
		self.modify(id, |current| {
			let mut props = current.clone();
			props.insert(SERVICE_RANKING.to_string(), PropValue::Int(ranking.into()));
			props
		})
	}

	fn modify(&self, id: ServiceId, next: impl FnOnce(&Properties) -> Properties) -> Result<Arc<ServiceEntry>, RegistryError> {
		let _dispatch = self.inner.dispatch.lock();
		let Some(current) = self.entry(id) else {
			return Err(RegistryError::UnknownService(id));
		};
		let entry = Arc::new(build_entry(
			id,
			Arc::clone(&current.interfaces),
			next(&current.properties),
			current.generation + 1,
			current.object.clone(),
		));
		self.store(|snap| {
			snap.entries.insert(id, Arc::clone(&entry));
		});
		tracing::debug!(service = %id, generation = entry.generation(), ranking = entry.ranking(), "registry.modify");
		self.notify(ServiceEventKind::Modified, Arc::clone(&entry));
		Ok(entry)
	}

	/// Removes a published service and notifies listeners.
	pub fn withdraw(&self, id: ServiceId) -> Result<Arc<ServiceEntry>, RegistryError> {
		let _dispatch = self.inner.dispatch.lock();
		let Some(entry) = self.entry(id) else {
			return Err(RegistryError::UnknownService(id));
		};
		self.store(|snap| {
			snap.entries.remove(&id);
		});
		tracing::debug!(service = %id, "registry.withdraw");
		self.notify(ServiceEventKind::Withdrawn, Arc::clone(&entry));
		Ok(entry)
	}

	/// Registers `listener` for changes matching `interest`.
	pub fn subscribe(&self, interest: Interest, listener: Arc<dyn ServiceListener>) -> Subscription {
		let _dispatch = self.inner.dispatch.lock();
		let slot = Arc::new(ListenerSlot {
			id: self.inner.next_listener.fetch_add(1, Ordering::AcqRel),
			interest,
			listener,
			active: AtomicBool::new(true),
		});
		let initial = self.entries(&slot.interest);
		slot.listener.opened(&initial);
		self.inner.listeners.lock().push(Arc::clone(&slot));
		tracing::trace!(listener = slot.id, interest = %slot.interest, initial = initial.len(), "registry.subscribe");
		Subscription {
			slot,
			registry: Arc::downgrade(&self.inner),
		}
	}

	pub fn entry(&self, id: ServiceId) -> Option<Arc<ServiceEntry>> {
		self.inner.snapshot.load().entries.get(&id).cloned()
	}

	/// Entries matching `interest`, highest priority first.
	pub fn entries(&self, interest: &Interest) -> Vec<Arc<ServiceEntry>> {
		let snapshot = self.inner.snapshot.load();
		let mut entries: Vec<_> = snapshot.entries.values().filter(|e| interest.matches(e)).cloned().collect();
		entries.sort_by(|a, b| cmp_priority(a, b));
		entries
	}

	/// Obtains the service object, asking the factory for lazily created services.
	///
	/// May block while a factory produces its object. `None` when the service is gone or
	/// its factory declined.
	pub fn get_service(&self, id: ServiceId) -> Option<ServiceLease> {
		let entry = self.entry(id)?;
		match entry.object().clone() {
			ServiceObject::Shared(instance) => Some(ServiceLease::new(entry, instance, None)),
			ServiceObject::Factory(factory) => {
				let instance = factory.get_service(&entry)?;
				Some(ServiceLease::new(entry, instance, Some(factory)))
			}
		}
	}

	pub fn len(&self) -> usize {
		self.inner.snapshot.load().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn store(&self, mutate: impl FnOnce(&mut Snapshot)) {
		let mut next = Snapshot::clone(&self.inner.snapshot.load());
		mutate(&mut next);
		self.inner.snapshot.store(Arc::new(next));
	}

	fn notify(&self, kind: ServiceEventKind, entry: Arc<ServiceEntry>) {
		let slots = self.inner.listeners.lock().clone();
		let event = ServiceEvent { kind, entry };
		for slot in slots {
			if !slot.active.load(Ordering::Acquire) || !slot.interest.matches(&event.entry) {
				continue;
			}
			if catch_unwind(AssertUnwindSafe(|| slot.listener.service_changed(&event))).is_err() {
				tracing::error!(listener = slot.id, service = %event.entry.id(), "registry.listener.panic");
			}
		}
	}
}

fn build_entry(id: ServiceId, interfaces: Arc<[String]>, mut props: Properties, generation: u64, object: ServiceObject) -> ServiceEntry {
	props.insert(SERVICE_ID.to_string(), PropValue::from(id.get()));
	props.insert(
		OBJECT_CLASS.to_string(),
		PropValue::List(interfaces.iter().map(|i| PropValue::Str(i.clone())).collect()),
	);
	ServiceEntry {
		id,
		ranking: ranking_of(&props),
		interfaces,
		properties: Arc::new(props),
		generation,
		object,
	}
}

/// Publisher-side handle to a published service.
#[derive(Debug, Clone)]
pub struct ServiceRegistration {
	id: ServiceId,
	registry: Weak<RegistryInner>,
}

impl ServiceRegistration {
	pub fn id(&self) -> ServiceId {
		self.id
	}

	fn registry(&self) -> Result<ServiceRegistry, RegistryError> {
		self.registry.upgrade().map(|inner| ServiceRegistry { inner }).ok_or(RegistryError::Closed)
	}

	pub fn set_properties(&self, props: Properties) -> Result<(), RegistryError> {
		self.registry()?.update_properties(self.id, props).map(drop)
	}

	pub fn withdraw(self) -> Result<(), RegistryError> {
		self.registry()?.withdraw(self.id).map(drop)
	}
}

impl std::fmt::Debug for RegistryInner {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("RegistryInner")
	}
}

/// Live listener registration. Dropping it unsubscribes.
pub struct Subscription {
	slot: Arc<ListenerSlot>,
	registry: Weak<RegistryInner>,
}

impl Subscription {
	/// Stops notifications. Safe to call from inside a listener callback.
	pub fn cancel(&self) {
		if !self.slot.active.swap(false, Ordering::AcqRel) {
			return;
		}
		if let Some(inner) = self.registry.upgrade() {
			inner.listeners.lock().retain(|slot| slot.id != self.slot.id);
		}
		tracing::trace!(listener = self.slot.id, "registry.unsubscribe");
	}

	pub fn is_active(&self) -> bool {
		self.slot.active.load(Ordering::Acquire)
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.cancel();
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("listener", &self.slot.id)
			.field("interest", &self.slot.interest)
			.field("active", &self.is_active())
			.finish()
	}
}

#[cfg(test)]
mod tests;
