use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::{ServiceEntry, ServiceFactory, ServiceInstance};

/// A consumer's hold on a service object.
///
/// Objects obtained from a factory are returned to it when the lease is released or
/// dropped. Releasing twice is impossible by construction.
pub struct ServiceLease {
	entry: Arc<ServiceEntry>,
	instance: ServiceInstance,
	factory: Option<Arc<dyn ServiceFactory>>,
}

impl ServiceLease {
	pub(crate) fn new(entry: Arc<ServiceEntry>, instance: ServiceInstance, factory: Option<Arc<dyn ServiceFactory>>) -> Self {
		Self { entry, instance, factory }
	}

	pub fn entry(&self) -> &Arc<ServiceEntry> {
		&self.entry
	}

	pub fn instance(&self) -> &ServiceInstance {
		&self.instance
	}

	pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
		Arc::clone(&self.instance).downcast::<T>().ok()
	}

	/// Returns the object to its factory now instead of on drop.
	pub fn release(self) {}
}

impl Drop for ServiceLease {
	fn drop(&mut self) {
		if let Some(factory) = self.factory.take() {
			factory.unget_service(&self.entry, &self.instance);
		}
	}
}

impl fmt::Debug for ServiceLease {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ServiceLease")
			.field("service", &self.entry.id())
			.field("factory", &self.factory.is_some())
			.finish()
	}
}
