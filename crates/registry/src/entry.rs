use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::{PropValue, Properties};

/// Registry-assigned service identifier. Monotonic and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ServiceId(u64);

impl ServiceId {
	pub const fn new(raw: u64) -> Self {
		Self(raw)
	}

	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for ServiceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Object handed to consumers of a service.
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

/// Produces service objects on demand, for services whose object is created lazily.
///
/// `get_service` may block (a lazily activated component runs its activation
/// first) and may return `None` when no object can be produced.
pub trait ServiceFactory: Send + Sync {
	fn get_service(&self, entry: &ServiceEntry) -> Option<ServiceInstance>;

	fn unget_service(&self, entry: &ServiceEntry, instance: &ServiceInstance);
}

/// Backing object of a published service.
#[derive(Clone)]
pub enum ServiceObject {
	Shared(ServiceInstance),
	Factory(Arc<dyn ServiceFactory>),
}

impl ServiceObject {
	pub fn shared<T: Any + Send + Sync>(value: T) -> Self {
		Self::Shared(Arc::new(value))
	}
}

impl fmt::Debug for ServiceObject {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Shared(_) => f.write_str("Shared(..)"),
			Self::Factory(_) => f.write_str("Factory(..)"),
		}
	}
}

/// Immutable snapshot of one published service.
///
/// Property updates produce a new snapshot with the same id and a higher
/// generation; holders of an older snapshot keep a consistent view.
#[derive(Debug, Clone)]
pub struct ServiceEntry {
	pub(crate) id: ServiceId,
	pub(crate) interfaces: Arc<[String]>,
	pub(crate) properties: Arc<Properties>,
	pub(crate) ranking: i32,
	pub(crate) generation: u64,
	pub(crate) object: ServiceObject,
}

impl ServiceEntry {
	pub fn id(&self) -> ServiceId {
		self.id
	}

	pub fn interfaces(&self) -> &[String] {
		&self.interfaces
	}

	pub fn provides(&self, interface: &str) -> bool {
		self.interfaces.iter().any(|i| i == interface)
	}

	pub fn properties(&self) -> &Arc<Properties> {
		&self.properties
	}

	pub fn property(&self, key: &str) -> Option<&PropValue> {
		self.properties.get(key)
	}

	pub fn ranking(&self) -> i32 {
		self.ranking
	}

	/// Number of property updates applied since publication.
	pub fn generation(&self) -> u64 {
		self.generation
	}

	pub fn object(&self) -> &ServiceObject {
		&self.object
	}
}

/// Binding priority: higher ranking first, then lower (older) id.
pub fn cmp_priority(a: &ServiceEntry, b: &ServiceEntry) -> Ordering {
	b.ranking.cmp(&a.ranking).then_with(|| a.id.cmp(&b.id))
}

/// Which services a subscriber wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Interest {
	Interface(Arc<str>),
	/// Every service, regardless of interface.
	Any,
}

impl Interest {
	/// `*` selects every service.
	pub fn for_interface(interface: &str) -> Self {
		if interface == "*" { Self::Any } else { Self::Interface(interface.into()) }
	}

	pub fn matches(&self, entry: &ServiceEntry) -> bool {
		match self {
			Self::Interface(name) => entry.provides(name),
			Self::Any => true,
		}
	}
}

impl fmt::Display for Interest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Interface(name) => f.write_str(name),
			Self::Any => f.write_str("*"),
		}
	}
}
