//! Shared in-process service registry.
//!
//! Services are published under one or more interface names with a property map.
//! Every mutation is fanned out synchronously, on the mutating thread, to the
//! listeners whose [`Interest`] matches. Component runtimes build their dependency
//! tracking on top of that guarantee.

mod entry;
mod error;
pub mod filter;
mod index;
mod lease;
mod props;

pub use entry::{Interest, ServiceEntry, ServiceFactory, ServiceId, ServiceInstance, ServiceObject, cmp_priority};
pub use error::RegistryError;
pub use filter::{FilterError, FilterEvaluator, LdapEvaluator, LdapFilter, TargetFilter};
pub use index::{ServiceEvent, ServiceEventKind, ServiceListener, ServiceRegistration, ServiceRegistry, Subscription};
pub use lease::ServiceLease;
pub use props::{OBJECT_CLASS, PropValue, Properties, SERVICE_ID, SERVICE_RANKING, ranking_of};
