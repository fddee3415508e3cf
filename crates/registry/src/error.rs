use crate::ServiceId;

/// Registry mutation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
	#[error("service {0} is not registered")]
	UnknownService(ServiceId),

	#[error("a service must be published under at least one interface")]
	NoInterfaces,

	#[error("the registry has been dropped")]
	Closed,
}
