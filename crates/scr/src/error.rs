use keel_registry::FilterError;

use crate::config::ConfigError;

/// Runtime API errors.
#[derive(Debug, thiserror::Error)]
pub enum ScrError {
	#[error("component {0:?} is already registered")]
	DuplicateComponent(String),

	#[error("component {0:?} is not registered")]
	UnknownComponent(String),

	#[error("invalid descriptor for component {component:?}: {reason}")]
	InvalidDescriptor { component: String, reason: String },

	#[error("invalid target filter on reference {component}.{reference}")]
	InvalidTarget {
		component: String,
		reference: String,
		#[source]
		source: FilterError,
	},

	#[error("class {class:?} cannot implement component {component:?}: {reason}")]
	ClassMismatch { component: String, class: String, reason: String },

	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error("the component runtime has been shut down")]
	ShutDown,
}

impl ScrError {
	pub(crate) fn invalid(component: &str, reason: impl Into<String>) -> Self {
		Self::InvalidDescriptor {
			component: component.to_string(),
			reason: reason.into(),
		}
	}
}

/// Failure reported by component code from a constructor or lifecycle callback.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ComponentError {
	message: String,
	#[source]
	source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ComponentError {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			source: None,
		}
	}

	pub fn with_source(message: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
		Self {
			message: message.into(),
			source: Some(Box::new(source)),
		}
	}
}
