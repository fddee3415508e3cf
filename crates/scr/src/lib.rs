//! Declarative service component runtime.
//!
//! Components are declared with a [`ComponentDescriptor`] and implemented by a
//! [`ComponentClass`]. The [`ServiceComponentRuntime`] tracks each declared
//! reference against a shared [`keel_registry::ServiceRegistry`], decides when a
//! component configuration may activate, binds and rebinds its dependencies
//! according to the reference policy, and publishes the component's own service.
//!
//! Every configuration runs on its own actor: registry events and configuration
//! changes are queued there and applied one at a time, so component code never
//! sees two lifecycle callbacks at once.

mod activation;
mod actor;
mod class;
mod component;
mod config;
mod context;
mod dto;
mod error;
mod holder;
mod inspect;
mod metadata;
mod policy;
mod reference;
mod runtime;
mod state;

pub use class::ComponentClass;
pub use component::ConfigurationHandle;
pub use config::{ConfigError, ScrConfig};
pub use context::{BoundService, ComponentContext, DeactivationReason, FieldValue, InitArgs};
pub use dto::{
	ComponentConfigurationDto, ComponentDescriptionDto, ReferenceDto, SatisfiedReferenceDto, ServiceReferenceDto, UnsatisfiedReferenceDto,
};
pub use error::{ComponentError, ScrError};
pub use inspect::{ComponentStatus, render_text};
pub use metadata::{Cardinality, ComponentDescriptor, ConfigurationPolicy, PolicyOption, ReferenceMetadata, ReferencePolicy};
pub use runtime::ServiceComponentRuntime;
pub use state::ComponentState;
