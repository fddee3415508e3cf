//! Component classes.
//!
//! A [`ComponentClass`] is the code side of a component: a constructor plus named
//! callbacks. Descriptors refer to callbacks by name; at registration the names are
//! resolved once into a [`ResolvedClass`] dispatch table. A name the class does
//! not provide is logged and that binding point is skipped from then on.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use keel_registry::ServiceInstance;

use crate::{BoundService, ComponentContext, ComponentDescriptor, ComponentError, DeactivationReason, FieldValue, InitArgs, ScrError};

pub(crate) type Instance = Box<dyn Any + Send>;

type ConstructFn = Arc<dyn Fn(&ComponentContext, &InitArgs) -> Result<Instance, ComponentError> + Send + Sync>;
pub(crate) type LifecycleFn = Arc<dyn Fn(&mut (dyn Any + Send), &ComponentContext) -> Result<(), ComponentError> + Send + Sync>;
pub(crate) type DeactivateFn = Arc<dyn Fn(&mut (dyn Any + Send), &ComponentContext, DeactivationReason) + Send + Sync>;
pub(crate) type BindFn = Arc<dyn Fn(&mut (dyn Any + Send), &BoundService) -> Result<(), ComponentError> + Send + Sync>;
pub(crate) type FieldFn = Arc<dyn Fn(&mut (dyn Any + Send), FieldValue) + Send + Sync>;
pub(crate) type ProvideFn = Arc<dyn Fn(&(dyn Any + Send)) -> ServiceInstance + Send + Sync>;

fn typed_mut<C: 'static>(instance: &mut (dyn Any + Send)) -> Result<&mut C, ComponentError> {
	instance
		.downcast_mut::<C>()
		.ok_or_else(|| ComponentError::new("component instance has an unexpected type"))
}

/// Typed builder for a component implementation.
///
/// ```ignore
/// ComponentClass::<Consumer>::new("consumer")
///     .constructor(0, |_ctx, _args| Ok(Consumer::default()))
///     .activate("activate", |c, ctx| c.start(ctx))
///     .method("bind_log", |c, svc| { c.logs.push(svc.id()); Ok(()) })
///     .provides(|c| Arc::new(c.handle()));
/// ```
pub struct ComponentClass<C> {
	name: String,
	constructor: Option<(usize, ConstructFn)>,
	callbacks: HashMap<String, LifecycleFn>,
	deactivators: HashMap<String, DeactivateFn>,
	methods: HashMap<String, BindFn>,
	fields: HashMap<String, FieldFn>,
	provider: Option<ProvideFn>,
	_marker: PhantomData<fn() -> C>,
}

impl<C: Send + 'static> ComponentClass<C> {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			constructor: None,
			callbacks: HashMap::new(),
			deactivators: HashMap::new(),
			methods: HashMap::new(),
			fields: HashMap::new(),
			provider: None,
			_marker: PhantomData,
		}
	}

	/// Class whose instances come from `C::default()`.
	pub fn with_default(name: impl Into<String>) -> Self
	where
		C: Default,
	{
		Self::new(name).constructor(0, |_, _| Ok(C::default()))
	}

	/// Sets the constructor taking `params` constructor-bound references.
	pub fn constructor<F>(mut self, params: usize, f: F) -> Self
	where
		F: Fn(&ComponentContext, &InitArgs) -> Result<C, ComponentError> + Send + Sync + 'static,
	{
		let construct: ConstructFn = Arc::new(move |ctx: &ComponentContext, args: &InitArgs| f(ctx, args).map(|c| Box::new(c) as Instance));
		self.constructor = Some((params, construct));
		self
	}

	/// Registers an activate or modified callback under `name`.
	pub fn activate<F>(mut self, name: impl Into<String>, f: F) -> Self
	where
		F: Fn(&mut C, &ComponentContext) -> Result<(), ComponentError> + Send + Sync + 'static,
	{
		self.callbacks.insert(name.into(), Arc::new(move |instance: &mut (dyn Any + Send), ctx: &ComponentContext| f(typed_mut::<C>(instance)?, ctx)));
		self
	}

	/// Alias of [`activate`](Self::activate) for readability at modified callbacks.
	pub fn modified<F>(self, name: impl Into<String>, f: F) -> Self
	where
		F: Fn(&mut C, &ComponentContext) -> Result<(), ComponentError> + Send + Sync + 'static,
	{
		self.activate(name, f)
	}

	pub fn deactivate<F>(mut self, name: impl Into<String>, f: F) -> Self
	where
		F: Fn(&mut C, &ComponentContext, DeactivationReason) + Send + Sync + 'static,
	{
		self.deactivators.insert(
			name.into(),
			Arc::new(move |instance: &mut (dyn Any + Send), ctx: &ComponentContext, reason: DeactivationReason| match instance.downcast_mut::<C>() {
				Some(c) => f(c, ctx, reason),
				None => tracing::error!(callback = "deactivate", "scr.class.type_mismatch"),
			}),
		);
		self
	}

	/// Registers a bind, unbind or updated method under `name`.
	pub fn method<F>(mut self, name: impl Into<String>, f: F) -> Self
	where
		F: Fn(&mut C, &BoundService) -> Result<(), ComponentError> + Send + Sync + 'static,
	{
		self.methods.insert(name.into(), Arc::new(move |instance: &mut (dyn Any + Send), service: &BoundService| f(typed_mut::<C>(instance)?, service)));
		self
	}

	/// Registers a field binding point under `name`.
	pub fn field<F>(mut self, name: impl Into<String>, f: F) -> Self
	where
		F: Fn(&mut C, FieldValue) + Send + Sync + 'static,
	{
		self.fields.insert(
			name.into(),
			Arc::new(move |instance: &mut (dyn Any + Send), value: FieldValue| match instance.downcast_mut::<C>() {
				Some(c) => f(c, value),
				None => tracing::error!(callback = "field", "scr.class.type_mismatch"),
			}),
		);
		self
	}

	/// Object published as the component's service.
	pub fn provides<F>(mut self, f: F) -> Self
	where
		F: Fn(&C) -> ServiceInstance + Send + Sync + 'static,
	{
		self.provider = Some(Arc::new(move |instance: &(dyn Any + Send)| match instance.downcast_ref::<C>() {
			Some(c) => f(c),
			None => Arc::new(()) as ServiceInstance,
		}));
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}
}

/// Callbacks for one reference, resolved by name.
#[derive(Default, Clone)]
pub(crate) struct ReferenceHandlers {
	pub bind: Option<BindFn>,
	pub unbind: Option<BindFn>,
	pub updated: Option<BindFn>,
	pub field: Option<FieldFn>,
}

/// Dispatch table produced at registration.
pub(crate) struct ResolvedClass {
	pub params: usize,
	pub construct: ConstructFn,
	pub activate: Option<LifecycleFn>,
	pub deactivate: Option<DeactivateFn>,
	pub modified: Option<LifecycleFn>,
	pub provider: Option<ProvideFn>,
	pub references: Vec<ReferenceHandlers>,
}

impl ResolvedClass {
	pub(crate) fn resolve<C: Send + 'static>(descriptor: &ComponentDescriptor, class: ComponentClass<C>) -> Result<Self, ScrError> {
		let mismatch = |reason: String| ScrError::ClassMismatch {
			component: descriptor.name.clone(),
			class: class.name.clone(),
			reason,
		};

		let Some((params, construct)) = class.constructor.clone() else {
			return Err(mismatch("class has no constructor".to_string()));
		};
		if params != descriptor.init {
			return Err(mismatch(format!(
				"constructor takes {params} parameters but the descriptor declares init = {}",
				descriptor.init
			)));
		}
		if descriptor.has_service() && class.provider.is_none() {
			return Err(mismatch("component provides a service but the class has no provider".to_string()));
		}

		let component = descriptor.name.as_str();
		let lookup = |table: &HashMap<String, LifecycleFn>, explicit: Option<&String>, fallback: &str, point: &'static str| match explicit {
			Some(name) => resolve_named(component, table, name, point),
			None => table.get(fallback).cloned(),
		};
		let activate = lookup(&class.callbacks, descriptor.activate.as_ref(), "activate", "activate");
		let modified = descriptor
			.modified
			.as_ref()
			.and_then(|name| resolve_named(component, &class.callbacks, name, "modified"));
		let deactivate = match &descriptor.deactivate {
			Some(name) => resolve_named(component, &class.deactivators, name, "deactivate"),
			None => class.deactivators.get("deactivate").cloned(),
		};

		let references = descriptor
			.references
			.iter()
			.map(|reference| ReferenceHandlers {
				bind: reference
					.bind
					.as_ref()
					.and_then(|name| resolve_named(component, &class.methods, name, "bind")),
				unbind: reference
					.unbind
					.as_ref()
					.and_then(|name| resolve_named(component, &class.methods, name, "unbind")),
				updated: reference
					.updated
					.as_ref()
					.and_then(|name| resolve_named(component, &class.methods, name, "updated")),
				field: reference
					.field
					.as_ref()
					.and_then(|name| resolve_named(component, &class.fields, name, "field")),
			})
			.collect();

		Ok(Self {
			params,
			construct,
			activate,
			deactivate,
			modified,
			provider: class.provider,
			references,
		})
	}
}

fn resolve_named<T: Clone>(component: &str, table: &HashMap<String, T>, name: &str, point: &'static str) -> Option<T> {
	let found = table.get(name).cloned();
	if found.is_none() {
		tracing::error!(component, point, name, "scr.class.unresolved");
	}
	found
}
