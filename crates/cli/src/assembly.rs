//! Assembly files.
//!
//! An assembly is a TOML document naming the components to register, the
//! services and configuration present at start, and an ordered script of steps
//! to replay against the runtime:
//!
//! ```toml
//! [[component]]
//! name = "console"
//! reference = [{ name = "log", interface = "api.Log", bind = "bind_log" }]
//!
//! [[service]]
//! key = "file"
//! interfaces = ["api.Log"]
//! properties = { level = 1 }
//!
//! [[step]]
//! action = "withdraw"
//! key = "file"
//! ```

use std::fmt;
use std::path::Path;

use anyhow::Context;
use keel_registry::Properties;
use keel_scr::ComponentDescriptor;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Assembly {
	#[serde(default, rename = "component")]
	pub components: Vec<ComponentDescriptor>,
	#[serde(default, rename = "service")]
	pub services: Vec<ServiceSpec>,
	#[serde(default, rename = "configuration")]
	pub configurations: Vec<ConfigurationSpec>,
	#[serde(default, rename = "step")]
	pub steps: Vec<Step>,
}

/// A service published by the assembly, addressed by `key` in later steps.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSpec {
	pub key: String,
	pub interfaces: Vec<String>,
	#[serde(default)]
	pub properties: Properties,
}

/// Configuration data for `pid`, or for one instance of factory `pid`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigurationSpec {
	pub pid: String,
	#[serde(default)]
	pub instance: Option<String>,
	#[serde(default)]
	pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
	Publish {
		key: String,
		interfaces: Vec<String>,
		#[serde(default)]
		properties: Properties,
	},
	Withdraw {
		key: String,
	},
	SetProperties {
		key: String,
		properties: Properties,
	},
	Configure {
		pid: String,
		#[serde(default)]
		instance: Option<String>,
		#[serde(default)]
		properties: Properties,
	},
	DeleteConfiguration {
		pid: String,
		#[serde(default)]
		instance: Option<String>,
	},
	Enable {
		component: String,
	},
	Disable {
		component: String,
	},
	/// Obtains and holds the service of `component`.
	Get {
		component: String,
	},
	/// Drops every service object held for `component`.
	Release {
		component: String,
	},
	Status,
}

impl fmt::Display for Step {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let pid = |pid: &str, instance: &Option<String>| match instance {
			Some(instance) => format!("{pid}~{instance}"),
			None => pid.to_string(),
		};
		match self {
			Self::Publish { key, interfaces, .. } => write!(f, "publish {key} as {}", interfaces.join(", ")),
			Self::Withdraw { key } => write!(f, "withdraw {key}"),
			Self::SetProperties { key, .. } => write!(f, "set properties of {key}"),
			Self::Configure { pid: p, instance, .. } => write!(f, "configure {}", pid(p, instance)),
			Self::DeleteConfiguration { pid: p, instance } => write!(f, "delete configuration {}", pid(p, instance)),
			Self::Enable { component } => write!(f, "enable {component}"),
			Self::Disable { component } => write!(f, "disable {component}"),
			Self::Get { component } => write!(f, "get service of {component}"),
			Self::Release { component } => write!(f, "release service of {component}"),
			Self::Status => f.write_str("status"),
		}
	}
}

impl Assembly {
	pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
		Ok(toml::from_str(input)?)
	}

	pub fn load(path: &Path) -> anyhow::Result<Self> {
		let input = std::fs::read_to_string(path).with_context(|| format!("reading assembly {}", path.display()))?;
		Self::from_toml_str(&input).with_context(|| format!("parsing assembly {}", path.display()))
	}
}
