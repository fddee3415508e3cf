/// Execution classes used for worker scheduling and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Serialized component work drained on the blocking pool.
	Actor,
	/// Housekeeping that may wait on actors, such as settling or shutdown.
	Background,
}

impl TaskClass {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Actor => "actor",
			Self::Background => "background",
		}
	}
}
