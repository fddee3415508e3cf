//! Target filters.
//!
//! # Role
//!
//! Components narrow a reference with a target filter string. The runtime only
//! needs "does this property map match", so evaluation sits behind
//! [`FilterEvaluator`] / [`TargetFilter`]. [`LdapEvaluator`] is the stock
//! implementation: RFC 1960 style expressions such as
//! `(&(objectClass=log.Sink)(|(level>=3)(!(name=debug*))))`.
//!
//! # Invariants
//!
//! - Attribute names match case-insensitively; an exact-case key wins.
//! - A value is compared using the type of the property, not the filter text:
//!   integers and floats numerically, booleans by `true`/`false`, strings
//!   lexically. A filter value that does not parse as that type never matches.
//! - List properties match when any element matches.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::{PropValue, Properties};

/// Filter parse error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid filter {filter:?} at offset {offset}: {reason}")]
pub struct FilterError {
	pub filter: String,
	pub offset: usize,
	pub reason: &'static str,
}

/// Compiled predicate over service properties.
pub trait TargetFilter: fmt::Debug + Send + Sync {
	fn matches(&self, props: &Properties) -> bool;

	/// Source text the filter was compiled from.
	fn as_str(&self) -> &str;
}

/// Compiles filter strings into [`TargetFilter`]s.
pub trait FilterEvaluator: Send + Sync {
	fn parse(&self, expr: &str) -> Result<Arc<dyn TargetFilter>, FilterError>;
}

/// LDAP-style filter compiler.
#[derive(Debug, Default, Clone, Copy)]
pub struct LdapEvaluator;

impl FilterEvaluator for LdapEvaluator {
	fn parse(&self, expr: &str) -> Result<Arc<dyn TargetFilter>, FilterError> {
		Ok(Arc::new(LdapFilter::parse(expr)?))
	}
}

/// Parsed LDAP-style filter.
#[derive(Debug, Clone, PartialEq)]
pub struct LdapFilter {
	text: Arc<str>,
	root: Node,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
	And(Vec<Node>),
	Or(Vec<Node>),
	Not(Box<Node>),
	Compare { attr: String, op: Op, value: String },
	Present(String),
	Substring { attr: String, parts: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
	Equal,
	Approx,
	GreaterEq,
	LessEq,
}

impl LdapFilter {
	pub fn parse(expr: &str) -> Result<Self, FilterError> {
		let mut parser = Parser {
			src: expr,
			chars: expr.char_indices().collect(),
			pos: 0,
		};
		parser.skip_ws();
		let root = parser.filter()?;
		parser.skip_ws();
		if parser.pos != parser.chars.len() {
			return Err(parser.error("trailing characters after filter"));
		}
		Ok(Self { text: expr.into(), root })
	}

	pub fn matches(&self, props: &Properties) -> bool {
		self.root.matches(props)
	}
}

impl TargetFilter for LdapFilter {
	fn matches(&self, props: &Properties) -> bool {
		LdapFilter::matches(self, props)
	}

	fn as_str(&self) -> &str {
		&self.text
	}
}

impl fmt::Display for LdapFilter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.text)
	}
}

struct Parser<'a> {
	src: &'a str,
	chars: Vec<(usize, char)>,
	pos: usize,
}

impl Parser<'_> {
	fn peek(&self) -> Option<char> {
		self.chars.get(self.pos).map(|(_, c)| *c)
	}

	fn offset(&self) -> usize {
		self.chars.get(self.pos).map_or(self.src.len(), |(i, _)| *i)
	}

	fn error(&self, reason: &'static str) -> FilterError {
		FilterError {
			filter: self.src.to_string(),
			offset: self.offset(),
			reason,
		}
	}

	fn skip_ws(&mut self) {
		while self.peek().is_some_and(char::is_whitespace) {
			self.pos += 1;
		}
	}

	fn expect(&mut self, want: char, reason: &'static str) -> Result<(), FilterError> {
		if self.peek() == Some(want) {
			self.pos += 1;
			Ok(())
		} else {
			Err(self.error(reason))
		}
	}

	fn filter(&mut self) -> Result<Node, FilterError> {
		self.expect('(', "expected '('")?;
		self.skip_ws();
		let node = match self.peek() {
			Some('&') => {
				self.pos += 1;
				Node::And(self.list()?)
			}
			Some('|') => {
				self.pos += 1;
				Node::Or(self.list()?)
			}
			Some('!') => {
				self.pos += 1;
				self.skip_ws();
				Node::Not(Box::new(self.filter()?))
			}
			Some(_) => self.item()?,
			None => return Err(self.error("unexpected end of filter")),
		};
		self.skip_ws();
		self.expect(')', "expected ')'")?;
		Ok(node)
	}

	fn list(&mut self) -> Result<Vec<Node>, FilterError> {
		let mut nodes = Vec::new();
		self.skip_ws();
		while self.peek() == Some('(') {
			nodes.push(self.filter()?);
			self.skip_ws();
		}
		if nodes.is_empty() {
			return Err(self.error("empty filter list"));
		}
		Ok(nodes)
	}

	fn item(&mut self) -> Result<Node, FilterError> {
		let start = self.pos;
		while let Some(c) = self.peek() {
			if matches!(c, '=' | '<' | '>' | '~' | '(' | ')') {
				break;
			}
			self.pos += 1;
		}
		let attr: String = self.chars[start..self.pos].iter().map(|(_, c)| *c).collect();
		let attr = attr.trim().to_string();
		if attr.is_empty() {
			return Err(self.error("missing attribute name"));
		}

		let op = match self.peek() {
			Some('=') => {
				self.pos += 1;
				Op::Equal
			}
			Some(c @ ('~' | '>' | '<')) => {
				self.pos += 1;
				self.expect('=', "expected '=' after comparison operator")?;
				match c {
					'~' => Op::Approx,
					'>' => Op::GreaterEq,
					_ => Op::LessEq,
				}
			}
			_ => return Err(self.error("expected comparison operator")),
		};

		let parts = self.value()?;
		if parts.len() == 1 {
			let value = parts.into_iter().next().unwrap_or_default();
			return Ok(Node::Compare { attr, op, value });
		}
		if op != Op::Equal {
			return Err(self.error("wildcards are only allowed with '='"));
		}
		if parts.len() == 2 && parts.iter().all(String::is_empty) {
			return Ok(Node::Present(attr));
		}
		Ok(Node::Substring { attr, parts })
	}

	/// Reads a value up to the closing paren, split on unescaped `*`.
	fn value(&mut self) -> Result<Vec<String>, FilterError> {
		let mut parts = vec![String::new()];
		loop {
			match self.peek() {
				None => return Err(self.error("unterminated value")),
				Some(')') => return Ok(parts),
				Some('(') => return Err(self.error("unescaped '(' in value")),
				Some('*') => {
					self.pos += 1;
					parts.push(String::new());
				}
				Some('\\') => {
					self.pos += 1;
					let Some(escaped) = self.peek() else {
						return Err(self.error("dangling escape"));
					};
					self.pos += 1;
					if let Some(last) = parts.last_mut() {
						last.push(escaped);
					}
				}
				Some(c) => {
					self.pos += 1;
					if let Some(last) = parts.last_mut() {
						last.push(c);
					}
				}
			}
		}
	}
}

fn lookup<'p>(props: &'p Properties, attr: &str) -> Option<&'p PropValue> {
	props
		.get(attr)
		.or_else(|| props.iter().find(|(key, _)| key.eq_ignore_ascii_case(attr)).map(|(_, value)| value))
}

impl Node {
	fn matches(&self, props: &Properties) -> bool {
		match self {
			Self::And(nodes) => nodes.iter().all(|n| n.matches(props)),
			Self::Or(nodes) => nodes.iter().any(|n| n.matches(props)),
			Self::Not(node) => !node.matches(props),
			Self::Present(attr) => lookup(props, attr).is_some(),
			Self::Compare { attr, op, value } => lookup(props, attr).is_some_and(|prop| compare(*op, prop, value)),
			Self::Substring { attr, parts } => lookup(props, attr).is_some_and(|prop| substring(prop, parts)),
		}
	}
}

fn compare(op: Op, prop: &PropValue, operand: &str) -> bool {
	let ordered = |ord: Option<Ordering>| match (op, ord) {
		(_, None) => false,
		(Op::Equal | Op::Approx, Some(ord)) => ord == Ordering::Equal,
		(Op::GreaterEq, Some(ord)) => ord != Ordering::Less,
		(Op::LessEq, Some(ord)) => ord != Ordering::Greater,
	};
	match prop {
		PropValue::List(items) => items.iter().any(|item| compare(op, item, operand)),
		PropValue::Str(s) if op == Op::Approx => normalize(s) == normalize(operand),
		PropValue::Str(s) => ordered(Some(s.as_str().cmp(operand))),
		PropValue::Int(i) => ordered(operand.trim().parse::<i64>().ok().map(|v| i.cmp(&v))),
		PropValue::Float(x) => ordered(operand.trim().parse::<f64>().ok().and_then(|v| x.partial_cmp(&v))),
		PropValue::Bool(b) => ordered(parse_bool(operand).map(|v| b.cmp(&v))),
	}
}

fn parse_bool(operand: &str) -> Option<bool> {
	let trimmed = operand.trim();
	if trimmed.eq_ignore_ascii_case("true") {
		Some(true)
	} else if trimmed.eq_ignore_ascii_case("false") {
		Some(false)
	} else {
		None
	}
}

fn normalize(s: &str) -> String {
	s.chars().filter(|c| !c.is_whitespace()).flat_map(char::to_lowercase).collect()
}

fn substring(prop: &PropValue, parts: &[String]) -> bool {
	match prop {
		PropValue::List(items) => items.iter().any(|item| substring(item, parts)),
		PropValue::Str(s) => substring_str(s, parts),
		_ => false,
	}
}

fn substring_str(s: &str, parts: &[String]) -> bool {
	let (Some(initial), Some(last)) = (parts.first(), parts.last()) else {
		return false;
	};
	let Some(mut rest) = s.strip_prefix(initial.as_str()) else {
		return false;
	};
	for middle in &parts[1..parts.len() - 1] {
		match rest.find(middle.as_str()) {
			Some(at) => rest = &rest[at + middle.len()..],
			None => return false,
		}
	}
	rest.ends_with(last.as_str())
}
