use core::ffi::c_int;
use std::collections::BTreeSet;

use crate::Value;
use crate::error::{Error, Result};
use crate::statement::Statement;

/// Where a parameter value goes: a named placeholder or a 1-based position.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum ParameterKey {
	Name(String),
	Ordinal(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
	pub key: ParameterKey,
	pub value: Value,
}

/// Values supplied for a command. Every statement in a batch sees the same set;
/// entries that match no placeholder of a statement are ignored for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
	items: Vec<Parameter>,
}

impl ParameterSet {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a named value. `name` may carry its `:`, `@` or `$` prefix or omit it.
	pub fn add(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
		self.items.push(Parameter { key: ParameterKey::Name(name.into()), value: value.into() });
		self
	}

	/// Adds a value for the next positional placeholder.
	pub fn add_positional(&mut self, value: impl Into<Value>) -> &mut Self {
		let ordinal = self.items.iter().filter(|p| matches!(p.key, ParameterKey::Ordinal(_))).count() + 1;
		self.add_at(ordinal, value)
	}

	pub fn add_at(&mut self, ordinal: usize, value: impl Into<Value>) -> &mut Self {
		self.items.push(Parameter { key: ParameterKey::Ordinal(ordinal), value: value.into() });
		self
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	pub fn clear(&mut self) {
		self.items.clear();
	}

	pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
		self.items.iter()
	}

	/// Binds every matching value and returns the distinct placeholders bound.
	fn bind(&self, stmt: &mut Statement<'_>) -> Result<BTreeSet<c_int>> {
		let expected = stmt.parameter_count();
		let mut bound = BTreeSet::new();

		for parameter in &self.items {
			let index = match &parameter.key {
				ParameterKey::Name(name) => resolve_name(stmt, name)?,
				ParameterKey::Ordinal(0) => {
					return Err(Error::misuse("parameter ordinals start at 1"));
				}
				ParameterKey::Ordinal(ordinal) if *ordinal <= expected => c_int::try_from(*ordinal).ok(),
				ParameterKey::Ordinal(_) => None,
			};

			if let Some(index) = index {
				stmt.bind_value(index, &parameter.value)?;
				bound.insert(index);
			}
		}

		Ok(bound)
	}
}

impl<'a> IntoIterator for &'a ParameterSet {
	type Item = &'a Parameter;
	type IntoIter = std::slice::Iter<'a, Parameter>;

	fn into_iter(self) -> Self::IntoIter {
		self.items.iter()
	}
}

/// Binds `parameters` onto `stmt` and fails when any placeholder is left unbound.
/// Returns the number of placeholders bound.
pub(crate) fn bind_statement(stmt: &mut Statement<'_>, parameters: Option<&ParameterSet>) -> Result<usize> {
	let bound = match parameters {
		Some(parameters) => parameters.bind(stmt)?,
		None => BTreeSet::new(),
	};

	let expected = stmt.parameter_count();
	if bound.len() == expected {
		return Ok(bound.len());
	}

	let missing: Vec<String> = (1..=expected)
		.filter_map(|index| c_int::try_from(index).ok())
		.filter(|index| !bound.contains(index))
		.map(|index| stmt.parameter_name(index).unwrap_or_else(|| format!("?{index}")))
		.collect();

	tracing::debug!(expected, bound = bound.len(), ?missing, "statement has unbound parameters");
	Err(Error::MissingParameters { names: missing.join(", ") })
}

fn resolve_name(stmt: &Statement<'_>, name: &str) -> Result<Option<c_int>> {
	for candidate in binding_name_candidates(name) {
		if let Some(index) = stmt.parameter_index(&candidate)? {
			return Ok(Some(index));
		}
	}
	Ok(None)
}

fn binding_name_candidates(name: &str) -> Vec<String> {
	if name.starts_with(':') || name.starts_with('@') || name.starts_with('$') || name.starts_with('?') {
		vec![name.to_string()]
	} else {
		vec![format!(":{name}"), format!("@{name}"), format!("${name}")]
	}
}
