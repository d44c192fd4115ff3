use core::ffi::c_int;
use std::collections::VecDeque;

use crate::Value;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::statement::Statement;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum FirstStep {
	/// The classifying step produced a row that has not been read yet.
	Row,
	/// The classifying step already reported completion.
	Done,
	Consumed,
}

/// A read-only statement waiting in a reader's queue.
#[derive(Debug)]
pub(crate) struct PendingStatement<'conn> {
	stmt: Statement<'conn>,
	first_step: FirstStep,
}

impl<'conn> PendingStatement<'conn> {
	pub(crate) const fn new(stmt: Statement<'conn>, has_row: bool) -> Self {
		let first_step = if has_row { FirstStep::Row } else { FirstStep::Done };
		Self { stmt, first_step }
	}

	fn advance(&mut self, policy: RetryPolicy) -> Result<bool> {
		match std::mem::replace(&mut self.first_step, FirstStep::Consumed) {
			FirstStep::Row => Ok(true),
			FirstStep::Done => Ok(false),
			FirstStep::Consumed => self.stmt.step(policy),
		}
	}
}

/// Forward-only rows of every read-only statement in a batch, in batch order.
///
/// Statements are finalized as soon as they run out of rows; dropping the
/// reader finalizes whatever is left.
#[derive(Debug)]
pub struct DataReader<'conn> {
	queue: VecDeque<PendingStatement<'conn>>,
	on_row: bool,
	records_affected: i64,
	policy: RetryPolicy,
}

impl<'conn> DataReader<'conn> {
	pub(crate) const fn new(
		queue: VecDeque<PendingStatement<'conn>>,
		records_affected: i64,
		policy: RetryPolicy,
	) -> Self {
		Self { queue, on_row: false, records_affected, policy }
	}

	/// Moves to the next row. Returns `false` once every statement is exhausted.
	pub fn read(&mut self) -> Result<bool> {
		self.on_row = false;

		while let Some(front) = self.queue.front_mut() {
			match front.advance(self.policy) {
				Ok(true) => {
					self.on_row = true;
					return Ok(true);
				}
				Ok(false) => {
					self.queue.pop_front();
					tracing::trace!(remaining = self.queue.len(), "statement exhausted");
				}
				Err(err) => {
					self.queue.clear();
					return Err(err);
				}
			}
		}

		Ok(false)
	}

	/// Rows changed by the mutating statements of the batch, or -1 if there were none.
	pub const fn records_affected(&self) -> i64 {
		self.records_affected
	}

	/// Whether statements remain that may still produce rows.
	pub fn has_pending_statements(&self) -> bool {
		!self.queue.is_empty()
	}

	pub fn column_count(&self) -> usize {
		self.queue.front().map_or(0, |pending| pending.stmt.column_count())
	}

	pub fn column_name(&self, index: usize) -> Option<String> {
		let index = c_int::try_from(index).ok()?;
		if usize::try_from(index).ok()? >= self.column_count() {
			return None;
		}
		self.queue.front()?.stmt.column_name(index)
	}

	pub fn value(&self, index: usize) -> Result<Value> {
		let stmt = self.current()?;
		if index >= stmt.column_count() {
			return Err(Error::misuse(format!(
				"column index {index} is out of range for {} columns",
				stmt.column_count()
			)));
		}
		let index = c_int::try_from(index).map_err(|_| Error::misuse("column index did not fit in c_int"))?;
		Ok(stmt.column_value(index))
	}

	pub fn values(&self) -> Result<Vec<Value>> {
		Ok(self.current()?.row_values())
	}

	/// Finalizes every remaining statement and returns [`Self::records_affected`].
	pub fn close(self) -> i64 {
		self.records_affected
	}

	fn current(&self) -> Result<&Statement<'conn>> {
		match self.queue.front() {
			Some(pending) if self.on_row => Ok(&pending.stmt),
			_ => Err(Error::misuse("no current row; call read() first")),
		}
	}
}

impl Iterator for DataReader<'_> {
	type Item = Result<Vec<Value>>;

	fn next(&mut self) -> Option<Self::Item> {
		match self.read() {
			Ok(true) => Some(self.values()),
			Ok(false) => None,
			Err(err) => Some(Err(err)),
		}
	}
}
