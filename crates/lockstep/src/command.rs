use std::collections::VecDeque;
use std::time::Duration;

use crate::Value;
use crate::batch::BatchCompiler;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::params::{self, ParameterSet};
use crate::reader::{DataReader, PendingStatement};
use crate::retry::RetryPolicy;
use crate::statement::Statement;

/// SQL text, possibly several statements, to run against a connection.
#[derive(Debug)]
pub struct Command<'conn> {
	conn: &'conn Connection,
	text: String,
	timeout: Duration,
	parameters: Option<ParameterSet>,
}

/// What the classifier did with a statement after its first step.
enum Classified<'conn> {
	Deferred(PendingStatement<'conn>),
	Completed { changes: i64 },
}

impl<'conn> Command<'conn> {
	pub(crate) fn new(conn: &'conn Connection, text: impl Into<String>) -> Self {
		Self { conn, text: text.into(), timeout: Duration::ZERO, parameters: None }
	}

	pub fn text(&self) -> &str {
		&self.text
	}

	pub fn set_text(&mut self, text: impl Into<String>) {
		self.text = text.into();
	}

	/// Longest time a single compile or step may wait on a lock. Zero means no limit.
	pub const fn timeout(&self) -> Duration {
		self.timeout
	}

	pub const fn set_timeout(&mut self, timeout: Duration) {
		self.timeout = timeout;
	}

	#[must_use]
	pub const fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub const fn parameters(&self) -> Option<&ParameterSet> {
		self.parameters.as_ref()
	}

	/// The command's parameters, created empty on first use.
	pub fn parameters_mut(&mut self) -> &mut ParameterSet {
		self.parameters.get_or_insert_with(ParameterSet::new)
	}

	#[must_use]
	pub fn with_parameters(mut self, parameters: ParameterSet) -> Self {
		self.parameters = Some(parameters);
		self
	}

	pub const fn connection(&self) -> &'conn Connection {
		self.conn
	}

	fn retry_policy(&self) -> RetryPolicy {
		RetryPolicy::new(self.timeout, self.conn.options().busy_retries)
	}

	/// Runs the batch. Mutating statements finish before this returns; read-only
	/// statements are left to the reader.
	pub fn execute_reader(&self) -> Result<DataReader<'conn>> {
		if self.text.is_empty() {
			return Err(Error::misuse("execute_reader can only be called when the command text has been set"));
		}

		let policy = self.retry_policy();
		let mut pending = VecDeque::new();
		let mut changes: Option<i64> = None;

		for stmt in BatchCompiler::new(self.conn, &self.text, policy)? {
			let mut stmt = stmt?;
			params::bind_statement(&mut stmt, self.parameters.as_ref())?;

			match classify(stmt, policy)? {
				Classified::Deferred(statement) => pending.push_back(statement),
				Classified::Completed { changes: count } => {
					changes = Some(changes.unwrap_or(0) + count);
				}
			}
		}

		let records_affected = changes.unwrap_or(-1);
		tracing::debug!(deferred = pending.len(), records_affected, "batch executed");
		Ok(DataReader::new(pending, records_affected, policy))
	}

	/// Runs the batch, discards any rows, and returns the aggregate change count.
	pub fn execute_non_query(&self) -> Result<i64> {
		Ok(self.execute_reader()?.close())
	}

	/// First column of the first row, or `None` when the batch produced no rows.
	pub fn execute_scalar(&self) -> Result<Option<Value>> {
		let mut reader = self.execute_reader()?;
		if reader.read()? { reader.value(0).map(Some) } else { Ok(None) }
	}

	/// [`Self::execute_reader`] behind a future. Execution is synchronous; the
	/// returned future is already complete. A flag raised beforehand fails fast.
	#[cfg(feature = "async")]
	pub fn execute_reader_async(
		&self,
		cancelled: &std::sync::atomic::AtomicBool,
	) -> std::future::Ready<Result<DataReader<'conn>>> {
		if cancelled.load(std::sync::atomic::Ordering::Acquire) {
			return std::future::ready(Err(Error::Cancelled));
		}
		std::future::ready(self.execute_reader())
	}
}

/// Takes the first step and sorts the statement into deferred or completed.
///
/// `sqlite3_stmt_readonly` stands in for "returns rows". A read-only statement
/// with side effects would be deferred, which is accepted.
fn classify(mut stmt: Statement<'_>, policy: RetryPolicy) -> Result<Classified<'_>> {
	let conn = stmt.connection();
	let total_before = conn.total_changes();
	let mut has_row = stmt.step(policy)?;

	if stmt.is_read_only() {
		tracing::debug!(sql = ?stmt.sql(), has_row, "deferring read-only statement");
		return Ok(Classified::Deferred(PendingStatement::new(stmt, has_row)));
	}

	while has_row {
		has_row = stmt.step(policy)?;
	}

	// changes() keeps the previous count across DDL, so only trust it when this
	// statement moved the total.
	let changes = if conn.total_changes() == total_before { 0 } else { conn.changes() };
	tracing::debug!(sql = ?stmt.sql(), changes, "completed mutating statement");
	Ok(Classified::Completed { changes })
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ConnectionOptions;

	#[test]
	fn mutating_batch_sums_changes() {
		let db = Connection::open_in_memory().expect("open memory database");
		let command =
			db.create_command("CREATE TABLE a(b); INSERT INTO a VALUES(1); INSERT INTO a VALUES(2);");
		let reader = command.execute_reader().expect("execute batch");
		assert!(!reader.has_pending_statements());
		assert_eq!(reader.records_affected(), 2);
	}

	#[test]
	fn select_yields_rows_and_no_changes() {
		let db = Connection::open_in_memory().expect("open memory database");
		db.execute("CREATE TABLE a(b); INSERT INTO a VALUES(1); INSERT INTO a VALUES(2);")
			.expect("seed table");

		let mut reader = db.create_command("SELECT * FROM a;").execute_reader().expect("execute select");
		let mut rows = Vec::new();
		while reader.read().expect("read row") {
			rows.push(reader.value(0).expect("column value"));
		}
		assert_eq!(rows, vec![Value::Integer(1), Value::Integer(2)]);
		assert_eq!(reader.records_affected(), -1);
	}

	#[test]
	fn ddl_after_dml_does_not_recount() {
		let db = Connection::open_in_memory().expect("open memory database");
		let changes = db
			.execute("create table a(b); insert into a values (1), (2), (3); create table c(d);")
			.expect("execute batch");
		assert_eq!(changes, 3);
	}

	#[test]
	fn ddl_only_batch_reports_zero() {
		let db = Connection::open_in_memory().expect("open memory database");
		assert_eq!(db.execute("create table a(b)").expect("create table"), 0);
	}

	#[test]
	fn whitespace_and_comment_batch_does_nothing() {
		let db = Connection::open_in_memory().expect("open memory database");
		let mut reader =
			db.create_command("  -- nothing here\n /* or here */ ;").execute_reader().expect("execute");
		assert!(!reader.has_pending_statements());
		assert_eq!(reader.records_affected(), -1);
		assert!(!reader.read().expect("read"));
	}

	#[test]
	fn empty_text_is_rejected() {
		let db = Connection::open_in_memory().expect("open memory database");
		let err = db.create_command("").execute_reader().expect_err("empty text");
		assert!(matches!(err, Error::Misuse { .. }));
	}

	#[test]
	fn returning_clause_runs_to_completion() {
		let db = Connection::open_in_memory().expect("open memory database");
		db.execute("create table a(b)").expect("create table");
		let changes = db
			.execute("insert into a values (1), (2), (3) returning b")
			.expect("insert returning");
		assert_eq!(changes, 3);
		assert_eq!(
			db.create_command("select count(*) from a").execute_scalar().expect("count"),
			Some(Value::Integer(3))
		);
	}

	#[test]
	fn mixed_batch_defers_reads_and_completes_writes() {
		let db = Connection::open_in_memory().expect("open memory database");
		let mut reader = db
			.create_command(
				"create table t(x); create table u(y); insert into t values (1); select x from t; insert into u values (2), (3); select count(*) from u;",
			)
			.execute_reader()
			.expect("execute batch");
		assert_eq!(reader.records_affected(), 3);

		let rows: Vec<_> = reader.by_ref().collect::<Result<_>>().expect("read rows");
		assert_eq!(rows, vec![vec![Value::Integer(1)], vec![Value::Integer(2)]]);
	}

	#[test]
	fn parameters_are_bound_per_statement() {
		let db = Connection::open_in_memory().expect("open memory database");
		db.execute("create table kv(k text, v integer)").expect("create table");

		let mut command =
			db.create_command("insert into kv values (:k, :v); select v from kv where k = :k;");
		command.parameters_mut().add("k", "apples").add("v", 12);
		let mut reader = command.execute_reader().expect("execute batch");
		assert_eq!(reader.records_affected(), 1);
		assert!(reader.read().expect("read row"));
		assert_eq!(reader.value(0).expect("value"), Value::Integer(12));
	}

	#[test]
	fn missing_parameter_stops_before_the_statement_runs() {
		let db = Connection::open_in_memory().expect("open memory database");
		db.execute("create table kv(k text, v integer)").expect("create table");

		let mut command = db.create_command("insert into kv values (:k, :v); insert into kv values (:k, 2);");
		command.parameters_mut().add("k", "apples");
		let err = command.execute_non_query().expect_err("missing :v");
		assert_eq!(err.to_string(), "Must add values for the following parameters: :v");

		let count = db.create_command("select count(*) from kv").execute_scalar().expect("count rows");
		assert_eq!(count, Some(Value::Integer(0)));
	}

	#[test]
	fn parameters_are_created_lazily() {
		let db = Connection::open_in_memory().expect("open memory database");
		let mut command = db.create_command("select 1");
		assert!(command.parameters().is_none());
		let _ = command.parameters_mut();
		assert!(command.parameters().is_some_and(ParameterSet::is_empty));
	}

	#[test]
	fn scalar_returns_first_column_or_none() {
		let db = Connection::open_in_memory().expect("open memory database");
		assert_eq!(
			db.create_command("select 42, 43").execute_scalar().expect("scalar"),
			Some(Value::Integer(42))
		);
		assert_eq!(db.create_command("select 1 where 0").execute_scalar().expect("scalar"), None);
	}

	#[test]
	fn compile_error_aborts_whole_batch() {
		let db = Connection::open_in_memory().expect("open memory database");
		let err = db
			.create_command("select 1; select * from missing_table;")
			.execute_reader()
			.expect_err("no such table");
		assert_eq!(err.sqlite_code(), Some(1));
		assert_eq!(err.to_string(), "SQLite Error 1: 'no such table: missing_table'.");
	}

	#[test]
	fn command_builders_round_trip() {
		let db = Connection::open(&ConnectionOptions::default()).expect("open memory database");
		let mut parameters = ParameterSet::new();
		parameters.add_positional(5);
		let mut command = db
			.create_command("select ?")
			.with_timeout(Duration::from_millis(250))
			.with_parameters(parameters);
		assert_eq!(command.timeout(), Duration::from_millis(250));
		command.set_timeout(Duration::ZERO);
		assert_eq!(command.timeout(), Duration::ZERO);
		assert_eq!(command.execute_scalar().expect("scalar"), Some(Value::Integer(5)));

		command.set_text("select ? + 1");
		assert_eq!(command.text(), "select ? + 1");
		assert_eq!(command.execute_scalar().expect("scalar"), Some(Value::Integer(6)));
		assert!(std::ptr::eq(command.connection(), &db));
	}

	#[cfg(feature = "async")]
	#[test]
	fn async_execution_honours_prior_cancellation() {
		use std::future::Future;
		use std::sync::atomic::AtomicBool;
		use std::task::{Context, Poll, Waker};

		let db = Connection::open_in_memory().expect("open memory database");
		let command = db.create_command("select 7");
		let mut cx = Context::from_waker(Waker::noop());

		let cancelled = AtomicBool::new(true);
		let mut future = command.execute_reader_async(&cancelled);
		match std::pin::Pin::new(&mut future).poll(&mut cx) {
			Poll::Ready(Err(Error::Cancelled)) => {}
			other => panic!("expected cancellation, got {:?}", other.map(|r| r.map(|_| ()))),
		}

		let ready = AtomicBool::new(false);
		let mut future = command.execute_reader_async(&ready);
		match std::pin::Pin::new(&mut future).poll(&mut cx) {
			Poll::Ready(Ok(mut reader)) => {
				assert!(reader.read().expect("read"));
				assert_eq!(reader.value(0).expect("value"), Value::Integer(7));
			}
			other => panic!("expected a reader, got {:?}", other.map(|r| r.map(|_| ()))),
		}
	}
}
