#[cfg(feature = "async")]
mod async_example {
	use std::future::Future;
	use std::pin::Pin;
	use std::sync::atomic::AtomicBool;
	use std::task::{Context, Poll, Waker};

	use lockstep::{Connection, Value};

	fn block_on<F>(future: F) -> F::Output
	where
		F: Future,
	{
		let mut cx = Context::from_waker(Waker::noop());
		let mut future = Box::pin(future);

		loop {
			match Future::poll(Pin::as_mut(&mut future), &mut cx) {
				Poll::Ready(output) => return output,
				Poll::Pending => std::thread::yield_now(),
			}
		}
	}

	async fn run() -> Result<(), Box<dyn std::error::Error>> {
		let db = Connection::open_in_memory()?;
		db.execute(
			"create table jobs(id integer primary key, name text not null);
			 insert into jobs(name) values ('fetch'), ('index'), ('vacuum');",
		)?;

		let cancelled = AtomicBool::new(false);
		let command = db.create_command("select id, name from jobs order by id");
		for row in command.execute_reader_async(&cancelled).await? {
			if let [Value::Integer(id), Value::Text(name)] = row?.as_slice() {
				println!("job {id}: {name}");
			}
		}

		Ok(())
	}

	pub fn main() -> Result<(), Box<dyn std::error::Error>> {
		block_on(run())
	}
}

#[cfg(feature = "async")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
	async_example::main()
}

#[cfg(not(feature = "async"))]
fn main() {
	println!(
		"Enable feature `async` to run this example: cargo run -p lockstep --example async --features async"
	);
}
