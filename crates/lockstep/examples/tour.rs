use std::time::Duration;

use lockstep::{Connection, ConnectionOptions, Value};

fn main() -> Result<(), Box<dyn std::error::Error>> {
	let options = ConnectionOptions::default().with_default_timeout(Duration::from_secs(5));
	let db = Connection::open(&options)?;

	let changed = db.execute(
		"create table inventory(sku text primary key, qty integer not null);
		 insert into inventory values ('A100', 8), ('B205', 14);
		 insert into inventory values ('C330', 3);",
	)?;
	println!("seeded {changed} rows");

	let mut command = db.create_command(
		"update inventory set qty = qty + :delta where sku = :sku;
		 select sku, qty from inventory order by sku;",
	);
	command.parameters_mut().add("delta", 2).add("sku", "C330");

	let mut reader = command.execute_reader()?;
	println!("updated {} rows", reader.records_affected());
	while reader.read()? {
		match reader.values()?.as_slice() {
			[Value::Text(sku), Value::Integer(qty)] => println!("{sku}: {qty}"),
			_ => return Err("unexpected row shape".into()),
		}
	}

	Ok(())
}
