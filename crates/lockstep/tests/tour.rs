use lockstep::{Connection, ParameterSet, Value};

#[test]
fn tour_flow_round_trips_values() {
	let db = Connection::open_in_memory().expect("open memory database");
	let created = db
		.execute("create table t(name text, qty integer); insert into t values ('bolts', 3);")
		.expect("create and seed");
	assert_eq!(created, 1);

	let mut insert = db.create_command("insert into t(name, qty) values (:name, :qty)");
	insert.parameters_mut().add("name", "widgets").add("qty", 12);
	assert_eq!(insert.execute_non_query().expect("run insert"), 1);

	let mut parameters = ParameterSet::new();
	parameters.add_positional(5);
	let mut reader = db
		.create_command("select name, qty from t where qty > ? order by name; select count(*) from t;")
		.with_parameters(parameters)
		.execute_reader()
		.expect("select rows");

	assert_eq!(reader.records_affected(), -1);
	assert!(reader.read().expect("first row"));
	assert_eq!(reader.column_name(0).as_deref(), Some("name"));
	assert_eq!(reader.values().expect("row"), vec![Value::Text("widgets".to_string()), Value::Integer(12)]);

	let rest: Vec<_> = reader.collect::<lockstep::Result<_>>().expect("remaining rows");
	assert_eq!(rest, vec![vec![Value::Integer(2)]]);
}

#[test]
fn blobs_nulls_and_floats_survive_binding() {
	let db = Connection::open_in_memory().expect("open memory database");
	let mut command = db.create_command("select :blob, :missing, :ratio");
	command
		.parameters_mut()
		.add("blob", vec![0_u8, 1, 2])
		.add("missing", None::<String>)
		.add("ratio", 0.25);

	let row = command.execute_reader().expect("execute").next().expect("one row").expect("read row");
	assert_eq!(row, vec![Value::Blob(vec![0, 1, 2]), Value::Null, Value::Float(0.25)]);
}

#[test]
fn engine_supports_unlock_notification() {
	assert!(lockstep::sqlite_compile_option_used("ENABLE_UNLOCK_NOTIFY"));
}
