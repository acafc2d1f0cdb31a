use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use labdesk::engine::Engine;
use labdesk::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("labdesk_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("labdesk.wal")).unwrap());

    let engine2 = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "labdesk".to_string(), None, 1000).await;
            });
        }
    });

    (addr, engine)
}

async fn connect(addr: SocketAddr, user: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("lab")
        .user(user)
        .password("labdesk");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn sqlstate(err: &tokio_postgres::Error) -> Option<&str> {
    err.as_db_error().map(|db| db.code().code())
}

async fn add_pc(client: &Client, code: &str, row: u8) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO pcs (id, code, row_no) VALUES ('{id}', '{code}', {row})"
        ))
        .await
        .unwrap();
    id
}

async fn book(client: &Client, pc: Ulid, date: &str, slot: &str, person: &str) -> Result<Ulid, tokio_postgres::Error> {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, pc_id, date, slot, person_name) \
             VALUES ('{id}', '{pc}', '{date}', '{slot}', '{person}')"
        ))
        .await?;
    Ok(id)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn register_and_list_pcs() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr, "ops").await;

    add_pc(&client, "CS-01", 1).await;
    add_pc(&client, "CS-02", 2).await;
    client
        .batch_execute(&format!(
            "INSERT INTO pcs (id, code, row_no, status, ram) VALUES ('{}', 'CS-03', 2, 'maintenance', '8GB')",
            Ulid::new()
        ))
        .await
        .unwrap();

    let all = rows(&client, "SELECT * FROM pcs").await;
    assert_eq!(all.len(), 3);

    let row_two = rows(&client, "SELECT * FROM pcs WHERE row_no = 2 AND status = 'active'").await;
    assert_eq!(row_two.len(), 1);
    assert_eq!(row_two[0].get("code"), Some("CS-02"));
    assert_eq!(row_two[0].get("created_by"), Some("ops"));

    let err = client
        .batch_execute(&format!("INSERT INTO pcs (id, code, row_no) VALUES ('{}', 'CS-01', 3)", Ulid::new()))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("23505"));
}

#[tokio::test]
async fn double_booking_is_a_unique_violation() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr, "ops").await;
    let cs01 = add_pc(&client, "CS-01", 1).await;
    let cs02 = add_pc(&client, "CS-02", 1).await;

    book(&client, cs01, "2025-03-10", "09:00-10:30", "Alice").await.unwrap();

    let err = book(&client, cs01, "2025-03-10", "09:00-10:30", "Bob").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("23505"));
    assert!(err.as_db_error().unwrap().message().contains("Alice"));

    let err = book(&client, cs02, "2025-03-10", "09:00-10:30", "Alice").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("23505"));

    book(&client, cs01, "2025-03-10", "10:30-12:00", "Bob").await.unwrap();
    book(&client, cs02, "2025-03-10", "09:00-10:30", "Bob").await.unwrap();

    let day = rows(&client, "SELECT * FROM bookings WHERE date = '2025-03-10'").await;
    assert_eq!(day.len(), 3);
}

#[tokio::test]
async fn booked_by_is_the_session_user() {
    let (addr, _engine) = start_test_server().await;
    let admin = connect(addr, "lab-admin").await;
    let pc = add_pc(&admin, "CS-01", 1).await;

    let tech = connect(addr, "technician").await;
    let id = book(&tech, pc, "2025-03-10", "14:00-15:30", "Alice").await.unwrap();

    let found = rows(&admin, &format!("SELECT * FROM bookings WHERE id = '{id}'")).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("booked_by"), Some("technician"));
    assert_eq!(found[0].get("pc_code"), Some("CS-01"));
    assert_eq!(found[0].get("status"), Some("confirmed"));
}

#[tokio::test]
async fn update_and_delete_bookings() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr, "ops").await;
    let pc = add_pc(&client, "CS-01", 1).await;
    let id = book(&client, pc, "2025-03-10", "09:00-10:30", "Alice").await.unwrap();

    client
        .batch_execute(&format!(
            "UPDATE bookings SET slot = '12:00-13:30', notes = 'moved' WHERE id = '{id}'"
        ))
        .await
        .unwrap();
    let found = rows(&client, &format!("SELECT * FROM bookings WHERE id = '{id}'")).await;
    assert_eq!(found[0].get("slot"), Some("12:00-13:30"));
    assert_eq!(found[0].get("notes"), Some("moved"));

    // The vacated cell is free again.
    book(&client, pc, "2025-03-10", "09:00-10:30", "Bob").await.unwrap();

    client
        .batch_execute(&format!("DELETE FROM bookings WHERE id = '{id}'"))
        .await
        .unwrap();
    let err = client
        .batch_execute(&format!("DELETE FROM bookings WHERE id = '{id}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("P0002"));
}

#[tokio::test]
async fn inactive_pc_and_bad_slot_are_refused() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr, "ops").await;
    let pc = add_pc(&client, "CS-01", 1).await;

    let err = book(&client, pc, "2025-03-10", "08:00-09:00", "Alice").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("22023"));

    client
        .batch_execute(&format!("UPDATE pcs SET status = 'maintenance' WHERE id = '{pc}'"))
        .await
        .unwrap();
    let err = book(&client, pc, "2025-03-10", "09:00-10:30", "Alice").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("55006"));
}

#[tokio::test]
async fn availability_grid_rows() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr, "ops").await;
    let pc = add_pc(&client, "CS-01", 1).await;
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, pc_id, date, slot, person_name, purpose) \
             VALUES ('{}', '{pc}', '2025-03-10', '09:00-10:30', 'Alice', 'Thesis run')",
            Ulid::new()
        ))
        .await
        .unwrap();

    let cells = rows(&client, "SELECT * FROM availability WHERE date = '2025-03-10'").await;
    assert_eq!(cells.len(), 5);
    let taken: Vec<_> = cells.iter().filter(|c| c.get("available") == Some("f")).collect();
    assert_eq!(taken.len(), 1);
    assert_eq!(taken[0].get("slot"), Some("09:00-10:30"));
    assert_eq!(taken[0].get("person_name"), Some("Alice"));
    assert_eq!(taken[0].get("purpose"), Some("Thesis run"));
    assert_eq!(taken[0].get("status"), Some("confirmed"));
    assert!(cells
        .iter()
        .filter(|c| c.get("available") == Some("t"))
        .all(|c| c.get("booking_id").is_none() && c.get("status").is_none()));
}

#[tokio::test]
async fn clear_requires_confirmation() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr, "ops").await;
    let pc = add_pc(&client, "CS-01", 1).await;
    book(&client, pc, "2025-03-10", "09:00-10:30", "Alice").await.unwrap();
    book(&client, pc, "2025-03-10", "10:30-12:00", "Bob").await.unwrap();

    let err = client
        .simple_query("DELETE FROM bookings WHERE date = '2025-03-10'")
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("55000"));
    assert_eq!(rows(&client, "SELECT * FROM bookings").await.len(), 2);

    let cleared = rows(
        &client,
        "DELETE FROM bookings WHERE date = '2025-03-10' AND slot = '09:00-10:30' AND confirm = true",
    )
    .await;
    assert_eq!(cleared.len(), 1);
    assert_eq!(cleared[0].get("person_name"), Some("Alice"));

    let left = rows(&client, "SELECT * FROM bookings").await;
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].get("person_name"), Some("Bob"));
}

#[tokio::test]
async fn replication_reports_outcomes() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr, "ops").await;
    let cs01 = add_pc(&client, "CS-01", 1).await;
    let cs02 = add_pc(&client, "CS-02", 1).await;
    book(&client, cs01, "2025-03-10", "09:00-10:30", "Alice").await.unwrap();
    book(&client, cs02, "2025-03-10", "09:00-10:30", "Bob").await.unwrap();
    book(&client, cs02, "2025-03-11", "09:00-10:30", "Carol").await.unwrap();

    let previous = rows(&client, "SELECT * FROM previous_bookings WHERE date = '2025-03-11'").await;
    assert_eq!(previous.len(), 2);

    let outcome = rows(
        &client,
        "INSERT INTO replications (target_date, source_date) VALUES ('2025-03-11', '2025-03-10')",
    )
    .await;
    assert_eq!(outcome.len(), 2);
    let applied: Vec<_> = outcome.iter().filter(|r| r.get("outcome") == Some("applied")).collect();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].get("person_name"), Some("Alice"));
    let conflict: Vec<_> = outcome.iter().filter(|r| r.get("outcome") == Some("conflict")).collect();
    assert_eq!(conflict.len(), 1);
    assert_eq!(conflict[0].get("held_by"), Some("Carol"));

    assert_eq!(rows(&client, "SELECT * FROM bookings WHERE date = '2025-03-11'").await.len(), 2);

    let err = client
        .simple_query("INSERT INTO replications (target_date, source_date) VALUES ('2025-03-11', '2025-03-11')")
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("22023"));
}

#[tokio::test]
async fn absent_mark_releases_and_present_restores() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr, "ops").await;
    let pc = add_pc(&client, "CS-01", 1).await;
    let batch = Ulid::new();
    let student = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO batches (id, name, timing) VALUES ('{batch}', 'Morning A', '09:00-10:30');
             INSERT INTO students (id, name, batch_id) VALUES ('{student}', 'Alice', '{batch}');
             INSERT INTO bookings (id, pc_id, date, slot, student_id) \
             VALUES ('{}', '{pc}', '2025-03-10', '09:00-10:30', '{student}')",
            Ulid::new()
        ))
        .await
        .unwrap();

    let released = rows(
        &client,
        &format!("INSERT INTO attendance (student_id, status, date) VALUES ('{student}', 'absent', '2025-03-10')"),
    )
    .await;
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].get("status"), Some("completed"));

    let cells = rows(&client, "SELECT * FROM availability WHERE date = '2025-03-10'").await;
    let first = cells.iter().find(|c| c.get("slot") == Some("09:00-10:30")).unwrap();
    assert_eq!(first.get("available"), Some("t"));

    // A second absent mark changes nothing.
    let again = rows(
        &client,
        &format!("INSERT INTO attendance (student_id, status, date) VALUES ('{student}', 'absent', '2025-03-10')"),
    )
    .await;
    assert!(again.is_empty());

    let restored = rows(
        &client,
        &format!("INSERT INTO attendance (student_id, status, date) VALUES ('{student}', 'present', '2025-03-10')"),
    )
    .await;
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].get("status"), Some("confirmed"));
    assert_eq!(restored[0].get("person_name"), Some("Alice"));
}

#[tokio::test]
async fn extended_protocol_binds_parameters() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr, "ops").await;
    let pc = add_pc(&client, "CS-01", 1).await;

    let id = Ulid::new().to_string();
    let pc = pc.to_string();
    let inserted = client
        .execute(
            "INSERT INTO bookings (id, pc_id, date, slot, person_name) VALUES ($1, $2, $3, $4, $5)",
            &[&id, &pc, &"2025-03-10", &"15:30-17:00", &"O'Brien"],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let found = client
        .query("SELECT * FROM bookings WHERE date = $1", &[&"2025-03-10"])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get::<_, String>("id"), id);
    assert_eq!(found[0].get::<_, String>("person_name"), "O'Brien");
    assert_eq!(found[0].get::<_, Option<String>>("purpose"), None);
}

#[tokio::test]
async fn bound_values_keep_dollar_text() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr, "ops").await;
    let pc = add_pc(&client, "CS-01", 1).await;

    let id = Ulid::new().to_string();
    let pc = pc.to_string();
    let inserted = client
        .execute(
            "INSERT INTO bookings (id, pc_id, date, slot, person_name, notes) VALUES ($1, $2, $3, $4, $5, $6)",
            &[&id, &pc, &"2025-03-11", &"09:00-10:30", &"Dana", &"fee $1 paid, see $2"],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let found = client
        .query("SELECT * FROM bookings WHERE id = $1", &[&id])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get::<_, String>("notes"), "fee $1 paid, see $2");
}

#[tokio::test]
async fn syntax_errors_map_to_42601() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr, "ops").await;

    let err = client.simple_query("SELEC * FROM pcs").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("42601"));

    let err = client.simple_query("SELECT * FROM rooms").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("42601"));
}

#[tokio::test]
async fn state_survives_restart() {
    let dir = std::env::temp_dir().join(format!("labdesk_int_restart_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let wal = dir.join("labdesk.wal");

    let pc = Ulid::new();
    {
        let engine = Engine::new(wal.clone()).unwrap();
        engine
            .create_pc(labdesk::model::PcDraft {
                id: pc,
                code: "CS-01".into(),
                row: 1,
                status: labdesk::model::PcStatus::Active,
                specs: Default::default(),
                created_by: None,
            })
            .await
            .unwrap();
    }

    let engine = Arc::new(Engine::new(wal).unwrap());
    assert_eq!(engine.get_pc(&pc).map(|p| p.code).as_deref(), Some("CS-01"));
}
