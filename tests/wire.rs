use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, Client, Config, NoTls, Notification, SimpleQueryMessage};
use ulid::Ulid;

use spacebook::auth::PasswordPolicy;
use spacebook::engine::{Actor, Engine};
use spacebook::model::ReservationRequest;
use spacebook::notify::NotifyHub;
use spacebook::time::parse_date;
use spacebook::{seed, wire};

const SERVICE_PASSWORD: &str = "spacebook";
const ADMIN_EMAIL: &str = "admin@example.edu";
const ADMIN_PASSWORD: &str = "admin-secret";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join("spacebook_int_test");
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(
        Engine::new(
            dir.join(format!("{}.wal", Ulid::new())),
            Arc::new(NotifyHub::with_grace(Duration::ZERO)),
            PasswordPolicy::new(4),
        )
        .unwrap(),
    );
    seed::seed_catalog(&engine).await.unwrap();
    seed::seed_admin(&engine, ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();

    let served = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = served.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, SERVICE_PASSWORD.to_string(), None)
                    .await;
            });
        }
    });

    (addr, engine)
}

async fn connect(addr: SocketAddr) -> (Client, mpsc::UnboundedReceiver<Notification>) {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("spacebook")
        .user("spacebook")
        .password(SERVICE_PASSWORD);

    let (client, mut connection) = config.connect(NoTls).await.unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let stream = stream::poll_fn(move |cx| connection.poll_message(cx));
        futures::pin_mut!(stream);
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(AsyncMessage::Notification(n)) => {
                    let _ = tx.send(n);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    (client, rx)
}

/// Connect and sign in.
async fn session(addr: SocketAddr, email: &str, password: &str) -> (Client, mpsc::UnboundedReceiver<Notification>) {
    let (client, rx) = connect(addr).await;
    client
        .simple_query(&format!("LOGIN '{email}' '{password}'"))
        .await
        .unwrap();
    (client, rx)
}

async fn recv_notification(
    rx: &mut mpsc::UnboundedReceiver<Notification>,
    timeout: Duration,
) -> Option<Notification> {
    tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
}

/// Data rows of a simple query as column → value lookups.
async fn rows(client: &Client, sql: &str) -> Vec<tokio_postgres::SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn sqlstate(err: &tokio_postgres::Error) -> Option<&str> {
    err.code().map(|c| c.code())
}

/// Register, approve as admin and sign in a standard account.
async fn approved_student(
    addr: SocketAddr,
    admin: &Client,
    email: &str,
) -> (Client, mpsc::UnboundedReceiver<Notification>) {
    let (client, rx) = connect(addr).await;
    client
        .simple_query(&format!(
            "INSERT INTO users (email, password, name, last_name, institutional_id) \
             VALUES ('{email}', 'password1', 'Test', 'Student', 'S-1')"
        ))
        .await
        .unwrap();
    let users = rows(admin, "SELECT * FROM users").await;
    let id = users
        .iter()
        .find(|r| r.get("email") == Some(email))
        .and_then(|r| r.get("id"))
        .unwrap()
        .to_string();
    admin
        .simple_query(&format!("UPDATE users SET approved = true WHERE id = '{id}'"))
        .await
        .unwrap();
    client
        .simple_query(&format!("LOGIN '{email}' 'password1'"))
        .await
        .unwrap();
    (client, rx)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn commands_need_a_signed_in_account() {
    let (addr, _engine) = start_test_server().await;
    let (client, _rx) = connect(addr).await;

    let err = client.simple_query("SELECT * FROM spaces").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("42501"));

    let err = client
        .simple_query(&format!("LOGIN '{ADMIN_EMAIL}' 'wrong-password'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("28P01"));

    let signed_in = rows(&client, &format!("LOGIN '{ADMIN_EMAIL}' '{ADMIN_PASSWORD}'")).await;
    assert_eq!(signed_in[0].get("role"), Some("admin"));
    assert_eq!(rows(&client, "SELECT * FROM spaces").await.len(), 23);
}

#[tokio::test]
async fn unapproved_accounts_cannot_sign_in() {
    let (addr, _engine) = start_test_server().await;
    let (client, _rx) = connect(addr).await;
    client
        .simple_query(
            "INSERT INTO users (email, password, name, last_name, institutional_id) \
             VALUES ('new@example.edu', 'password1', 'New', 'User', 'N-1')",
        )
        .await
        .unwrap();

    let err = client
        .simple_query("LOGIN 'new@example.edu' 'password1'")
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("28P01"));
    assert!(err.to_string().contains("pending administrator approval"), "{err}");
}

#[tokio::test]
async fn overlapping_booking_is_refused() {
    let (addr, _engine) = start_test_server().await;
    let (admin, _) = session(addr, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let (ana, _) = approved_student(addr, &admin, "ana@example.edu").await;
    let (luis, _) = approved_student(addr, &admin, "luis@example.edu").await;

    let booked = rows(
        &ana,
        "INSERT INTO reservations (space_id, date, start_time, end_time, purpose, equipment) \
         VALUES ('lab_1', '01/09/2025', '10:00', '12:00', 'networks', '')",
    )
    .await;
    assert_eq!(booked[0].get("status"), Some("pending"));

    let err = luis
        .simple_query(
            "INSERT INTO reservations (space_id, date, start_time, end_time, purpose, equipment) \
             VALUES ('lab_1', '01/09/2025', '11:00', '13:00', 'study', '')",
        )
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("23P01"));
    assert!(err.to_string().contains("already occupied"), "{err}");

    // Back to back is fine.
    luis.simple_query(
        "INSERT INTO reservations (space_id, date, start_time, end_time, purpose, equipment) \
         VALUES ('lab_1', '01/09/2025', '12:00', '13:00', 'study', '')",
    )
    .await
    .unwrap();

    let agenda = rows(
        &luis,
        "SELECT * FROM reservations WHERE space_id = 'lab_1' AND date = '01/09/2025'",
    )
    .await;
    let starts: Vec<_> = agenda.iter().map(|r| r.get("start_time").unwrap()).collect();
    assert_eq!(starts, vec!["10:00", "12:00"]);
}

#[tokio::test]
async fn equipment_shares_capacity() {
    let (addr, _engine) = start_test_server().await;
    let (admin, _) = session(addr, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let (ana, _) = approved_student(addr, &admin, "ana@example.edu").await;

    ana.simple_query(
        "INSERT INTO reservations VALUES ('lab_2', '02/09/2025', '08:00', '10:00', 'lab', 'eq_pc:20')",
    )
    .await
    .unwrap();

    let check = rows(
        &ana,
        "SELECT * FROM availability WHERE space_id = 'lab_2' AND date = '02/09/2025' \
         AND start_time = '09:00' AND end_time = '11:00' AND equipment = 'eq_pc:6'",
    )
    .await;
    assert_eq!(check[0].get("available"), Some("f"));
    assert!(check[0].get("reason").unwrap().contains("5 left"));

    let err = ana
        .simple_query(
            "INSERT INTO reservations VALUES ('lab_2', '02/09/2025', '09:00', '11:00', 'lab', 'eq_pc:6')",
        )
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("23P01"));

    ana.simple_query(
        "INSERT INTO reservations VALUES ('lab_2', '02/09/2025', '09:00', '11:00', 'lab', 'eq_pc:5')",
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn approval_notifies_the_owner() {
    let (addr, _engine) = start_test_server().await;
    let (admin, _) = session(addr, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let (ana, mut ana_rx) = approved_student(addr, &admin, "ana@example.edu").await;

    ana.simple_query("LISTEN reservations").await.unwrap();
    let booked = rows(
        &ana,
        "INSERT INTO reservations VALUES ('aula_3', '03/09/2025', '7:00 AM', '9:00 AM', 'tutoring', '')",
    )
    .await;
    let id = booked[0].get("id").unwrap().to_string();

    admin
        .simple_query(&format!("UPDATE reservations SET status = 'approved' WHERE id = '{id}'"))
        .await
        .unwrap();

    // Delivered ahead of the next response on Ana's connection.
    ana.simple_query("SELECT * FROM favorites").await.unwrap();
    let n = recv_notification(&mut ana_rx, Duration::from_secs(2))
        .await
        .expect("approval alert");
    assert_eq!(n.channel(), "reservations");
    let payload: serde_json::Value = serde_json::from_str(n.payload()).unwrap();
    assert_eq!(payload["title"], "Reservation approved");
    assert!(payload["message"].as_str().unwrap().contains("Room 3"));
}

#[tokio::test]
async fn admins_hear_about_new_requests() {
    let (addr, _engine) = start_test_server().await;
    let (admin, mut admin_rx) = session(addr, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let (ana, _) = approved_student(addr, &admin, "ana@example.edu").await;

    let err = ana.simple_query("LISTEN requests").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("42501"));

    admin.simple_query("LISTEN requests").await.unwrap();
    ana.simple_query(
        "INSERT INTO reservations VALUES ('sala_juntas', '04/09/2025', '10:00', '11:00', 'meeting', '')",
    )
    .await
    .unwrap();

    admin.simple_query("SELECT * FROM equipment").await.unwrap();
    let n = recv_notification(&mut admin_rx, Duration::from_secs(2))
        .await
        .expect("request alert");
    assert_eq!(n.channel(), "requests");
    let payload: serde_json::Value = serde_json::from_str(n.payload()).unwrap();
    assert_eq!(payload["title"], "New request");
    assert_eq!(payload["message"], "Pending: Meeting Room");

    // Nothing after UNLISTEN.
    admin.simple_query("UNLISTEN *").await.unwrap();
    ana.simple_query(
        "INSERT INTO reservations VALUES ('sala_juntas', '04/09/2025', '12:00', '13:00', 'meeting', '')",
    )
    .await
    .unwrap();
    admin.simple_query("SELECT * FROM equipment").await.unwrap();
    assert!(recv_notification(&mut admin_rx, Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn suspension_reaches_the_account_channel() {
    let (addr, engine) = start_test_server().await;
    let (admin, _) = session(addr, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let (ana, mut ana_rx) = approved_student(addr, &admin, "ana@example.edu").await;
    ana.simple_query("LISTEN account").await.unwrap();

    let id = engine
        .list_users(&spacebook::engine::Actor::System)
        .unwrap()
        .into_iter()
        .find(|u| u.email == "ana@example.edu")
        .unwrap()
        .id;
    admin
        .simple_query(&format!("UPDATE users SET approved = false WHERE id = '{id}'"))
        .await
        .unwrap();

    // The alert arrives before the suspended session is turned away.
    let err = ana.simple_query("SELECT * FROM spaces").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("28P01"));
    let n = recv_notification(&mut ana_rx, Duration::from_secs(2))
        .await
        .expect("suspension alert");
    assert_eq!(n.channel(), "account");
    let payload: serde_json::Value = serde_json::from_str(n.payload()).unwrap();
    assert_eq!(payload["title"], "Account suspended");
}

#[tokio::test]
async fn recurring_reports_each_date() {
    let (addr, _engine) = start_test_server().await;
    let (admin, _) = session(addr, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let (ana, _) = approved_student(addr, &admin, "ana@example.edu").await;

    ana.simple_query(
        "INSERT INTO reservations VALUES ('aula_1', '08/09/2025', '08:00', '09:00', 'exam', '')",
    )
    .await
    .unwrap();

    let outcome = rows(
        &admin,
        "INSERT INTO reservations VALUES ('aula_1', '01/09/2025', '08:00', '10:00', 'course', '', '22/09/2025')",
    )
    .await;
    let summary: Vec<_> = outcome
        .iter()
        .map(|r| (r.get("date").unwrap(), r.get("outcome").unwrap()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("01/09/2025", "granted"),
            ("08/09/2025", "conflict"),
            ("15/09/2025", "granted"),
            ("22/09/2025", "granted"),
        ]
    );
}

#[tokio::test]
async fn extended_protocol_binds_parameters() {
    let (addr, _engine) = start_test_server().await;
    let (admin, _) = session(addr, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let slots = admin
        .query(
            "SELECT * FROM free_slots WHERE space_id = $1 AND date = $2",
            &[&"lab_3", &"05/09/2025"],
        )
        .await
        .unwrap();
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].get::<_, &str>("start_time"), "00:00");

    let err = admin
        .query(
            "SELECT * FROM free_slots WHERE space_id = $1 AND date = $2",
            &[&"nowhere", &"05/09/2025"],
        )
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("P0001"));
}

#[tokio::test]
async fn bound_text_containing_placeholders_is_kept() {
    let (addr, _engine) = start_test_server().await;
    let (admin, _) = session(addr, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let created = admin
        .query(
            "INSERT INTO reservations (space_id, date, start_time, end_time, purpose, equipment) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[&"lab_3", &"05/09/2025", &"10:00", &"11:00", &"bring $1 adapters, it's $6", &""],
        )
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].get::<_, &str>("purpose"), "bring $1 adapters, it's $6");
    assert_eq!(created[0].get::<_, &str>("space_id"), "lab_3");

    let stored = rows(
        &admin,
        "SELECT * FROM reservations WHERE space_id = 'lab_3' AND date = '05/09/2025'",
    )
    .await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].get("purpose"), Some("bring $1 adapters, it's $6"));
    assert_eq!(stored[0].get("start_time"), Some("10:00"));
}

/// Book `count` one-hour slots on `space_id` during `month` of 2025.
async fn churn(engine: &Engine, actor: &Actor, space_id: &str, month: u32, count: usize) {
    for i in 0..count {
        let start = 7 + i / 28;
        let request = ReservationRequest {
            space_id: space_id.into(),
            date: parse_date(&format!("{:02}/{month:02}/2025", i % 28 + 1)).unwrap(),
            start: format!("{start:02}:00"),
            end: format!("{:02}:00", start + 1),
            items: vec![],
            purpose: "timetable".into(),
        };
        engine.create_reservation(actor, request).await.unwrap();
    }
}

#[tokio::test]
async fn quiet_listener_keeps_alerts_through_heavy_traffic() {
    let (addr, engine) = start_test_server().await;
    let (admin, _) = session(addr, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let (ana, mut ana_rx) = approved_student(addr, &admin, "ana@example.edu").await;

    ana.simple_query("LISTEN reservations").await.unwrap();
    let booked = rows(
        &ana,
        "INSERT INTO reservations VALUES ('aula_3', '03/09/2025', '08:00', '09:00', 'tutoring', '')",
    )
    .await;
    let id = booked[0].get("id").unwrap().to_string();

    // Far more reservation changes than the broadcast ring holds, on both
    // sides of the approval, while Ana sends nothing.
    let operator = Actor::User(engine.login(ADMIN_EMAIL, ADMIN_PASSWORD).unwrap());
    churn(&engine, &operator, "aula_4", 10, 300).await;
    admin
        .simple_query(&format!("UPDATE reservations SET status = 'approved' WHERE id = '{id}'"))
        .await
        .unwrap();
    churn(&engine, &operator, "aula_5", 11, 300).await;

    ana.simple_query("SELECT * FROM favorites").await.unwrap();
    let n = recv_notification(&mut ana_rx, Duration::from_secs(2))
        .await
        .expect("approval alert");
    let payload: serde_json::Value = serde_json::from_str(n.payload()).unwrap();
    assert_eq!(payload["title"], "Reservation approved");
    assert!(recv_notification(&mut ana_rx, Duration::from_millis(100)).await.is_none());
}
