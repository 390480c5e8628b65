use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use shelterbed::network::NetworkManager;
use shelterbed::wire;

const PASSWORD: &str = "shelterbed";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<NetworkManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("shelterbed_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let networks = Arc::new(NetworkManager::new(dir, 1000));

    let accept_networks = networks.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let networks = accept_networks.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, networks, PASSWORD.to_string(), None).await;
            });
        }
    });

    (addr, networks)
}

async fn connect_as(addr: SocketAddr, network: &str, user: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(network)
        .user(user)
        .password(PASSWORD);

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
        .unwrap_or_else(|e| panic!("{sql}: {e}"))
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn single(client: &Client, sql: &str) -> SimpleQueryRow {
    let mut found = rows(client, sql).await;
    assert_eq!(found.len(), 1, "{sql}");
    found.remove(0)
}

/// Run a statement that must fail, and return its SQLSTATE.
async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = match client.simple_query(sql).await {
        Ok(_) => panic!("{sql}: expected an error"),
        Err(e) => e,
    };
    err.code()
        .map(|c| c.code().to_string())
        .unwrap_or_else(|| panic!("{sql}: no SQLSTATE in {err}"))
}

struct Directory {
    north: Ulid,
    south: Ulid,
    north_site: Ulid,
    south_site: Ulid,
    beds: Vec<Ulid>,
    case: Ulid,
}

async fn seed(client: &Client) -> Directory {
    let dir = Directory {
        north: Ulid::new(),
        south: Ulid::new(),
        north_site: Ulid::new(),
        south_site: Ulid::new(),
        beds: (0..2).map(|_| Ulid::new()).collect(),
        case: Ulid::new(),
    };
    let statements = [
        format!("INSERT INTO agencies VALUES ('{}', 'North Outreach')", dir.north),
        format!("INSERT INTO agencies VALUES ('{}', 'South Housing')", dir.south),
        format!("INSERT INTO sites VALUES ('{}', '{}', 'Harbor House')", dir.north_site, dir.north),
        format!("INSERT INTO sites VALUES ('{}', '{}', 'Elm Street')", dir.south_site, dir.south),
        format!(
            "INSERT INTO beds VALUES ('{}', '{}', 'Bed 1', 'Dorm A', 'bunk')",
            dir.beds[0], dir.north_site
        ),
        format!(
            "INSERT INTO beds (id, site_id, name) VALUES ('{}', '{}', 'Bed 2')",
            dir.beds[1], dir.north_site
        ),
        format!("INSERT INTO cases VALUES ('{}', 'R. Alvarez')", dir.case),
    ];
    for sql in &statements {
        client.simple_query(sql).await.unwrap_or_else(|e| panic!("{sql}: {e}"));
    }
    dir
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn allocate_then_cross_agency_conflict() {
    let (addr, _networks) = start_test_server().await;
    let client = connect_as(addr, "metro", "intake-north").await;
    let dir = seed(&client).await;

    let created = single(
        &client,
        &format!(
            "INSERT INTO requests (case_id, agency_id, site_id, date_of_arrival, notes) \
             VALUES ('{}', '{}', '{}', '2026-03-02', 'arrives by bus')",
            dir.case, dir.north, dir.north_site
        ),
    )
    .await;
    assert_eq!(created.get("status"), Some("PENDING"));
    let request_id = created.get("request_id").unwrap().to_string();

    let conflict = single(
        &client,
        &format!("SELECT * FROM conflicts WHERE case_id = '{}' AND agency_id = '{}'", dir.case, dir.north),
    )
    .await;
    assert_eq!(conflict.get("has_allocated_bed"), Some("f"));

    let occupancy = single(
        &client,
        &format!(
            "INSERT INTO occupancies (request_id, bed_id) VALUES ('{request_id}', '{}')",
            dir.beds[0]
        ),
    )
    .await;
    assert_eq!(occupancy.get("status"), Some("ALLOCATED"));
    assert!(occupancy.get("occupancy_id").is_some());
    assert_eq!(occupancy.get("bed_id"), Some(dir.beds[0].to_string().as_str()));
    assert_eq!(occupancy.get("check_in_date"), Some("2026-03-02"));
    assert_eq!(occupancy.get("created_by"), Some("intake-north"));

    let view = single(&client, &format!("SELECT * FROM requests WHERE id = '{request_id}'")).await;
    assert_eq!(view.get("status"), Some("ALLOCATED"));
    assert_eq!(view.get("site_name"), Some("Harbor House"));

    // South asks for the same person and sees North's bed.
    let south = connect_as(addr, "metro", "intake-south").await;
    let second = single(
        &south,
        &format!(
            "INSERT INTO requests (case_id, agency_id, site_id, date_of_arrival) \
             VALUES ('{}', '{}', '{}', '2026-03-03')",
            dir.case, dir.south, dir.south_site
        ),
    )
    .await;
    let second_id = second.get("request_id").unwrap().to_string();
    let listed = rows(
        &south,
        &format!("SELECT * FROM requests WHERE agency_id = '{}' AND status = 'PENDING'", dir.south),
    )
    .await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("is_cross_agency"), Some("t"));
    assert_eq!(listed[0].get("current_agency_id"), Some(dir.north.to_string().as_str()));

    let denied = single(
        &south,
        &format!("INSERT INTO denials VALUES ('{second_id}', 'already housed at Harbor House')"),
    )
    .await;
    assert_eq!(denied.get("status"), Some("DENIED"));

    let code = sqlstate(
        &south,
        &format!("INSERT INTO denials VALUES ('{second_id}', 'again')"),
    )
    .await;
    assert_eq!(code, "40001");
}

#[tokio::test]
async fn error_classes_surface_as_sqlstate() {
    let (addr, _networks) = start_test_server().await;
    let client = connect_as(addr, "metro", "intake").await;
    let dir = seed(&client).await;

    // Missing site.
    let code = sqlstate(
        &client,
        &format!(
            "INSERT INTO requests (case_id, agency_id, date_of_arrival) VALUES ('{}', '{}', '2026-03-02')",
            dir.case, dir.north
        ),
    )
    .await;
    assert_eq!(code, "22023");

    let code = sqlstate(&client, &format!("SELECT * FROM requests WHERE id = '{}'", Ulid::new())).await;
    assert_eq!(code, "P0002");

    let code = sqlstate(
        &client,
        &format!("INSERT INTO agencies VALUES ('{}', 'Duplicate')", dir.north),
    )
    .await;
    assert_eq!(code, "23505");

    let code = sqlstate(
        &client,
        &format!(
            "SELECT * FROM requests WHERE site_id = '{}' AND page_size = 100000",
            dir.north_site
        ),
    )
    .await;
    assert_eq!(code, "54000");

    assert_eq!(sqlstate(&client, "UPDATE beds SET name = 'x'").await, "42601");
    assert_eq!(sqlstate(&client, "SELECT * FROM wards WHERE id = 'x'").await, "42601");
}

#[tokio::test]
async fn occupied_bed_is_refused_until_checkout() {
    let (addr, _networks) = start_test_server().await;
    let client = connect_as(addr, "metro", "intake").await;
    let dir = seed(&client).await;

    let walk_in = single(
        &client,
        &format!(
            "INSERT INTO walk_ins VALUES ('{}', '{}', '2026-03-01', 'overnight')",
            dir.case, dir.beds[0]
        ),
    )
    .await;
    let occupancy_id = walk_in.get("occupancy_id").unwrap().to_string();
    assert_eq!(walk_in.get("request_id"), None);
    assert_eq!(walk_in.get("status"), None);

    let available = rows(
        &client,
        &format!("SELECT * FROM available_beds WHERE site_id = '{}'", dir.north_site),
    )
    .await;
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].get("name"), Some("Bed 2"));

    let other_case = Ulid::new();
    client
        .simple_query(&format!("INSERT INTO cases VALUES ('{other_case}', 'T. Okafor')"))
        .await
        .unwrap();
    let code = sqlstate(
        &client,
        &format!(
            "INSERT INTO walk_ins VALUES ('{other_case}', '{}', '2026-03-01')",
            dir.beds[0]
        ),
    )
    .await;
    assert_eq!(code, "40001");

    client
        .simple_query(&format!("DELETE FROM occupancies WHERE id = '{occupancy_id}'"))
        .await
        .unwrap();
    let code = sqlstate(&client, &format!("DELETE FROM occupancies WHERE id = '{occupancy_id}'")).await;
    assert_eq!(code, "40001");

    let available = rows(
        &client,
        &format!("SELECT * FROM available_beds WHERE site_id = '{}'", dir.north_site),
    )
    .await;
    assert_eq!(available.len(), 2);
}

#[tokio::test]
async fn networks_do_not_share_state() {
    let (addr, networks) = start_test_server().await;
    let metro = connect_as(addr, "metro", "intake").await;
    let dir = seed(&metro).await;

    let county = connect_as(addr, "county", "intake").await;
    let code = sqlstate(
        &county,
        &format!("SELECT * FROM conflicts WHERE case_id = '{}' AND agency_id = '{}'", dir.case, dir.north),
    )
    .await;
    assert_eq!(code, "P0002");

    let metro_engine = networks.get_or_open("metro").unwrap();
    assert!(metro_engine.get_case(&dir.case).is_some());
}

#[tokio::test]
async fn prepared_statement_binds_parameters() {
    let (addr, _networks) = start_test_server().await;
    let client = connect_as(addr, "metro", "intake").await;
    let dir = seed(&client).await;

    let site = dir.north_site.to_string();
    let beds = client
        .query("SELECT * FROM available_beds WHERE site_id = $1", &[&site])
        .await
        .unwrap();
    let mut ids: Vec<String> = beds.iter().map(|row| row.get::<_, String>("id")).collect();
    ids.sort();
    let mut expected: Vec<String> = dir.beds.iter().map(|b| b.to_string()).collect();
    expected.sort();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn prepared_free_text_may_contain_placeholder_tokens() {
    let (addr, _networks) = start_test_server().await;
    let client = connect_as(addr, "metro", "intake").await;
    let dir = seed(&client).await;

    let (case, agency, site) = (dir.case.to_string(), dir.north.to_string(), dir.north_site.to_string());
    let notes = "owes $1 deposit; said '$3' was fine".to_string();
    let created = client
        .query(
            "INSERT INTO requests (case_id, agency_id, site_id, date_of_arrival, notes) \
             VALUES ($1, $2, $3, '2026-03-02', $4)",
            &[&case, &agency, &site, &notes],
        )
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    let request_id: String = created[0].get("request_id");

    let view = single(&client, &format!("SELECT * FROM requests WHERE id = '{request_id}'")).await;
    assert_eq!(view.get("notes"), Some(notes.as_str()));

    let reason = "needs $2 co-pay, $1 on file".to_string();
    let denied = client
        .query("INSERT INTO denials (request_id, reason) VALUES ($1, $2)", &[&request_id, &reason])
        .await
        .unwrap();
    let status: String = denied[0].get("status");
    assert_eq!(status, "DENIED");

    let view = single(&client, &format!("SELECT * FROM requests WHERE id = '{request_id}'")).await;
    assert_eq!(view.get("denial_reason"), Some(reason.as_str()));
}
