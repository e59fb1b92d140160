// End-to-end exploration against a mock web application

use std::time::Duration;
use tempfile::TempDir;
use waymark_core::data::Database;
use waymark_core::explore::{ExploreError, ExploreOptions, execute_exploration};
use waymark_scanner::explorer::{ExplorerConfig, Termination};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

async fn page(server: &MockServer, at: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(format!("<html><body>{}</body></html>", body)),
        )
        .mount(server)
        .await;
}

/// Customers and invoices, each form two clicks from the root.
async fn billing_app() -> MockServer {
    let server = MockServer::start().await;
    page(
        &server,
        "/",
        r#"<nav>
             <a id="customers" href="/customers">Customers</a>
             <a id="billing" href="/billing">Billing</a>
             <a href="/logout">Log out</a>
           </nav>"#,
    )
    .await;
    page(
        &server,
        "/customers",
        r#"<a id="add-customer" href="/customers/new">Add customer</a>"#,
    )
    .await;
    page(
        &server,
        "/customers/new",
        r#"<form method="post"><input name="name"><button type="submit">Save</button></form>"#,
    )
    .await;
    page(
        &server,
        "/billing",
        r#"<a id="new-invoice" href="/invoices/new">New invoice</a>"#,
    )
    .await;
    page(
        &server,
        "/invoices/new",
        r#"<form method="post">
             <label for="customer">Customer</label>
             <select id="customer" name="customer_id"><option>1</option></select>
             <input name="amount">
             <button type="submit">Create</button>
           </form>"#,
    )
    .await;
    server
}

fn options(url: &str) -> ExploreOptions {
    let mut options = ExploreOptions::new(url);
    options.config = ExplorerConfig::default().with_settle_delay(Duration::ZERO);
    options
}

fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
    (temp_dir, db)
}

// ============================================================================
// Full Run Tests
// ============================================================================

#[tokio::test]
async fn test_exploration_finds_and_saves_entities() {
    let server = billing_app().await;
    let (_temp_dir, db) = create_test_db();

    let run = execute_exploration(options(&server.uri()), &db, None)
        .await
        .unwrap();

    let names: Vec<&str> = run.outcome.entities.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Customer", "Invoice"]);
    assert_eq!(run.outcome.termination, Termination::Exhausted);

    let invoice = &run.outcome.entities[1];
    assert_eq!(invoice.depth, 2);
    assert_eq!(invoice.path.to_string(), "Billing > New invoice");
    assert!(invoice.relationship_field_names.contains("customer_id"));
    assert!(invoice.parents.contains(&run.outcome.entities[0].id));

    let session = db.get_session(&run.session_id).unwrap().unwrap();
    assert_eq!(session.status, "completed");
    assert_eq!(session.entity_count, 2);
    assert_eq!(db.load_entities(&run.session_id).unwrap(), run.outcome.entities);
}

#[tokio::test]
async fn test_second_run_skips_known_entities() {
    let server = billing_app().await;
    let (_temp_dir, db) = create_test_db();

    execute_exploration(options(&server.uri()), &db, None)
        .await
        .unwrap();
    let second = execute_exploration(options(&server.uri()), &db, None)
        .await
        .unwrap();

    assert!(second.outcome.entities.is_empty());
    assert_eq!(db.list_sessions().unwrap().len(), 2);
}

#[tokio::test]
async fn test_target_filter_limits_entities() {
    let server = billing_app().await;
    let (_temp_dir, db) = create_test_db();

    let mut options = options(&server.uri());
    options.config = options
        .config
        .with_target_names(vec!["invoice".to_string()]);
    let run = execute_exploration(options, &db, None).await.unwrap();

    assert_eq!(run.outcome.entities.len(), 1);
    assert_eq!(run.outcome.entities[0].name, "Invoice");
}

#[tokio::test]
async fn test_progress_messages_are_reported() {
    let server = billing_app().await;
    let (_temp_dir, db) = create_test_db();
    let messages = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = messages.clone();

    execute_exploration(
        options(&server.uri()),
        &db,
        Some(std::sync::Arc::new(move |msg: String| {
            sink.lock().unwrap().push(msg);
        })),
    )
    .await
    .unwrap();

    let messages = messages.lock().unwrap();
    assert!(messages.first().unwrap().starts_with("Session "));
    assert_eq!(messages.last().unwrap(), "Saved 2 entities");
}

// ============================================================================
// Failure Tests
// ============================================================================

#[tokio::test]
async fn test_unreachable_target_is_saved_as_failed() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let (_temp_dir, db) = create_test_db();

    let run = execute_exploration(options(&url), &db, None)
        .await
        .unwrap();

    assert!(run.outcome.is_partial());
    let session = db.get_session(&run.session_id).unwrap().unwrap();
    assert_eq!(session.status, "failed");
}

#[tokio::test]
async fn test_invalid_url_is_rejected() {
    let (_temp_dir, db) = create_test_db();

    let result = execute_exploration(options("not a url"), &db, None).await;

    assert!(matches!(result, Err(ExploreError::Scan(_))));
    assert!(db.list_sessions().unwrap().is_empty());
}
