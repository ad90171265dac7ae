//! End-to-end crawls: manager, local workers and a wiremock server

use crate::common::{
    definition, in_memory_storage, nt_link, nt_literal, test_config, FOAF_KNOWS, FOAF_NAME,
};
use std::time::Duration;
use sumi_paths::process::{LogNotifier, ProcessController, ProcessStatus};
use sumi_paths::state::{ResourceStatus, WarningKind};
use sumi_paths::storage::{
    self, DomainStore, PathStore, ProcessStore, ResourceStore, SharedStorage, TripleStore,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NTRIPLES: &str = "application/n-triples";

async fn mount_robots(server: &MockServer, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_document(server: &MockServer, at: &str, content_type: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", content_type),
        )
        .mount(server)
        .await;
}

/// Runs the manager until no process is left
async fn crawl(storage: &SharedStorage) {
    let config = test_config(100, 1);
    let run = sumi_paths::crawler::run(config, storage.clone(), std::future::pending(), true);
    tokio::time::timeout(Duration::from_secs(30), run)
        .await
        .expect("crawl finished in time")
        .expect("crawl succeeded");
}

fn resource_status(storage: &SharedStorage, url: &str) -> ResourceStatus {
    storage::lock(storage)
        .unwrap()
        .get_resource(url)
        .unwrap()
        .unwrap_or_else(|| panic!("no resource {}", url))
        .status
}

#[tokio::test]
async fn test_full_crawl_single_domain() {
    let server = MockServer::start().await;
    let base = server.uri();
    let alice = format!("{}/alice", base);
    let bob = format!("{}/bob", base);
    let carol = format!("{}/private/carol", base);

    mount_robots(&server, 200, "User-agent: *\nDisallow: /private\n").await;
    mount_document(
        &server,
        "/alice",
        NTRIPLES,
        nt_link(&alice, FOAF_KNOWS, &bob)
            + &nt_link(&alice, FOAF_KNOWS, &carol)
            + &nt_literal(&alice, FOAF_NAME, "Alice"),
    )
    .await;
    mount_document(&server, "/bob", NTRIPLES, nt_literal(&bob, FOAF_NAME, "Bob")).await;

    let storage = in_memory_storage();
    let controller = ProcessController::new(storage.clone(), Box::new(LogNotifier));
    let pid = controller
        .create_process(&definition(&[alice.clone()], 3, 1))
        .unwrap();

    crawl(&storage).await;

    assert_eq!(resource_status(&storage, &alice), ResourceStatus::Done);
    assert_eq!(resource_status(&storage, &bob), ResourceStatus::Done);
    assert_eq!(resource_status(&storage, &carol), ResourceStatus::Error);

    let guard = storage::lock(&storage).unwrap();
    let process = guard.get_process(pid).unwrap().unwrap();
    assert_eq!(process.status, ProcessStatus::Done);
    assert_eq!(guard.count_triples().unwrap(), 4);
    assert_eq!(guard.count_crawlable_heads(pid, 3).unwrap(), 0);

    let warnings = guard.get_warnings(&server_origin(&base)).unwrap();
    assert_eq!(warnings.get(&WarningKind::RobotsDisallowed), Some(&1));
}

#[tokio::test]
async fn test_heads_at_length_bound_are_not_fetched() {
    let server = MockServer::start().await;
    let base = server.uri();
    let alice = format!("{}/alice", base);
    let bob = format!("{}/bob", base);

    mount_robots(&server, 404, "").await;
    mount_document(&server, "/alice", NTRIPLES, nt_link(&alice, FOAF_KNOWS, &bob)).await;
    Mock::given(method("GET"))
        .and(path("/bob"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let storage = in_memory_storage();
    let controller = ProcessController::new(storage.clone(), Box::new(LogNotifier));
    let pid = controller
        .create_process(&definition(&[alice.clone()], 2, 1))
        .unwrap();

    crawl(&storage).await;

    assert_eq!(resource_status(&storage, &alice), ResourceStatus::Done);
    assert_eq!(resource_status(&storage, &bob), ResourceStatus::Unvisited);
    let guard = storage::lock(&storage).unwrap();
    assert_eq!(
        guard.get_process(pid).unwrap().unwrap().status,
        ProcessStatus::Done
    );
    assert_eq!(guard.open_paths_at(pid, &bob).unwrap().len(), 1);
}

#[tokio::test]
async fn test_unsupported_document_does_not_block_completion() {
    let server = MockServer::start().await;
    let base = server.uri();
    let seed = format!("{}/page", base);

    mount_robots(&server, 404, "").await;
    mount_document(&server, "/page", "text/html", "<html></html>".to_string()).await;

    let storage = in_memory_storage();
    let controller = ProcessController::new(storage.clone(), Box::new(LogNotifier));
    let pid = controller
        .create_process(&definition(&[seed.clone()], 3, 2))
        .unwrap();

    crawl(&storage).await;

    let guard = storage::lock(&storage).unwrap();
    let resource = guard.get_resource(&seed).unwrap().unwrap();
    assert_eq!(resource.status, ResourceStatus::Error);
    assert_eq!(
        resource.error_kind.as_deref(),
        Some("unsupported_content_type")
    );
    assert_eq!(
        guard.get_process(pid).unwrap().unwrap().status,
        ProcessStatus::Done
    );

    let domain = guard.get_domain(&server_origin(&base)).unwrap().unwrap();
    assert!(domain.robots_text.is_none());
}

#[tokio::test]
async fn test_processes_run_one_after_another() {
    let server = MockServer::start().await;
    let base = server.uri();
    let first = format!("{}/first", base);
    let second = format!("{}/second", base);

    mount_robots(&server, 404, "").await;
    mount_document(&server, "/first", NTRIPLES, nt_literal(&first, FOAF_NAME, "First")).await;
    mount_document(&server, "/second", NTRIPLES, nt_literal(&second, FOAF_NAME, "Second")).await;

    let storage = in_memory_storage();
    let controller = ProcessController::new(storage.clone(), Box::new(LogNotifier));
    let one = controller.create_process(&definition(&[first], 2, 1)).unwrap();
    let two = controller.create_process(&definition(&[second], 2, 1)).unwrap();

    crawl(&storage).await;

    let guard = storage::lock(&storage).unwrap();
    for pid in [one, two] {
        assert_eq!(
            guard.get_process(pid).unwrap().unwrap().status,
            ProcessStatus::Done
        );
        assert_eq!(guard.count_process_triples(pid).unwrap(), 1);
    }
}

/// The mock server's origin: `http://127.0.0.1:<port>`
fn server_origin(base: &str) -> String {
    sumi_paths::extract_origin(base).unwrap()
}
