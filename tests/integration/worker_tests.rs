//! Local worker against a wiremock server, driven over the bus

use crate::common::{nt_link, nt_literal, test_config, FOAF_KNOWS, FOAF_NAME};
use std::time::Duration;
use sumi_paths::bus::{
    decode_worker_frame, message_bus, CrawlDomain, FetchErrorKind, JobSpec, ManagerEndpoint,
    ManagerMessage, ResultStatus, WorkerMessage,
};
use sumi_paths::graph::Term;
use sumi_paths::worker::LocalWorker;
use tokio::sync::oneshot;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    manager: ManagerEndpoint,
    stop: oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

fn start_worker() -> Harness {
    let config = test_config(100, 1);
    let (manager, connector) = message_bus();
    let worker = LocalWorker::new(
        connector.connect("w1").unwrap(),
        &config.user_agent,
        config.worker.clone(),
    )
    .unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        worker
            .run(async {
                let _ = stopped.await;
            })
            .await
            .unwrap();
    });
    Harness {
        manager,
        stop,
        handle,
    }
}

impl Harness {
    fn send(&self, message: ManagerMessage) {
        self.manager.outbound().send_to("w1", &message).unwrap();
    }

    async fn next(&mut self) -> WorkerMessage {
        next_message(&mut self.manager).await
    }

    async fn shutdown(self) -> Vec<u64> {
        let Harness {
            mut manager,
            stop,
            handle,
        } = self;
        stop.send(()).unwrap();
        let ongoing = loop {
            if let WorkerMessage::Shutdown { ongoing_jobs } = next_message(&mut manager).await {
                break ongoing_jobs;
            }
        };
        handle.await.unwrap();
        ongoing
    }
}

async fn next_message(manager: &mut ManagerEndpoint) -> WorkerMessage {
    let frame = tokio::time::timeout(Duration::from_secs(10), manager.recv_frame())
        .await
        .expect("worker answered in time")
        .expect("bus open");
    assert_eq!(frame.worker_id, "w1");
    decode_worker_frame(&frame).unwrap()
}

fn robots_job(job_id: u64, origin: &str) -> ManagerMessage {
    ManagerMessage::DoJob(JobSpec::RobotsCheck {
        job_id,
        origin: origin.to_string(),
    })
}

#[tokio::test]
async fn test_robots_check_reports_policy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nCrawl-delay: 2\n"))
        .mount(&server)
        .await;

    let mut h = start_worker();
    h.send(robots_job(1, &server.uri()));

    let WorkerMessage::JobDone(done) = h.next().await else {
        panic!("expected jobDone");
    };
    assert_eq!(done.job_id, 1);
    assert_eq!(done.status, ResultStatus::Ok);
    let robots = done.details.and_then(|d| d.robots_txt).unwrap();
    assert!(robots.contains("Crawl-delay: 2"));

    h.shutdown().await;
}

#[tokio::test]
async fn test_missing_robots_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut h = start_worker();
    h.send(robots_job(7, &server.uri()));

    let WorkerMessage::JobDone(done) = h.next().await else {
        panic!("expected jobDone");
    };
    assert_eq!(done.status, ResultStatus::Error);
    let err = done.err.unwrap();
    assert_eq!(err.kind, FetchErrorKind::HttpStatus { status: 404 });
    assert!(err.is_not_found());

    h.shutdown().await;
}

#[tokio::test]
async fn test_domain_crawl_reports_each_resource() {
    let server = MockServer::start().await;
    let base = server.uri();
    let alice = format!("{}/alice", base);
    let bob = format!("{}/bob", base);
    let page = format!("{}/page", base);

    Mock::given(method("GET"))
        .and(path("/alice"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(
                    nt_link(&alice, FOAF_KNOWS, &bob) + &nt_literal(&alice, FOAF_NAME, "Alice"),
                )
                .insert_header("content-type", "application/n-triples; charset=utf-8"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html></html>")
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;

    let mut h = start_worker();
    h.send(ManagerMessage::DoJob(JobSpec::DomainCrawl {
        job_id: 3,
        domain: CrawlDomain {
            origin: base.clone(),
            crawl_delay_ms: 10,
        },
        resources: vec![alice.clone(), page.clone()],
    }));

    let WorkerMessage::ResourceDone(first) = h.next().await else {
        panic!("expected resourceDone");
    };
    assert_eq!(first.url, alice);
    assert_eq!(first.status, ResultStatus::Ok);
    assert_eq!(first.triples.len(), 2);
    assert_eq!(first.triples[0].object, Term::named(bob.as_str()));
    assert!(first.fetched_at.is_some());

    let WorkerMessage::ResourceDone(second) = h.next().await else {
        panic!("expected resourceDone");
    };
    assert_eq!(second.url, page);
    assert_eq!(second.status, ResultStatus::Error);
    assert_eq!(
        second.err.unwrap().kind,
        FetchErrorKind::UnsupportedContentType
    );

    let WorkerMessage::JobDone(done) = h.next().await else {
        panic!("expected jobDone");
    };
    assert_eq!(done.job_id, 3);
    assert_eq!(done.status, ResultStatus::Ok);
    assert_eq!(done.details.unwrap().resources, 2);

    h.shutdown().await;
}

#[tokio::test]
async fn test_second_job_for_busy_origin_is_refused() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("User-agent: *\n")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let mut h = start_worker();
    h.send(robots_job(10, &server.uri()));
    h.send(robots_job(11, &server.uri()));

    assert_eq!(
        h.next().await,
        WorkerMessage::AlreadyBeingDone { job_id: 11 }
    );

    let WorkerMessage::JobDone(done) = h.next().await else {
        panic!("expected jobDone");
    };
    assert_eq!(done.job_id, 10);

    h.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_reports_running_jobs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let mut h = start_worker();
    h.send(robots_job(21, &server.uri()));

    // Capacity reflects the running job
    h.send(ManagerMessage::AskCurCap);
    let WorkerMessage::RepCurCap(capacity) = h.next().await else {
        panic!("expected repCurCap");
    };
    let config = test_config(100, 1);
    assert_eq!(
        capacity.robots_check.capacity,
        config.worker.robots_check_capacity - 1
    );

    assert_eq!(h.shutdown().await, vec![21]);
}
