//! Path growth through the process controller

use crate::common::{definition, in_memory_storage};
use chrono::Utc;
use sumi_paths::graph::{Term, Triple};
use sumi_paths::paths::{ExtensionReport, Path};
use sumi_paths::process::{
    LogNotifier, Process, ProcessController, ProcessDefinition, ProcessStatus,
};
use sumi_paths::state::ResourceOutcome;
use sumi_paths::storage::{self, PathStore, ResourceStore, SharedStorage, TripleStore};

const S1: &str = "http://s1.org/s1";
const A: &str = "http://a.org/a";
const P: &str = "http://p.org/p";

/// Records a crawl of `url` returning `triples` and lets the controller react
fn crawled(
    controller: &ProcessController,
    storage: &SharedStorage,
    process: &Process,
    url: &str,
    triples: &[Triple],
) -> ExtensionReport {
    let stored = {
        let mut guard = storage::lock(storage).unwrap();
        let urls = vec![url.to_string()];
        guard.mark_resources_crawling(&urls, 1, Utc::now()).unwrap();
        let report = guard.upsert_triples(url, triples, Utc::now()).unwrap();
        guard
            .complete_resource(url, 1, &ResourceOutcome::done(triples.len() as u32), Utc::now())
            .unwrap();
        report.stored
    };
    controller
        .on_resource_crawled(process, url, &stored)
        .unwrap()
}

fn started(definition: &ProcessDefinition) -> (ProcessController, SharedStorage, Process) {
    let storage = in_memory_storage();
    let controller = ProcessController::new(storage.clone(), Box::new(LogNotifier));
    controller.create_process(definition).unwrap();
    let process = controller.start_next().unwrap().unwrap();
    (controller, storage, process)
}

#[test]
fn test_allowed_predicate_extends_seed() {
    let (controller, storage, process) = started(&definition(&[S1.to_string()], 2, 1));

    let report = crawled(
        &controller,
        &storage,
        &process,
        S1,
        &[Triple::new(S1, P, Term::named(A))],
    );
    assert_eq!(report.created, 1);

    let guard = storage::lock(&storage).unwrap();
    let heads = guard.open_paths_at(process.pid, A).unwrap();
    assert_eq!(heads.len(), 1);
    match &heads[0] {
        Path::Traversal(path) => {
            assert_eq!(path.nodes, vec![S1, A]);
            assert_eq!(path.predicates, vec![P]);
        }
        other => panic!("unexpected path {:?}", other),
    }
    assert_eq!(guard.count_process_triples(process.pid).unwrap(), 1);
}

#[test]
fn test_zero_props_yields_no_path() {
    let (controller, storage, process) = started(&definition(&[S1.to_string()], 2, 0));

    let report = crawled(
        &controller,
        &storage,
        &process,
        S1,
        &[Triple::new(S1, P, Term::named(A))],
    );
    assert_eq!(report.created, 0);

    let guard = storage::lock(&storage).unwrap();
    assert!(guard.open_paths_at(process.pid, A).unwrap().is_empty());
    assert_eq!(guard.count_process_triples(process.pid).unwrap(), 0);
    // The triple is still stored for later steps
    assert_eq!(guard.count_triples().unwrap(), 1);
}

#[test]
fn test_blacklisted_predicate_yields_no_path() {
    let definition: ProcessDefinition = toml::from_str(&format!(
        r#"
        seeds = ["{}"]

        [[steps]]
        max-path-length = 2
        max-path-props = 1
        predicates = {{ mode = "blacklist", list = ["{}"] }}
        "#,
        S1, P
    ))
    .unwrap();
    let (controller, storage, process) = started(&definition);

    let report = crawled(
        &controller,
        &storage,
        &process,
        S1,
        &[Triple::new(S1, P, Term::named(A))],
    );
    assert_eq!(report.created, 0);
    assert!(storage::lock(&storage)
        .unwrap()
        .open_paths_at(process.pid, A)
        .unwrap()
        .is_empty());
}

#[test]
fn test_new_step_reuses_stored_triples() {
    let (controller, storage, mut process) = started(&definition(&[S1.to_string()], 2, 0));
    crawled(
        &controller,
        &storage,
        &process,
        S1,
        &[Triple::new(S1, P, Term::named(A))],
    );
    assert!(controller.is_done(&process).unwrap());
    controller.complete(&mut process).unwrap();

    let raised = definition(&[S1.to_string()], 3, 1).steps[0].clone();
    controller.add_step(process.pid, &raised).unwrap();
    assert_eq!(
        controller.refresh(process.pid).unwrap().status,
        ProcessStatus::Queued
    );

    // Restarting re-extends with what the store already knows
    let process = controller.start_next().unwrap().unwrap();
    assert_eq!(process.current_step, 1);
    let guard = storage::lock(&storage).unwrap();
    assert_eq!(guard.open_paths_at(process.pid, A).unwrap().len(), 1);
    drop(guard);
    assert!(!controller.is_done(&process).unwrap());
}
