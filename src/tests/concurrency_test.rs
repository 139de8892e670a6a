use std::collections::HashSet;
use std::sync::Arc;

use tempfile::TempDir;

use super::test_utils::{fixed_environment, PackageAuditAction, PackageAuditRecord};
use crate::audit_sink_file::FileSink;
use crate::audit_sink_sled::SledSink;
use crate::auditing_service::AuditingService;
use crate::envelope::AuditEntry;
use crate::environment::{with_actor, ActorContext, ProcessEnvironment};

const TASKS: usize = 32;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_records_share_one_file_sink() {
    let tmp = TempDir::new().unwrap();
    let sink = FileSink::new(tmp.path()).unwrap();
    // Same actor, same timestamp, same path: only the disambiguator differs
    let service = Arc::new(AuditingService::with_environment(
        sink,
        fixed_environment("alice"),
    ));

    let mut handles = Vec::with_capacity(TASKS);
    for _ in 0..TASKS {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            let event = PackageAuditRecord::new("foo", "1.0.0", PackageAuditAction::Deleted);
            service.record(&event).await
        }));
    }

    let mut references = HashSet::new();
    for handle in handles {
        let reference = handle.await.unwrap().unwrap();
        let bytes = service.sink().fetch(&reference).await.unwrap();
        AuditEntry::from_slice(&bytes).unwrap();
        references.insert(reference);
    }
    assert_eq!(references.len(), TASKS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn spawned_records_keep_their_own_actor() {
    let tmp = TempDir::new().unwrap();
    let sink = SledSink::open(tmp.path().join("audit.db"), "audit").unwrap();
    let service = Arc::new(AuditingService::with_environment(
        sink,
        ProcessEnvironment::new("gallery"),
    ));

    let mut handles = Vec::with_capacity(TASKS);
    for i in 0..TASKS {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            let actor = format!("user-{i}");
            let event = PackageAuditRecord::new("foo", &i.to_string(), PackageAuditAction::Listed);
            let reference = with_actor(ActorContext::new(&actor), service.record(&event))
                .await
                .unwrap();
            (actor, reference)
        }));
    }

    for handle in handles {
        let (actor, reference) = handle.await.unwrap();
        let entry = AuditEntry::from_slice(&service.sink().fetch(&reference).await.unwrap())
            .unwrap();
        assert_eq!(entry.actor, actor);
        assert_eq!(entry.application, "gallery");
    }
    assert_eq!(service.sink().len(), TASKS);
}

#[tokio::test]
async fn spawn_record_captures_actor_before_spawning() {
    let tmp = TempDir::new().unwrap();
    let sink = FileSink::new(tmp.path()).unwrap();
    let service = Arc::new(AuditingService::with_environment(
        sink,
        ProcessEnvironment::new("gallery"),
    ));
    let event = PackageAuditRecord::new("foo", "1.0.0", PackageAuditAction::Unlisted);

    let handle = with_actor(ActorContext::new("dora").with_client_ip("10.1.2.3"), async {
        service.spawn_record(&event)
    })
    .await
    .unwrap();

    let reference = handle.await.unwrap().unwrap();
    let entry = AuditEntry::from_slice(&service.sink().fetch(&reference).await.unwrap()).unwrap();
    assert_eq!(entry.actor, "dora");
    assert_eq!(entry.client_ip_address.as_deref(), Some("10.1.2.3"));
}
