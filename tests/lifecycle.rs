//! Container lifecycle against the fake hypervisor.

mod common;

use common::{Harness, SANDBOX_ID};
use std::sync::Arc;
use std::time::Duration;
use vmlet::manager::domain_name;
use vmlet::virt::DomainState;
use vmlet::{ContainerFilter, ContainerSpec, ContainerState, ErrorKind, MetadataStore, RedbStore};

fn spec(name: &str) -> ContainerSpec {
    ContainerSpec::new(SANDBOX_ID, name, common::IMAGE)
}

#[test]
fn test_end_to_end_lifecycle() {
    let h = Harness::new();
    let id = h.manager.create_container(&spec("web"), "/var/run/netns/sb1").unwrap();

    let created = h.manager.container_status(&id).unwrap();
    assert_eq!(created.state, ContainerState::Created);
    assert_eq!(created.created_at, common::epoch());
    assert!(created.started_at.is_none());

    h.clock.advance(Duration::from_secs(1));
    h.manager.start_container(&id).unwrap();
    let running = h.manager.container_status(&id).unwrap();
    assert_eq!(running.state, ContainerState::Running);
    assert_eq!(
        running.started_at.unwrap() - running.created_at,
        chrono::Duration::seconds(1)
    );
    assert_eq!(h.domains.domain_state(&domain_name(&id)), Some(DomainState::Running));

    h.manager.stop_container(&id, Duration::from_secs(30)).unwrap();
    let exited = h.manager.container_status(&id).unwrap();
    assert_eq!(exited.state, ContainerState::Exited);
    assert_eq!(exited.exit_code, Some(0));
    assert!(exited.finished_at.unwrap() >= exited.started_at.unwrap());

    h.manager.remove_container(&id).unwrap();
    assert!(h.manager.list_containers(None).unwrap().is_empty());
    assert!(!h.pool_volumes().contains(&format!("vmlet_root_{}", SANDBOX_ID)));
    assert!(h.domains.domain_names().is_empty());

    let name = domain_name(&id);
    let order: Vec<_> = [
        format!("domain conn: DefineDomain {}", name),
        format!("domain: Create {}", name),
        format!("domain: Shutdown {}", name),
        format!("domain: Undefine {}", name),
        format!("volumes: DeleteStorageVol vmlet_root_{}", SANDBOX_ID),
    ]
    .iter()
    .map(|c| h.rec.position(c).unwrap_or_else(|| panic!("missing call {}", c)))
    .collect();
    assert!(order.windows(2).all(|w| w[0] < w[1]), "calls out of order: {:?}", h.rec.calls());
}

#[test]
fn test_double_start_is_invalid_state() {
    let h = Harness::new();
    let id = h.manager.create_container(&spec("web"), "").unwrap();
    h.manager.start_container(&id).unwrap();
    let before = h.manager.container_status(&id).unwrap();

    h.clock.advance(Duration::from_secs(5));
    let err = h.manager.start_container(&id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let after = h.manager.container_status(&id).unwrap();
    assert_eq!(after.state, ContainerState::Running);
    assert_eq!(after.started_at, before.started_at);
    assert_eq!(h.rec.count(&format!("domain: Create {}", domain_name(&id))), 1);
}

#[test]
fn test_forced_stop_after_ignored_shutdown() {
    let h = Harness::with_blocking_clock();
    h.domains.set_ignore_shutdown(true);
    let id = h.manager.create_container(&spec("stubborn"), "").unwrap();
    h.manager.start_container(&id).unwrap();

    // Two poll cycles pass with the guest still up, then the deadline.
    let clock = Arc::clone(&h.clock);
    let driver = std::thread::spawn(move || {
        for step in [6, 6, 30] {
            clock.block_until(1);
            clock.advance(Duration::from_secs(step));
        }
    });

    h.manager.stop_container(&id, Duration::from_secs(30)).unwrap();
    driver.join().unwrap();

    let name = domain_name(&id);
    assert_eq!(h.rec.count(&format!("domain: Destroy {}", name)), 1);
    assert!(h.rec.count(&format!("domain: Shutdown {}", name)) >= 2);
    assert_eq!(h.domains.domain_state(&name), Some(DomainState::Shutoff));
    assert_eq!(h.manager.container_status(&id).unwrap().state, ContainerState::Exited);
}

#[test]
fn test_stop_survives_destroy_failures() {
    let h = Harness::new();
    h.domains.set_ignore_shutdown(true);
    h.domains.fail_destroy(2);
    let id = h.manager.create_container(&spec("web"), "").unwrap();
    h.manager.start_container(&id).unwrap();

    h.manager.stop_container(&id, Duration::from_secs(10)).unwrap();
    assert_eq!(h.rec.count(&format!("domain: Destroy {}", domain_name(&id))), 3);
    assert_eq!(h.manager.container_status(&id).unwrap().state, ContainerState::Exited);
}

#[test]
fn test_stop_gives_up_when_destroy_keeps_failing() {
    let h = Harness::new();
    h.domains.set_ignore_shutdown(true);
    h.domains.fail_destroy(10);
    let id = h.manager.create_container(&spec("web"), "").unwrap();
    h.manager.start_container(&id).unwrap();

    let err = h.manager.stop_container(&id, Duration::ZERO).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);
    // Metadata is untouched when the backend fails.
    assert_eq!(h.manager.container_status(&id).unwrap().state, ContainerState::Running);
}

#[test]
fn test_remove_requires_stopped_container() {
    let h = Harness::new();
    let id = h.manager.create_container(&spec("web"), "").unwrap();
    h.manager.start_container(&id).unwrap();

    assert_eq!(h.manager.remove_container(&id).unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(h.manager.list_containers(None).unwrap().len(), 1);
}

#[test]
fn test_remove_tolerates_missing_domain() {
    let h = Harness::new();
    let id = h.manager.create_container(&spec("web"), "").unwrap();
    {
        use vmlet::virt::DomainConnection;
        h.domains.lookup_domain_by_name(&domain_name(&id)).unwrap().undefine().unwrap();
    }

    h.manager.remove_container(&id).unwrap();
    assert!(h.manager.list_containers(None).unwrap().is_empty());
    assert!(h.pool_volumes().is_empty());
}

#[test]
fn test_unknown_container() {
    let h = Harness::new();
    for err in [
        h.manager.start_container("missing").unwrap_err(),
        h.manager.stop_container("missing", Duration::from_secs(1)).unwrap_err(),
        h.manager.remove_container("missing").unwrap_err(),
        h.manager.container_status("missing").unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::NotFound, "{}", err);
    }
}

#[test]
fn test_list_filters() {
    let h = Harness::new();
    let a = h.manager.create_container(&spec("a").with_label("tier", "web"), "").unwrap();
    let b = h.manager.create_container(&spec("b").with_label("tier", "db"), "").unwrap();
    h.manager.start_container(&b).unwrap();

    let all = h.manager.list_containers(None).unwrap();
    let ids: Vec<_> = all.iter().map(|c| c.id.clone()).collect();
    assert_eq!(ids, vec![a.clone(), b.clone()]);

    let running = h
        .manager
        .list_containers(Some(&ContainerFilter::by_state(ContainerState::Running)))
        .unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, b);

    let web = h
        .manager
        .list_containers(Some(&ContainerFilter::default().with_label("tier", "web")))
        .unwrap();
    assert_eq!(web.len(), 1);
    assert_eq!(web[0].id, a);

    let other = h
        .manager
        .list_containers(Some(&ContainerFilter::by_sandbox("sb2")))
        .unwrap();
    assert!(other.is_empty());
}

#[test]
fn test_concurrent_starts_run_once() {
    let h = Harness::new();
    let id = h.manager.create_container(&spec("web"), "").unwrap();

    let manager = &h.manager;
    let id_ref = id.as_str();
    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(move || manager.start_container(id_ref)))
            .collect();
        handles.into_iter().map(|t| t.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
    assert_eq!(h.rec.count(&format!("domain: Create {}", domain_name(&id))), 1);
}

#[test]
fn test_records_survive_restart_with_redb() {
    let tmp = tempfile::tempdir().unwrap();
    let store: Arc<dyn MetadataStore> = Arc::new(RedbStore::open(&tmp.path().join("meta.redb")).unwrap());
    let h = Harness::build(
        Arc::new(vmlet::FakeClock::auto_advancing(common::epoch())),
        Arc::clone(&store),
    );
    let id = h.manager.create_container(&spec("web"), "").unwrap();
    h.manager.start_container(&id).unwrap();
    drop(h);
    drop(store);

    let reopened = RedbStore::open(&tmp.path().join("meta.redb")).unwrap();
    let record = reopened.retrieve_container(&id).unwrap().unwrap();
    assert_eq!(record.state, ContainerState::Running);
    assert_eq!(record.domain_name, domain_name(&id));
    assert_eq!(reopened.list_sandboxes().unwrap().len(), 1);
}
