use std::sync::Arc;

use axjob::{Config, CreationFlags, JobError, ProcessState, Registry};

mod common;
use common::*;

#[test]
fn test_snapshot() {
    let registry = Registry::new(Config::default().with_first_pid(100));
    let init = new_init(&registry);
    let a = spawn(&init).process;
    let b = spawn_with(&a, CreationFlags::SUSPENDED).process;

    let entries: Vec<_> = registry.snapshot().collect();
    assert_eq!(
        entries.iter().map(|entry| entry.pid).collect::<Vec<_>>(),
        [init.pid(), a.pid(), b.pid()]
    );
    assert_eq!(entries[0].parent_pid, None);
    assert_eq!(entries[1].parent_pid, Some(init.pid()));
    assert_eq!(entries[2].parent_pid, Some(a.pid()));
    assert_eq!(entries[2].state, ProcessState::Suspended);
    assert_eq!(entries[1].image, "child.exe");
    assert_eq!(entries[1].thread_count, 1);
    assert_eq!(init.pid(), 100);
}

#[test]
fn test_find_by_pid() {
    let registry = registry();
    let init = new_init(&registry);
    let child = spawn(&init).process;

    assert!(Arc::ptr_eq(&registry.find_by_pid(child.pid()).unwrap(), &child));
    assert_eq!(registry.find_by_pid(1).err(), Some(JobError::NotFound));
    assert_eq!(registry.running_count(), 2);
}

#[test]
fn test_zombie() {
    let registry = registry();
    let init = new_init(&registry);
    let info = spawn(&init);
    let pid = info.process.pid();

    info.process.terminate(4);
    assert_eq!(registry.running_count(), 1);
    let entry = registry
        .snapshot()
        .find(|entry| entry.pid == pid)
        .unwrap();
    assert_eq!(entry.state, ProcessState::Terminated);
    assert_eq!(entry.thread_count, 0);
    assert_eq!(registry.find_by_pid(pid).unwrap().exit_code(), 4);

    init.close_handle(info.process_handle).unwrap();
    init.close_handle(info.thread_handle).unwrap();
    drop(info);
    assert_eq!(registry.find_by_pid(pid).err(), Some(JobError::NotFound));
    assert_eq!(registry.snapshot().len(), 1);
}

#[test]
fn test_snapshot_is_frozen() {
    let registry = registry();
    let init = new_init(&registry);
    let mut snapshot = registry.snapshot();
    let child = spawn(&init).process;

    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.next().map(|entry| entry.pid), Some(init.pid()));
    assert!(snapshot.next().is_none());
    child.terminate(0);
    assert_eq!(registry.snapshot().len(), 2);
}
