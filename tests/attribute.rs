use axjob::{
    Access, Attribute, AttributeList, HandleFlags, HandleValue, JobError, ProcessBuilder,
    ProcessorNumber, StdHandle, attribute_keys as keys,
};

mod common;
use common::*;

fn with(attribute: Attribute) -> AttributeList {
    let mut attributes = AttributeList::new(1);
    attributes.update(attribute).unwrap();
    attributes
}

#[test]
fn test_list() {
    assert_eq!(AttributeList::required_size(2), 72);
    assert_eq!(
        AttributeList::initialize(2, 71).err(),
        Some(JobError::InsufficientBuffer { required: 72 })
    );
    let mut attributes = AttributeList::initialize(2, 72).unwrap();
    assert_eq!(attributes.capacity(), 2);
    assert!(attributes.is_empty());

    attributes
        .update_raw(keys::PARENT_PROCESS, &usize::MAX.to_ne_bytes())
        .unwrap();
    assert_eq!(
        attributes.get(keys::PARENT_PROCESS),
        Some(&Attribute::ParentProcess(HandleValue::CURRENT_PROCESS))
    );
    assert_eq!(
        attributes.update(Attribute::ParentProcess(HandleValue(4))),
        Err(JobError::AlreadyExists)
    );
    assert_eq!(
        attributes.update(Attribute::HandleList(Vec::new())),
        Err(JobError::BadLength)
    );
    attributes
        .update(Attribute::IdealProcessor(ProcessorNumber::default()))
        .unwrap();
    assert_eq!(
        attributes.update(Attribute::PseudoConsole(HandleValue(4))),
        Err(JobError::InvalidParameter)
    );
    assert_eq!(
        attributes.iter().map(Attribute::key).collect::<Vec<_>>(),
        [keys::PARENT_PROCESS, keys::IDEAL_PROCESSOR]
    );
}

#[test]
fn test_parent_process() {
    let registry = registry();
    let init = new_init(&registry);
    let job = registry.create_job(None);
    let info = spawn(&init);
    let parent = &info.process;
    job.assign(parent).unwrap();
    let pipe_value = parent
        .insert_handle(pipe(), Access::ALL, HandleFlags::INHERIT)
        .unwrap();

    let child = ProcessBuilder::new("child.exe")
        .inherit_handles(true)
        .attributes(with(Attribute::ParentProcess(info.process_handle)))
        .spawn(&init)
        .unwrap();
    assert_eq!(child.process.parent_pid(), Some(parent.pid()));
    assert!(job.is_member(&child.process));
    assert_eq!(child.process.handles().values(), [pipe_value]);
    assert!(init.handles().contains(child.process_handle));
    assert!(!parent.handles().contains(child.process_handle));

    let child = ProcessBuilder::new("child.exe")
        .attributes(with(Attribute::ParentProcess(HandleValue::CURRENT_PROCESS)))
        .spawn(&init)
        .unwrap()
        .process;
    assert_eq!(child.parent_pid(), Some(init.pid()));
    assert!(!child.is_in_job(None));
}

#[test]
fn test_parent_process_rejected() {
    let registry = registry();
    let init = new_init(&registry);
    let info = spawn(&init);
    let query_only = init
        .insert_handle(info.process.clone(), Access::QUERY, HandleFlags::empty())
        .unwrap();
    let stale = init
        .insert_handle(info.process.clone(), Access::ALL, HandleFlags::empty())
        .unwrap();
    init.close_handle(stale).unwrap();
    let stream = init
        .insert_handle(pipe(), Access::ALL, HandleFlags::empty())
        .unwrap();

    let before = registry.snapshot().count();
    for value in [query_only, stale, stream, HandleValue::NULL] {
        assert_eq!(
            ProcessBuilder::new("child.exe")
                .attributes(with(Attribute::ParentProcess(value)))
                .spawn(&init)
                .err(),
            Some(JobError::InvalidHandle)
        );
    }

    info.process.terminate(0);
    assert_eq!(
        ProcessBuilder::new("child.exe")
            .attributes(with(Attribute::ParentProcess(info.process_handle)))
            .spawn(&init)
            .err(),
        Some(JobError::AccessDenied)
    );
    assert_eq!(registry.snapshot().count(), before);
}

#[test]
fn test_handle_list() {
    let registry = registry();
    let init = new_init(&registry);
    let a = init
        .insert_handle(pipe(), Access::ALL, HandleFlags::INHERIT)
        .unwrap();
    let b = init
        .insert_handle(pipe(), Access::ALL, HandleFlags::INHERIT)
        .unwrap();
    let private = init
        .insert_handle(pipe(), Access::ALL, HandleFlags::empty())
        .unwrap();

    let child = ProcessBuilder::new("child.exe")
        .inherit_handles(true)
        .attributes(with(Attribute::HandleList(vec![b])))
        .spawn(&init)
        .unwrap()
        .process;
    assert_eq!(child.handles().values(), [b]);
    assert!(!child.handles().contains(a));

    let child = ProcessBuilder::new("child.exe")
        .attributes(with(Attribute::HandleList(vec![a, b])))
        .spawn(&init)
        .unwrap()
        .process;
    assert!(child.handles().is_empty());

    assert_eq!(
        ProcessBuilder::new("child.exe")
            .inherit_handles(true)
            .attributes(with(Attribute::HandleList(vec![a, private])))
            .spawn(&init)
            .err(),
        Some(JobError::InvalidParameter)
    );
    assert_eq!(
        ProcessBuilder::new("child.exe")
            .inherit_handles(true)
            .attributes(with(Attribute::HandleList(vec![HandleValue(0x400)])))
            .spawn(&init)
            .err(),
        Some(JobError::InvalidHandle)
    );
}

#[test]
fn test_ideal_processor() {
    let registry = registry();
    let init = new_init(&registry);
    let number = ProcessorNumber { group: 1, number: 6 };

    let info = ProcessBuilder::new("child.exe")
        .attributes(with(Attribute::IdealProcessor(number)))
        .spawn(&init)
        .unwrap();
    assert_eq!(info.thread.ideal_processor(), Some(number));
    let extra = info.process.create_thread(false).unwrap();
    assert_eq!(extra.ideal_processor(), None);
    assert_eq!(spawn(&init).thread.ideal_processor(), None);
}

#[test]
fn test_pseudo_console() {
    let registry = registry();
    let init = new_init(&registry);
    let terminal = init
        .insert_handle(console(), Access::ALL, HandleFlags::empty())
        .unwrap();

    let child = ProcessBuilder::new("child.exe")
        .attributes(with(Attribute::PseudoConsole(terminal)))
        .spawn(&init)
        .unwrap()
        .process;
    assert!(child.console().is_some());
    assert_ne!(child.console(), init.console());
    assert_eq!(child.handles().len(), 3);

    let output = child.std_handle(StdHandle::Output);
    assert!(!output.is_null());
    child.write_handle(output, b"prompt").unwrap();
    let mut buf = [0; 6];
    assert_eq!(init.read_handle(terminal, &mut buf), Ok(6));
    assert_eq!(&buf, b"prompt");

    let info = spawn(&init);
    assert_eq!(
        ProcessBuilder::new("child.exe")
            .attributes(with(Attribute::PseudoConsole(info.process_handle)))
            .spawn(&init)
            .err(),
        Some(JobError::InvalidHandle)
    );
}
