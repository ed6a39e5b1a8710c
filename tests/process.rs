use std::{sync::Arc, time::Duration};

use axjob::{
    Access, Config, CreationFlags, JobError, ProcessBuilder, ProcessState, Registry, STILL_ACTIVE,
    StartupInfo, StaticLoader, Subsystem,
};

mod common;
use common::*;

#[test]
fn test_spawn() {
    let registry = registry();
    let init = new_init(&registry);

    let info = ProcessBuilder::new("child.exe -x").spawn(&init).unwrap();
    let child = &info.process;
    assert_eq!(child.parent_pid(), Some(init.pid()));
    assert_eq!(child.image(), "child.exe");
    assert_eq!(child.command_line(), "child.exe -x");
    assert_eq!(child.state(), ProcessState::Running);
    assert!(child.imports_resolved());
    assert_eq!(child.exit_code(), STILL_ACTIVE);
    assert_eq!(child.startup().title.as_deref(), Some("child.exe"));
    assert_eq!(child.thread_count(), 1);
    assert!(Arc::ptr_eq(&info.thread, &child.main_thread().unwrap()));

    assert_eq!(init.handles().len(), 2);
    let opened = init
        .process_from_handle(info.process_handle, Access::QUERY)
        .unwrap();
    assert!(Arc::ptr_eq(&opened, child));
    let thread = init
        .thread_from_handle(info.thread_handle, Access::QUERY)
        .unwrap();
    assert!(Arc::ptr_eq(&thread, &info.thread));
}

#[test]
fn test_suspended() {
    let registry = registry();
    let init = new_init(&registry);

    let info = spawn_with(&init, CreationFlags::SUSPENDED);
    let child = &info.process;
    assert_eq!(child.state(), ProcessState::Suspended);
    assert!(!child.imports_resolved());
    assert_eq!(info.thread.exit_code(), STILL_ACTIVE);
    assert_eq!(child.exit(0), Err(JobError::AccessDenied));
    assert_eq!(info.thread.exit(0), Err(JobError::AccessDenied));

    assert_eq!(info.thread.resume(), Ok(1));
    assert_eq!(child.state(), ProcessState::Running);
    assert!(child.imports_resolved());

    assert_eq!(info.thread.exit(0), Ok(true));
    assert_ne!(info.thread.exit_code(), STILL_ACTIVE);
    assert_eq!(child.exit_code(), 0);
    assert_eq!(child.state(), ProcessState::Terminated);
}

#[test]
fn test_terminate_suspended() {
    let registry = registry();
    let init = new_init(&registry);

    let info = spawn_with(&init, CreationFlags::SUSPENDED);
    assert!(info.process.terminate(5));
    assert_eq!(info.process.exit_code(), 5);
    assert_eq!(info.thread.exit_code(), 5);

    assert!(!info.process.terminate(6));
    assert_eq!(info.process.exit_code(), 5);
    assert_eq!(info.thread.resume(), Err(JobError::AccessDenied));
}

#[test]
fn test_suspend_count() {
    let registry = registry();
    let init = new_init(&registry);

    let thread = spawn(&init).thread;
    assert_eq!(thread.resume(), Ok(0));
    assert_eq!(thread.suspend(), Ok(0));
    assert_eq!(thread.suspend(), Ok(1));
    assert_eq!(thread.resume(), Ok(2));
    assert_eq!(thread.exit(0), Err(JobError::AccessDenied));
    assert_eq!(thread.resume(), Ok(1));
    assert_eq!(thread.suspend_count(), 0);
    assert_eq!(thread.exit(0), Ok(true));
}

#[test]
fn test_threads() {
    let registry = registry();
    let init = new_init(&registry);

    let child = spawn(&init).process;
    let extra = child.create_thread(false).unwrap();
    assert_eq!(child.thread_count(), 2);

    assert_eq!(extra.exit(3), Ok(false));
    assert_eq!(extra.exit_code(), 3);
    assert_eq!(child.exit_code(), STILL_ACTIVE);
    assert_eq!(extra.exit(3), Err(JobError::AccessDenied));

    let main = child.main_thread().unwrap();
    assert_eq!(main.exit(7), Ok(true));
    assert_eq!(child.exit_code(), 7);
    assert_eq!(child.state(), ProcessState::Terminated);
    assert_eq!(child.thread_count(), 0);
    assert_eq!(child.create_thread(false).err(), Some(JobError::AccessDenied));
}

#[test]
fn test_terminate_ends_threads() {
    let registry = registry();
    let init = new_init(&registry);

    let info = spawn(&init);
    let extra = info.process.create_thread(true).unwrap();
    info.process.terminate(9);
    assert_eq!(info.thread.exit_code(), 9);
    assert_eq!(extra.exit_code(), 9);
    extra.wait(Some(Duration::ZERO)).unwrap();
}

#[test]
fn test_wait() {
    let registry = registry();
    let init = new_init(&registry);

    let child = spawn(&init).process;
    assert_eq!(
        child.wait(Some(Duration::from_millis(10))),
        Err(JobError::Timeout)
    );

    std::thread::scope(|s| {
        let waiters: Vec<_> = (0..4).map(|_| s.spawn(|| child.wait(None))).collect();
        std::thread::sleep(Duration::from_millis(10));
        assert!(child.terminate(1));
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Ok(()));
        }
    });
    assert_eq!(child.wait(Some(Duration::ZERO)), Ok(()));
}

#[test]
fn test_terminate_race() {
    let registry = registry();
    let init = new_init(&registry);

    for _ in 0..20 {
        let child = spawn(&init).process;
        let won = std::thread::scope(|s| {
            let a = s.spawn(|| child.terminate(1));
            let b = s.spawn(|| child.exit(2).is_ok() && child.exit_code() == 2);
            (a.join().unwrap(), b.join().unwrap())
        });
        let code = child.exit_code();
        assert!(code == 1 || code == 2);
        if won.0 {
            assert_eq!(code, 1);
        }
    }
}

#[test]
fn test_image_lookup() {
    let loader = StaticLoader::new()
        .with_image(r"C:\bin\tool.exe", Subsystem::Console)
        .with_image("gui.exe", Subsystem::Gui)
        .with_directory(r"C:\work");
    let registry = Registry::new(Config::default().with_loader(loader));
    let init = registry.new_init("init.exe");

    let info = ProcessBuilder::new(r"C:\bin\tool -v").spawn(&init).unwrap();
    assert_eq!(info.process.image(), r"C:\bin\tool.exe");
    assert_eq!(info.process.subsystem(), Subsystem::Console);

    let info = ProcessBuilder::new("ignored").image("gui.exe").spawn(&init).unwrap();
    assert_eq!(info.process.subsystem(), Subsystem::Gui);

    let before = registry.snapshot().count();
    assert_eq!(
        ProcessBuilder::new("missing.exe").spawn(&init).err(),
        Some(JobError::NotFound)
    );
    assert_eq!(
        ProcessBuilder::new("  ").spawn(&init).err(),
        Some(JobError::InvalidParameter)
    );
    assert_eq!(
        ProcessBuilder::new("x")
            .image(r"C:\bin\tool.exe")
            .startup(StartupInfo::new().with_current_directory(r"C:\nowhere"))
            .spawn(&init)
            .err(),
        Some(JobError::InvalidDirectory)
    );
    assert_eq!(registry.snapshot().count(), before);

    let info = ProcessBuilder::new("x")
        .image(r"C:\bin\tool.exe")
        .startup(StartupInfo::new().with_current_directory(r"C:\work"))
        .spawn(&init)
        .unwrap();
    assert_eq!(info.process.current_directory(), r"C:\work");
}

#[test]
fn test_creation_flags() {
    let registry = registry();
    let init = new_init(&registry);

    assert_eq!(
        ProcessBuilder::new("child.exe")
            .flags(CreationFlags::DETACHED | CreationFlags::NEW_CONSOLE)
            .spawn(&init)
            .err(),
        Some(JobError::InvalidParameter)
    );
    assert_eq!(
        ProcessBuilder::new("child.exe")
            .flags(CreationFlags::from_bits_retain(0x8000_0000))
            .spawn(&init)
            .err(),
        Some(JobError::InvalidParameter)
    );

    assert!(init.console().is_some());
    let inherited = spawn(&init).process;
    assert_eq!(inherited.console(), init.console());
    let detached = spawn_with(&init, CreationFlags::DETACHED).process;
    assert_eq!(detached.console(), None);
    let fresh = spawn_with(&init, CreationFlags::NEW_CONSOLE).process;
    assert!(fresh.console().is_some());
    assert_ne!(fresh.console(), init.console());
}

#[test]
fn test_environment() {
    let registry = registry();
    let init = new_init(&registry);
    init.set_env_var("PATH", "/bin");

    let child = spawn(&init).process;
    assert_eq!(child.env_var("PATH").as_deref(), Some("/bin"));
    assert_eq!(child.current_directory(), init.current_directory());

    let startup = StartupInfo::new()
        .with_environment(vec![("HOME".into(), "/root".into())])
        .with_title("worker")
        .with_show_window(3);
    let child = ProcessBuilder::new("child.exe")
        .startup(startup.clone())
        .spawn(&init)
        .unwrap()
        .process;
    assert_eq!(child.env_var("PATH"), None);
    assert_eq!(child.env_var("HOME").as_deref(), Some("/root"));
    assert_eq!(child.startup(), &startup);
}
