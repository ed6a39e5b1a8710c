#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use axjob::{
    Config, CreationFlags, JobError, JobResult, Process, ProcessBuilder, ProcessInformation,
    Registry, Stream,
};
use log::{LevelFilter, Log, Metadata, Record};

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        eprintln!("[{:>5} {}] {}", record.level(), record.target(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

#[ctor::ctor]
unsafe fn init_logger() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(LevelFilter::Warn);
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

pub fn registry() -> Arc<Registry> {
    Registry::new(Config::default())
}

pub fn new_init(registry: &Arc<Registry>) -> Arc<Process> {
    registry.new_init("init.exe")
}

pub fn spawn(creator: &Arc<Process>) -> ProcessInformation {
    ProcessBuilder::new("child.exe").spawn(creator).unwrap()
}

pub fn spawn_with(creator: &Arc<Process>, flags: CreationFlags) -> ProcessInformation {
    ProcessBuilder::new("child.exe")
        .flags(flags)
        .spawn(creator)
        .unwrap()
}

/// An in-memory byte pipe.
#[derive(Default)]
pub struct Pipe {
    buf: Mutex<VecDeque<u8>>,
    console: bool,
}

impl Stream for Pipe {
    fn read(&self, buf: &mut [u8]) -> JobResult<usize> {
        let mut data = self.buf.lock().unwrap();
        let n = buf.len().min(data.len());
        for (dst, src) in buf.iter_mut().zip(data.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> JobResult<usize> {
        self.buf.lock().unwrap().extend(buf);
        Ok(buf.len())
    }

    fn is_console(&self) -> bool {
        self.console
    }
}

/// A stream whose every operation fails.
pub struct Broken(pub u32);

impl Stream for Broken {
    fn read(&self, _buf: &mut [u8]) -> JobResult<usize> {
        Err(JobError::External(self.0))
    }

    fn write(&self, _buf: &[u8]) -> JobResult<usize> {
        Err(JobError::External(self.0))
    }
}

pub fn pipe() -> Arc<dyn Stream> {
    Arc::new(Pipe::default())
}

pub fn console() -> Arc<dyn Stream> {
    Arc::new(Pipe {
        buf: Mutex::default(),
        console: true,
    })
}
