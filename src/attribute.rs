use crate::{HandleValue, JobError, JobResult, job_err};

/// A processor within a processor group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProcessorNumber {
    pub group: u16,
    pub number: u8,
}

/// Raw keys of the attributes understood by process creation.
pub mod keys {
    pub const PARENT_PROCESS: u32 = 0x0002_0000;
    pub const HANDLE_LIST: u32 = 0x0002_0002;
    pub const IDEAL_PROCESSOR: u32 = 0x0003_0005;
    pub const JOB_LIST: u32 = 0x0002_000D;
    pub const PSEUDOCONSOLE: u32 = 0x0002_0016;
}

/// One entry of an [`AttributeList`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    /// Process to create the child under instead of the caller.
    ParentProcess(HandleValue),
    /// The only handles the child may inherit.
    HandleList(Vec<HandleValue>),
    /// Jobs to assign the child to.
    JobList(Vec<HandleValue>),
    /// Preferred processor of the main thread.
    IdealProcessor(ProcessorNumber),
    /// Console stream the child is attached to.
    PseudoConsole(HandleValue),
}

const HANDLE_SIZE: usize = size_of::<usize>();

fn handle_at(bytes: &[u8]) -> HandleValue {
    let mut raw = [0; HANDLE_SIZE];
    raw.copy_from_slice(bytes);
    HandleValue(usize::from_ne_bytes(raw))
}

fn single_handle(key: u32, payload: &[u8]) -> JobResult<HandleValue> {
    if payload.len() != HANDLE_SIZE {
        return job_err!(BadLength, "attribute {key:#x} takes {HANDLE_SIZE} bytes");
    }
    Ok(handle_at(payload))
}

fn handle_array(key: u32, payload: &[u8]) -> JobResult<Vec<HandleValue>> {
    if payload.is_empty() || payload.len() % HANDLE_SIZE != 0 {
        return job_err!(BadLength, "attribute {key:#x} got {} bytes", payload.len());
    }
    Ok(payload.chunks_exact(HANDLE_SIZE).map(handle_at).collect())
}

impl Attribute {
    /// The raw key of the attribute.
    pub fn key(&self) -> u32 {
        match self {
            Self::ParentProcess(_) => keys::PARENT_PROCESS,
            Self::HandleList(_) => keys::HANDLE_LIST,
            Self::JobList(_) => keys::JOB_LIST,
            Self::IdealProcessor(_) => keys::IDEAL_PROCESSOR,
            Self::PseudoConsole(_) => keys::PSEUDOCONSOLE,
        }
    }

    /// Decodes a raw key and payload.
    pub fn decode(key: u32, payload: &[u8]) -> JobResult<Self> {
        match key {
            keys::PARENT_PROCESS => single_handle(key, payload).map(Self::ParentProcess),
            keys::PSEUDOCONSOLE => single_handle(key, payload).map(Self::PseudoConsole),
            keys::HANDLE_LIST => handle_array(key, payload).map(Self::HandleList),
            keys::JOB_LIST => handle_array(key, payload).map(Self::JobList),
            keys::IDEAL_PROCESSOR => match *payload {
                [lo, hi, number, _reserved] => Ok(Self::IdealProcessor(ProcessorNumber {
                    group: u16::from_le_bytes([lo, hi]),
                    number,
                })),
                _ => job_err!(BadLength, "ideal processor takes 4 bytes"),
            },
            _ => job_err!(NotSupported, "unknown attribute {key:#x}"),
        }
    }
}

/// An ordered list of creation attributes with a fixed number of slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeList {
    capacity: usize,
    attributes: Vec<Attribute>,
}

impl AttributeList {
    const HEADER_SIZE: usize = 24;
    const SLOT_SIZE: usize = 24;

    /// Bytes of storage a list with `count` slots needs.
    pub fn required_size(count: usize) -> usize {
        Self::HEADER_SIZE + count * Self::SLOT_SIZE
    }

    /// An empty list with `count` slots.
    pub fn new(count: usize) -> Self {
        Self {
            capacity: count,
            attributes: Vec::with_capacity(count),
        }
    }

    /// An empty list with `count` slots, placed in `buffer_len` bytes of
    /// storage.
    pub fn initialize(count: usize, buffer_len: usize) -> JobResult<Self> {
        let required = Self::required_size(count);
        if buffer_len < required {
            log::debug!("[JobError::InsufficientBuffer] attribute list needs {required} bytes");
            return Err(JobError::InsufficientBuffer { required });
        }
        Ok(Self::new(count))
    }

    /// Registers a typed attribute.
    pub fn update(&mut self, attribute: Attribute) -> JobResult {
        let key = attribute.key();
        if self.get(key).is_some() {
            return job_err!(AlreadyExists, "attribute {key:#x} already set");
        }
        if self.attributes.len() >= self.capacity {
            return job_err!(InvalidParameter, "attribute list holds {} entries", self.capacity);
        }
        let empty = match &attribute {
            Attribute::HandleList(values) | Attribute::JobList(values) => values.is_empty(),
            _ => false,
        };
        if empty {
            return job_err!(BadLength, "attribute {key:#x} is empty");
        }
        self.attributes.push(attribute);
        Ok(())
    }

    /// Decodes and registers a raw attribute.
    pub fn update_raw(&mut self, key: u32, payload: &[u8]) -> JobResult {
        let attribute = Attribute::decode(key, payload)?;
        self.update(attribute)
    }

    /// The attribute registered under `key`.
    pub fn get(&self, key: u32) -> Option<&Attribute> {
        self.attributes.iter().find(|attribute| attribute.key() == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn parent_process(&self) -> Option<HandleValue> {
        match self.get(keys::PARENT_PROCESS) {
            Some(Attribute::ParentProcess(value)) => Some(*value),
            _ => None,
        }
    }

    pub(crate) fn handle_list(&self) -> Option<&[HandleValue]> {
        match self.get(keys::HANDLE_LIST) {
            Some(Attribute::HandleList(values)) => Some(values),
            _ => None,
        }
    }

    pub(crate) fn job_list(&self) -> &[HandleValue] {
        match self.get(keys::JOB_LIST) {
            Some(Attribute::JobList(values)) => values,
            _ => &[],
        }
    }

    pub(crate) fn ideal_processor(&self) -> Option<ProcessorNumber> {
        match self.get(keys::IDEAL_PROCESSOR) {
            Some(Attribute::IdealProcessor(number)) => Some(*number),
            _ => None,
        }
    }

    pub(crate) fn pseudo_console(&self) -> Option<HandleValue> {
        match self.get(keys::PSEUDOCONSOLE) {
            Some(Attribute::PseudoConsole(value)) => Some(*value),
            _ => None,
        }
    }
}
