//! In-memory ingest endpoint and byte sources for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use bytes::Bytes;
use mediaferry_ingest::{ChunkOutcome, CreatedResource, IngestEndpoint, IngestError, IngestFuture};
use mediaferry_protocol::UploadMetadata;
use mediaferry_transfer::{TransferError, UploadSource};
use tokio::sync::Notify;

/// Scripted misbehaviour for the next call of one kind.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Fault {
    /// Behaves normally.
    Pass,
    Timeout,
    Server(u16),
    Client(u16),
    NotFound,
    /// Never answers.
    Hang,
    /// Acknowledges without committing anything.
    NoProgress,
    /// Answers with an offset conflict.
    Conflict,
}

impl Fault {
    fn into_error(self) -> IngestError {
        match self {
            Fault::Timeout => IngestError::Timeout,
            Fault::Server(status) => IngestError::Server {
                status,
                body: String::new(),
            },
            Fault::Client(status) => IngestError::Client {
                status,
                body: String::new(),
            },
            _ => IngestError::NotFound,
        }
    }
}

#[derive(Default)]
struct Resource {
    total: u64,
    committed: u64,
    data: Option<Vec<u8>>,
}

#[derive(Default)]
struct Inner {
    resources: HashMap<String, Resource>,
    next_id: u32,
    record_data: bool,
    max_accept: Option<usize>,
    create_faults: VecDeque<Fault>,
    query_faults: VecDeque<Fault>,
    chunk_faults: VecDeque<Fault>,
    transfers: Vec<(u64, usize)>,
    chunk_attempts: usize,
    queries: usize,
    released: Vec<String>,
    metadata: Vec<UploadMetadata>,
}

#[derive(Default)]
pub(crate) struct MockEndpoint {
    inner: Mutex<Inner>,
    /// Signalled whenever a call starts hanging.
    pub(crate) hung: Notify,
}

impl MockEndpoint {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Keeps received bytes so tests can compare them with the source.
    pub(crate) fn recording() -> Self {
        let mock = Self::default();
        mock.inner.lock().unwrap().record_data = true;
        mock
    }

    /// Accepts at most `max` bytes per transfer.
    pub(crate) fn with_max_accept(self, max: usize) -> Self {
        self.inner.lock().unwrap().max_accept = Some(max);
        self
    }

    pub(crate) fn insert_resource(&self, handle: &str, total: u64, committed: u64) {
        self.inner.lock().unwrap().resources.insert(
            handle.to_string(),
            Resource {
                total,
                committed,
                data: None,
            },
        );
    }

    pub(crate) fn set_committed(&self, handle: &str, committed: u64) {
        if let Some(r) = self.inner.lock().unwrap().resources.get_mut(handle) {
            r.committed = committed;
        }
    }

    pub(crate) fn remove_resource(&self, handle: &str) {
        self.inner.lock().unwrap().resources.remove(handle);
    }

    pub(crate) fn fail_creates(&self, faults: impl IntoIterator<Item = Fault>) {
        self.inner.lock().unwrap().create_faults.extend(faults);
    }

    pub(crate) fn fail_queries(&self, faults: impl IntoIterator<Item = Fault>) {
        self.inner.lock().unwrap().query_faults.extend(faults);
    }

    pub(crate) fn fail_chunks(&self, faults: impl IntoIterator<Item = Fault>) {
        self.inner.lock().unwrap().chunk_faults.extend(faults);
    }

    /// `(offset, len)` of every transfer the server applied.
    pub(crate) fn transfers(&self) -> Vec<(u64, usize)> {
        self.inner.lock().unwrap().transfers.clone()
    }

    /// Every transfer call, including faulted ones.
    pub(crate) fn chunk_attempts(&self) -> usize {
        self.inner.lock().unwrap().chunk_attempts
    }

    pub(crate) fn queries(&self) -> usize {
        self.inner.lock().unwrap().queries
    }

    pub(crate) fn committed(&self, handle: &str) -> Option<u64> {
        self.inner
            .lock()
            .unwrap()
            .resources
            .get(handle)
            .map(|r| r.committed)
    }

    pub(crate) fn data(&self, handle: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .resources
            .get(handle)
            .and_then(|r| r.data.clone())
    }

    pub(crate) fn released(&self) -> Vec<String> {
        self.inner.lock().unwrap().released.clone()
    }

    pub(crate) fn created_metadata(&self) -> Vec<UploadMetadata> {
        self.inner.lock().unwrap().metadata.clone()
    }

    pub(crate) fn resource_count(&self) -> usize {
        self.inner.lock().unwrap().resources.len()
    }

    async fn hang<T>(&self) -> Result<T, IngestError> {
        self.hung.notify_one();
        std::future::pending().await
    }
}

impl IngestEndpoint for MockEndpoint {
    fn create<'a>(
        &'a self,
        total_bytes: u64,
        metadata: &'a UploadMetadata,
    ) -> IngestFuture<'a, CreatedResource> {
        Box::pin(async move {
            let fault = self.inner.lock().unwrap().create_faults.pop_front();
            match fault {
                Some(Fault::Hang) => return self.hang().await,
                Some(Fault::Pass) | None => {}
                Some(fault) => return Err(fault.into_error()),
            }
            let mut inner = self.inner.lock().unwrap();
            inner.next_id += 1;
            let handle = format!("mock://files/{}", inner.next_id);
            let data = inner.record_data.then(Vec::new);
            inner.resources.insert(
                handle.clone(),
                Resource {
                    total: total_bytes,
                    committed: 0,
                    data,
                },
            );
            inner.metadata.push(metadata.clone());
            Ok(CreatedResource {
                handle,
                committed_bytes: 0,
            })
        })
    }

    fn query_offset<'a>(&'a self, handle: &'a str) -> IngestFuture<'a, u64> {
        Box::pin(async move {
            let fault = {
                let mut inner = self.inner.lock().unwrap();
                inner.queries += 1;
                inner.query_faults.pop_front()
            };
            match fault {
                Some(Fault::Hang) => return self.hang().await,
                Some(Fault::Pass) | None => {}
                Some(fault) => return Err(fault.into_error()),
            }
            self.committed(handle).ok_or(IngestError::NotFound)
        })
    }

    fn transfer_chunk<'a>(
        &'a self,
        handle: &'a str,
        offset: u64,
        data: Bytes,
    ) -> IngestFuture<'a, ChunkOutcome> {
        Box::pin(async move {
            let fault = {
                let mut inner = self.inner.lock().unwrap();
                inner.chunk_attempts += 1;
                inner.chunk_faults.pop_front()
            };
            match fault {
                Some(Fault::Hang) => return self.hang().await,
                Some(Fault::Conflict) => return Ok(ChunkOutcome::OffsetConflict),
                Some(Fault::NoProgress) => {
                    let committed = self.committed(handle).ok_or(IngestError::NotFound)?;
                    return Ok(ChunkOutcome::Committed(committed));
                }
                Some(Fault::Pass) | None => {}
                Some(fault) => return Err(fault.into_error()),
            }

            let mut inner = self.inner.lock().unwrap();
            let max_accept = inner.max_accept;
            let resource = inner
                .resources
                .get_mut(handle)
                .ok_or(IngestError::NotFound)?;
            if offset != resource.committed {
                return Ok(ChunkOutcome::OffsetConflict);
            }
            let accept = max_accept.map_or(data.len(), |max| data.len().min(max));
            if resource.committed + accept as u64 > resource.total {
                return Err(IngestError::Client {
                    status: 413,
                    body: "exceeds upload length".into(),
                });
            }
            resource.committed += accept as u64;
            if let Some(stored) = resource.data.as_mut() {
                stored.extend_from_slice(&data[..accept]);
            }
            let committed = resource.committed;
            inner.transfers.push((offset, accept));
            Ok(ChunkOutcome::Committed(committed))
        })
    }

    fn release<'a>(&'a self, handle: &'a str) -> IngestFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.resources.remove(handle);
            inner.released.push(handle.to_string());
            Ok(())
        })
    }
}

/// Deterministic source of any size that never materializes its content.
pub(crate) struct PatternSource {
    len: u64,
}

impl PatternSource {
    pub(crate) fn new(len: u64) -> Self {
        Self { len }
    }

    pub(crate) fn bytes(len: u64) -> Vec<u8> {
        (0..len).map(pattern_byte).collect()
    }
}

fn pattern_byte(offset: u64) -> u8 {
    (offset % 251) as u8
}

impl UploadSource for PatternSource {
    fn total_bytes(&self) -> u64 {
        self.len
    }

    fn read_window(&mut self, offset: u64, max_len: usize) -> Result<Vec<u8>, TransferError> {
        let end = (offset + max_len as u64).min(self.len);
        Ok((offset..end).map(pattern_byte).collect())
    }
}

/// Source whose reads always fail.
pub(crate) struct BrokenSource {
    pub(crate) len: u64,
}

impl UploadSource for BrokenSource {
    fn total_bytes(&self) -> u64 {
        self.len
    }

    fn read_window(&mut self, _offset: u64, _max_len: usize) -> Result<Vec<u8>, TransferError> {
        Err(TransferError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "device removed",
        )))
    }
}
