//! In-memory content store for testing and embedding

use crate::{
    content_url, ContentContext, ContentReader, ContentStore, ContentWriter, EmptyContentReader,
    Result, StoreError, WriteListener, WILDCARD_PROTOCOL,
};
use bytes::Bytes;
use chrono::{Datelike, Timelike, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use sealstore_crypto::{ReadableChannel, WritableChannel};
use std::io::{self, Read, Write};
use std::sync::Arc;
use tracing::debug;

/// Protocol of URLs created by [`MemoryContentStore`]
pub const MEMORY_STORE_PROTOCOL: &str = "store";

/// An in-memory content store.
///
/// New content gets time-based URLs of the form `store://YYYY/M/D/H/m/<uuid>.bin`.
/// Clones share the same contents.
#[derive(Clone)]
pub struct MemoryContentStore {
    protocol: String,
    contents: Arc<DashMap<String, Bytes>>,
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryContentStore {
    /// Create a new empty store using the `store` protocol
    pub fn new() -> Self {
        Self::with_protocol(MEMORY_STORE_PROTOCOL)
    }

    /// Create a new empty store using a custom protocol
    pub fn with_protocol(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            contents: Arc::new(DashMap::new()),
        }
    }

    /// Get the number of stored objects
    pub fn len(&self) -> usize {
        self.contents.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Get total size of all stored objects
    pub fn total_size(&self) -> u64 {
        self.contents.iter().map(|entry| entry.value().len() as u64).sum()
    }

    /// List all content URLs
    pub fn list_content_urls(&self) -> Vec<String> {
        self.contents.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Raw stored bytes, bypassing any facade
    pub fn raw_content(&self, content_url: &str) -> Option<Bytes> {
        let resolved = self.resolve(content_url).ok()?;
        self.contents.get(&resolved).map(|entry| entry.value().clone())
    }

    /// Resolve wildcard URLs to this store's protocol
    fn resolve(&self, url: &str) -> Result<String> {
        let (protocol, _) = content_url::split(url)?;
        if protocol == WILDCARD_PROTOCOL {
            content_url::with_protocol(url, &self.protocol)
        } else if protocol == self.protocol {
            Ok(url.to_string())
        } else {
            Err(StoreError::UnsupportedContentUrl(url.to_string()))
        }
    }

    fn new_content_url(&self) -> String {
        let now = Utc::now();
        let path = format!(
            "{}/{}/{}/{}/{}/{}.bin",
            now.year(),
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            uuid::Uuid::new_v4()
        );
        content_url::make(&self.protocol, &path)
    }
}

impl ContentStore for MemoryContentStore {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn exists(&self, content_url: &str) -> Result<bool> {
        let resolved = self.resolve(content_url)?;
        Ok(self.contents.contains_key(&resolved))
    }

    fn reader(&self, content_url: &str) -> Result<Box<dyn ContentReader>> {
        let resolved = self.resolve(content_url)?;
        Ok(Box::new(MemoryContentReader {
            content_url: resolved,
            contents: self.contents.clone(),
        }))
    }

    fn writer(&self, context: &ContentContext) -> Result<Box<dyn ContentWriter>> {
        let content_url = match context.content_url() {
            Some(url) => {
                let resolved = self.resolve(url)?;
                if self.contents.contains_key(&resolved) {
                    return Err(StoreError::AlreadyExists(resolved));
                }
                resolved
            }
            None => self.new_content_url(),
        };
        debug!(content_url = %content_url, "Created memory content writer");

        Ok(Box::new(MemoryContentWriter {
            content_url,
            contents: self.contents.clone(),
            state: Arc::new(Mutex::new(WriterState::default())),
        }))
    }

    fn delete(&self, content_url: &str) -> Result<bool> {
        let resolved = self.resolve(content_url)?;
        Ok(self.contents.remove(&resolved).is_some())
    }
}

/// Reader over content held by a [`MemoryContentStore`]
pub struct MemoryContentReader {
    content_url: String,
    contents: Arc<DashMap<String, Bytes>>,
}

impl ContentReader for MemoryContentReader {
    fn content_url(&self) -> &str {
        &self.content_url
    }

    fn exists(&self) -> bool {
        self.contents.contains_key(&self.content_url)
    }

    fn size(&self) -> u64 {
        self.contents
            .get(&self.content_url)
            .map(|entry| entry.value().len() as u64)
            .unwrap_or(0)
    }

    fn channel(&self) -> Result<Box<dyn ReadableChannel>> {
        let data = self
            .contents
            .get(&self.content_url)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(self.content_url.clone()))?;
        Ok(Box::new(BytesReadableChannel::new(data)))
    }
}

/// Readable channel over an immutable byte buffer
pub struct BytesReadableChannel {
    data: Bytes,
    position: usize,
    open: bool,
}

impl BytesReadableChannel {
    /// Create a channel positioned at the start of `data`
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            position: 0,
            open: true,
        }
    }
}

impl Read for BytesReadableChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.open {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - self.position);
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

impl ReadableChannel for BytesReadableChannel {
    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) -> io::Result<()> {
        self.open = false;
        Ok(())
    }
}

#[derive(Default)]
struct WriterState {
    listeners: Vec<WriteListener>,
    channel_taken: bool,
    closed: bool,
    size: u64,
}

/// Writer for new content in a [`MemoryContentStore`]
pub struct MemoryContentWriter {
    content_url: String,
    contents: Arc<DashMap<String, Bytes>>,
    state: Arc<Mutex<WriterState>>,
}

impl ContentWriter for MemoryContentWriter {
    fn content_url(&self) -> &str {
        &self.content_url
    }

    fn channel(&self) -> Result<Box<dyn WritableChannel>> {
        let mut state = self.state.lock();
        if state.channel_taken {
            return Err(StoreError::IllegalState(format!(
                "a channel has already been obtained for {}",
                self.content_url
            )));
        }
        state.channel_taken = true;

        Ok(Box::new(MemoryWritableChannel {
            content_url: self.content_url.clone(),
            contents: self.contents.clone(),
            state: self.state.clone(),
            buffer: Vec::new(),
            open: true,
        }))
    }

    fn add_listener(&self, listener: WriteListener) {
        self.state.lock().listeners.push(listener);
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn size(&self) -> u64 {
        self.state.lock().size
    }

    fn reader(&self) -> Result<Box<dyn ContentReader>> {
        if self.is_closed() {
            Ok(Box::new(MemoryContentReader {
                content_url: self.content_url.clone(),
                contents: self.contents.clone(),
            }))
        } else {
            Ok(Box::new(EmptyContentReader::new(self.content_url.clone())))
        }
    }
}

/// Buffers written bytes and commits them to the store on close
struct MemoryWritableChannel {
    content_url: String,
    contents: Arc<DashMap<String, Bytes>>,
    state: Arc<Mutex<WriterState>>,
    buffer: Vec<u8>,
    open: bool,
}

impl Write for MemoryWritableChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel is closed"));
        }
        self.buffer.extend_from_slice(buf);
        self.state.lock().size += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WritableChannel for MemoryWritableChannel {
    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let data = Bytes::from(std::mem::take(&mut self.buffer));
        debug!(content_url = %self.content_url, size = data.len(), "Committing memory content");
        self.contents.insert(self.content_url.clone(), data);

        let listeners = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.listeners)
        };
        for listener in listeners {
            listener()?;
        }
        Ok(())
    }
}
