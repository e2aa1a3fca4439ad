//! Streaming cipher channels
//!
//! Byte channels that wrap a backing channel and transparently encrypt on write
//! or decrypt on read using a content key. Cipher failures surface as
//! [`std::io::Error`]s of kind `InvalidData`.

use crate::cipher::{initialized_cipher, Cipher, CipherMode};
use crate::keys::SymmetricKey;
use crate::Result;
use std::io::{self, Read, Write};

/// Initial capacity of the ciphertext scratch buffer
pub const INITIAL_WRITE_BUFFER_SIZE: usize = 8192;

/// Number of ciphertext bytes pulled from the backing channel per refill
pub const READ_BLOCK_SIZE: usize = 8192;

/// A writable byte channel with an explicit close
pub trait WritableChannel: Write + Send {
    /// Whether the channel still accepts writes
    fn is_open(&self) -> bool;

    /// Close the channel, flushing anything it still holds
    fn close(&mut self) -> io::Result<()>;
}

/// A readable byte channel with an explicit close
pub trait ReadableChannel: Read + Send {
    /// Whether the channel can still be read
    fn is_open(&self) -> bool;

    /// Close the channel
    fn close(&mut self) -> io::Result<()>;
}

impl<T: WritableChannel + ?Sized> WritableChannel for Box<T> {
    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl<T: ReadableChannel + ?Sized> ReadableChannel for Box<T> {
    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// Observer of the plaintext consumed and ciphertext produced by each operation
pub type EncryptionListener = Box<dyn FnMut(usize, usize) + Send>;

pub(crate) fn closed_channel() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "channel is closed")
}

/// Encrypts everything written to it into a backing channel
pub struct EncryptingWritableChannel<W: WritableChannel> {
    inner: W,
    cipher: Cipher,
    write_buffer: Vec<u8>,
    listeners: Vec<EncryptionListener>,
    open: bool,
}

impl<W: WritableChannel> EncryptingWritableChannel<W> {
    /// Wrap `inner`, encrypting with `key`
    pub fn new(inner: W, key: &SymmetricKey) -> Result<Self> {
        Ok(Self {
            inner,
            cipher: initialized_cipher(key, CipherMode::Encrypt)?,
            write_buffer: Vec::with_capacity(INITIAL_WRITE_BUFFER_SIZE),
            listeners: Vec::new(),
            open: true,
        })
    }

    /// Register a listener called with `(plaintext_bytes, ciphertext_bytes)` after
    /// every write and once more on close with `(0, final_bytes)`
    pub fn add_listener(&mut self, listener: impl FnMut(usize, usize) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    fn notify(&mut self, read: usize, written: usize) {
        for listener in &mut self.listeners {
            listener(read, written);
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        let required = self.cipher.output_size(0);
        if self.write_buffer.len() < required {
            self.write_buffer.resize(required, 0);
        }
        let produced = self
            .cipher
            .finalize(&mut self.write_buffer)
            .map_err(|e| e.into_io())?;
        self.inner.write_all(&self.write_buffer[..produced])?;
        self.notify(0, produced);
        Ok(())
    }
}

impl<W: WritableChannel> Write for EncryptingWritableChannel<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.open {
            return Err(closed_channel());
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let required = self.cipher.output_size(buf.len());
        if self.write_buffer.len() < required {
            self.write_buffer.resize(required, 0);
        }
        let produced = self
            .cipher
            .update(buf, &mut self.write_buffer)
            .map_err(|e| e.into_io())?;
        self.inner.write_all(&self.write_buffer[..produced])?;
        self.notify(buf.len(), produced);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: WritableChannel> WritableChannel for EncryptingWritableChannel<W> {
    fn is_open(&self) -> bool {
        self.open
    }

    /// Finalize the cipher, write the last ciphertext and close the backing channel.
    ///
    /// Closing twice is a no-op. The backing channel is closed even when
    /// finalization fails.
    fn close(&mut self) -> io::Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let finished = self.finish();
        let closed = self.inner.close();
        finished.and(closed)
    }
}

/// Decrypts a backing channel of ciphertext as it is read
pub struct DecryptingReadableChannel<R: ReadableChannel> {
    inner: R,
    cipher: Cipher,
    read_buffer: Box<[u8]>,
    /// Ciphertext already in `read_buffer` from a fill that was interrupted
    pending: usize,
    decrypted: Vec<u8>,
    position: usize,
    read_to_end: bool,
    failed: bool,
    open: bool,
}

impl<R: ReadableChannel> DecryptingReadableChannel<R> {
    /// Wrap `inner`, decrypting with `key`
    pub fn new(inner: R, key: &SymmetricKey) -> Result<Self> {
        Ok(Self {
            inner,
            cipher: initialized_cipher(key, CipherMode::Decrypt)?,
            read_buffer: vec![0u8; READ_BLOCK_SIZE].into_boxed_slice(),
            pending: 0,
            decrypted: Vec::with_capacity(READ_BLOCK_SIZE),
            position: 0,
            read_to_end: false,
            failed: false,
            open: true,
        })
    }

    /// Pull up to one block of ciphertext and decrypt it, finalizing at end of input.
    ///
    /// Ciphertext read before a backing read error is kept for the next call.
    fn fill(&mut self) -> io::Result<()> {
        let mut eof = false;
        while self.pending < self.read_buffer.len() {
            match self.inner.read(&mut self.read_buffer[self.pending..]) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => self.pending += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        let filled = std::mem::take(&mut self.pending);

        self.decrypted.clear();
        self.decrypted.resize(self.cipher.output_size(filled), 0);
        self.position = 0;

        let decrypted = self
            .cipher
            .update(&self.read_buffer[..filled], &mut self.decrypted)
            .and_then(|produced| {
                if eof {
                    let last = self.cipher.finalize(&mut self.decrypted[produced..])?;
                    Ok(produced + last)
                } else {
                    Ok(produced)
                }
            });
        match decrypted {
            Ok(produced) => {
                self.read_to_end = eof;
                self.decrypted.truncate(produced);
                Ok(())
            }
            Err(e) => {
                self.failed = true;
                self.decrypted.clear();
                Err(e.into_io())
            }
        }
    }
}

impl<R: ReadableChannel> Read for DecryptingReadableChannel<R> {
    /// Returns 0 only once all plaintext has been delivered, or after close
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if !self.open || dst.is_empty() {
            return Ok(0);
        }

        while self.position == self.decrypted.len() {
            if self.read_to_end {
                return Ok(0);
            }
            if self.failed {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "channel failed to decrypt earlier content",
                ));
            }
            self.fill()?;
        }

        let n = (self.decrypted.len() - self.position).min(dst.len());
        dst[..n].copy_from_slice(&self.decrypted[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

impl<R: ReadableChannel> ReadableChannel for DecryptingReadableChannel<R> {
    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.decrypted.clear();
        self.position = 0;
        self.pending = 0;
        self.inner.close()
    }
}
