//! Forward-only ZIP reader driven by local file headers
//!
//! Nothing here seeks: entries are discovered in stream order, which is what
//! lets a bundle be installed while it is still being read from a pipe or a
//! content provider. The central directory is never consulted; reaching it
//! ends the stream.

use std::io::{self, BufRead, BufReader, Read};

use flate2::{Crc, Decompress, FlushDecompress, Status};
use sideload_errors::ArchiveError;
use tracing::debug;

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_SIG: u32 = 0x0605_4b50;
const ZIP64_END_OF_CENTRAL_SIG: u32 = 0x0606_4b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;

const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

const ZIP64_EXTRA_ID: u16 = 0x0001;
const ZIP64_SENTINEL: u32 = 0xFFFF_FFFF;

/// Local header minus its signature
const LOCAL_HEADER_LEN: usize = 26;

/// Compression method of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Stored,
    Deflated,
}

/// Metadata from an entry's local file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    name: String,
    compression: Compression,
    size: Option<u64>,
    compressed_size: Option<u64>,
    crc32: u32,
    has_data_descriptor: bool,
    zip64: bool,
}

impl EntryHeader {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Uncompressed size, `None` when it only follows the data
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    #[must_use]
    pub fn compressed_size(&self) -> Option<u64> {
        self.compressed_size
    }

    #[must_use]
    pub fn has_data_descriptor(&self) -> bool {
        self.has_data_descriptor
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }
}

#[derive(Debug)]
struct Counting<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for Counting<R> {
    /// Source failures leave here tagged as [`ArchiveError::Io`], so no
    /// error kind the source picks can be mistaken for a malformed archive.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match self.inner.read(buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Err(e),
            Err(e) => {
                return Err(ArchiveError::Io {
                    kind: e.kind(),
                    message: e.to_string(),
                }
                .into_io())
            }
        };
        self.count += n as u64;
        Ok(n)
    }
}

enum Body {
    Stored {
        remaining: u64,
    },
    Deflated {
        inflater: Box<Decompress>,
        /// Compressed bytes left, unknown for data-descriptor entries
        remaining: Option<u64>,
        ended: bool,
    },
}

struct Current {
    header: EntryHeader,
    body: Body,
    crc: Crc,
    produced: u64,
    consumed: u64,
    complete: bool,
}

/// Streaming reader over the entries of a ZIP archive
pub struct ZipStream<R> {
    reader: BufReader<Counting<R>>,
    current: Option<Current>,
    entries_read: usize,
    finished: bool,
}

impl<R: Read> ZipStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(64 * 1024, Counting { inner: reader, count: 0 }),
            current: None,
            entries_read: 0,
            finished: false,
        }
    }

    /// Number of entries handed out so far
    #[must_use]
    pub fn entries_read(&self) -> usize {
        self.entries_read
    }

    /// Advance to the next entry, draining whatever the caller left unread
    /// of the previous one.
    ///
    /// # Errors
    ///
    /// Returns a structural `ArchiveError` when the bytes are not a valid ZIP
    /// stream, and `ArchiveError::Io` when the underlying reader fails.
    pub fn next_entry(&mut self) -> Result<Option<ZipEntry<'_, R>>, ArchiveError> {
        if let Some(current) = self.current.take() {
            self.finish_entry(current)?;
        }
        if self.finished {
            return Ok(None);
        }

        let mut offset = self.position();
        let mut signature = match self.read_signature()? {
            Some(signature) => signature,
            None => {
                self.finished = true;
                return Ok(None);
            }
        };
        // Split-archive marker in front of the first header
        if offset == 0 && signature == DATA_DESCRIPTOR_SIG {
            offset = self.position();
            signature = match self.read_signature()? {
                Some(signature) => signature,
                None => {
                    self.finished = true;
                    return Ok(None);
                }
            };
        }

        match signature {
            LOCAL_HEADER_SIG => {}
            CENTRAL_HEADER_SIG | END_OF_CENTRAL_SIG | ZIP64_END_OF_CENTRAL_SIG => {
                self.finished = true;
                return Ok(None);
            }
            found if self.entries_read == 0 => {
                return Err(ArchiveError::InvalidSignature { offset, found });
            }
            found => {
                // e.g. an APK signing block between the last entry and the
                // central directory
                debug!(offset, found, "non-entry record ends the archive stream");
                self.finished = true;
                return Ok(None);
            }
        }

        let header = self.read_local_header()?;
        let body = match header.compression {
            Compression::Stored => Body::Stored {
                remaining: header.compressed_size.unwrap_or_default(),
            },
            Compression::Deflated => Body::Deflated {
                inflater: Box::new(Decompress::new(false)),
                remaining: header.compressed_size,
                ended: false,
            },
        };
        self.entries_read += 1;
        self.current = Some(Current {
            header: header.clone(),
            body,
            crc: Crc::new(),
            produced: 0,
            consumed: 0,
            complete: false,
        });
        Ok(Some(ZipEntry {
            header,
            stream: self,
        }))
    }

    fn position(&self) -> u64 {
        self.reader.get_ref().count - self.reader.buffer().len() as u64
    }

    fn read_signature(&mut self) -> Result<Option<u32>, ArchiveError> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(ArchiveError::classify_io(&e, "record signature")),
            }
        }
        match filled {
            0 => Ok(None),
            4 => Ok(Some(u32::from_le_bytes(buf))),
            _ => Err(ArchiveError::Truncated {
                context: "record signature".to_string(),
            }),
        }
    }

    fn read_exact(&mut self, buf: &mut [u8], context: &str) -> Result<(), ArchiveError> {
        self.reader
            .read_exact(buf)
            .map_err(|e| ArchiveError::classify_io(&e, context))
    }

    fn read_local_header(&mut self) -> Result<EntryHeader, ArchiveError> {
        let mut fixed = [0u8; LOCAL_HEADER_LEN];
        self.read_exact(&mut fixed, "local file header")?;

        let flags = le16(&fixed, 2);
        let method = le16(&fixed, 4);
        let crc32 = le32(&fixed, 10);
        let compressed_size = le32(&fixed, 14);
        let size = le32(&fixed, 18);
        let name_len = usize::from(le16(&fixed, 22));
        let extra_len = usize::from(le16(&fixed, 24));

        let mut name = vec![0u8; name_len];
        self.read_exact(&mut name, "entry name")?;
        let name = String::from_utf8_lossy(&name).into_owned();

        let mut extra = vec![0u8; extra_len];
        self.read_exact(&mut extra, "extra field")?;

        if flags & FLAG_ENCRYPTED != 0 {
            return Err(ArchiveError::Encrypted { entry: name });
        }
        let compression = match method {
            METHOD_STORED => Compression::Stored,
            METHOD_DEFLATED => Compression::Deflated,
            method => return Err(ArchiveError::UnsupportedCompression { entry: name, method }),
        };
        let has_data_descriptor = flags & FLAG_DATA_DESCRIPTOR != 0;
        if has_data_descriptor && compression == Compression::Stored {
            return Err(ArchiveError::InvalidDescriptor {
                entry: name,
                message: "stored entry with trailing data descriptor".to_string(),
            });
        }

        let (size, compressed_size, zip64) = apply_zip64_extra(&extra, size, compressed_size);
        let (size, compressed_size) = if has_data_descriptor {
            (None, None)
        } else {
            (Some(size), Some(compressed_size))
        };

        debug!(entry = %name, ?compression, ?size, "zip entry");
        Ok(EntryHeader {
            name,
            compression,
            size,
            compressed_size,
            crc32,
            has_data_descriptor,
            zip64,
        })
    }

    fn finish_entry(&mut self, mut current: Current) -> Result<(), ArchiveError> {
        if current.complete {
            return Ok(());
        }

        // Untouched entries of known length are skipped without inflating
        if current.produced == 0 {
            let skip = match &current.body {
                Body::Stored { remaining } => Some(*remaining),
                Body::Deflated {
                    remaining: Some(remaining),
                    ..
                } => Some(*remaining),
                Body::Deflated { remaining: None, .. } => None,
            };
            if let Some(skip) = skip {
                return skip_bytes(&mut self.reader, skip, &current.header.name);
            }
        }

        let mut scratch = vec![0u8; 16 * 1024];
        loop {
            match current.read(&mut self.reader, &mut scratch) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(ArchiveError::classify_io(&e, &current.header.name)),
            }
        }
    }

    fn read_current(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.current.as_mut() {
            Some(current) => current.read(&mut self.reader, buf),
            None => Ok(0),
        }
    }
}

impl Current {
    fn read<B: BufRead>(&mut self, reader: &mut B, buf: &mut [u8]) -> io::Result<usize> {
        if self.complete || buf.is_empty() {
            return Ok(0);
        }
        let n = match &mut self.body {
            Body::Stored { remaining } => {
                read_stored(reader, remaining, buf, &self.header.name, &mut self.consumed)?
            }
            Body::Deflated {
                inflater,
                remaining,
                ended,
            } => read_deflated(
                reader,
                inflater,
                remaining,
                ended,
                buf,
                &self.header.name,
                &mut self.consumed,
            )?,
        };
        if n == 0 {
            self.complete = true;
            self.verify(reader).map_err(ArchiveError::into_io)?;
        } else {
            self.crc.update(&buf[..n]);
            self.produced += n as u64;
        }
        Ok(n)
    }

    /// Consume the trailing descriptor if any and check sizes and CRC
    fn verify<B: BufRead>(&mut self, reader: &mut B) -> Result<(), ArchiveError> {
        let entry = self.header.name.clone();

        if let Body::Deflated {
            remaining: Some(left),
            ..
        } = &self.body
        {
            if *left > 0 {
                debug!(entry = %entry, bytes = *left, "skipping padding after deflate stream");
                skip_bytes(reader, *left, &entry)?;
            }
        }

        let expected_crc = if self.header.has_data_descriptor {
            let descriptor = read_descriptor(reader, self.header.zip64, &entry)?;
            if descriptor.compressed_size != self.consumed || descriptor.size != self.produced {
                return Err(ArchiveError::InvalidDescriptor {
                    entry,
                    message: format!(
                        "descriptor says {}/{} bytes, stream had {}/{}",
                        descriptor.compressed_size, descriptor.size, self.consumed, self.produced
                    ),
                });
            }
            descriptor.crc32
        } else {
            if let Some(size) = self.header.size {
                if size != self.produced {
                    return Err(ArchiveError::CorruptData {
                        entry,
                        message: format!("expected {size} bytes, inflated {}", self.produced),
                    });
                }
            }
            self.header.crc32
        };

        let actual = self.crc.sum();
        if actual != expected_crc {
            return Err(ArchiveError::CrcMismatch {
                entry,
                expected: expected_crc,
                actual,
            });
        }
        Ok(())
    }
}

fn read_stored<B: BufRead>(
    reader: &mut B,
    remaining: &mut u64,
    buf: &mut [u8],
    entry: &str,
    consumed: &mut u64,
) -> io::Result<usize> {
    if *remaining == 0 {
        return Ok(0);
    }
    let want = usize::try_from(*remaining).map_or(buf.len(), |r| r.min(buf.len()));
    let n = reader.read(&mut buf[..want])?;
    if n == 0 {
        return Err(ArchiveError::Truncated {
            context: entry.to_string(),
        }
        .into_io());
    }
    *remaining -= n as u64;
    *consumed += n as u64;
    Ok(n)
}

#[allow(clippy::cast_possible_truncation)]
fn read_deflated<B: BufRead>(
    reader: &mut B,
    inflater: &mut Decompress,
    remaining: &mut Option<u64>,
    ended: &mut bool,
    buf: &mut [u8],
    entry: &str,
    consumed: &mut u64,
) -> io::Result<usize> {
    loop {
        if *ended {
            return Ok(0);
        }

        let (used, out, status, exhausted) = {
            let available = reader.fill_buf()?;
            let limit = remaining.map_or(available.len(), |r| {
                usize::try_from(r).map_or(available.len(), |r| r.min(available.len()))
            });
            let input = &available[..limit];
            let before_in = inflater.total_in();
            let before_out = inflater.total_out();
            let status = inflater
                .decompress(input, buf, FlushDecompress::None)
                .map_err(|e| {
                    ArchiveError::CorruptData {
                        entry: entry.to_string(),
                        message: e.to_string(),
                    }
                    .into_io()
                })?;
            // Bounded by the slice lengths passed in
            let used = (inflater.total_in() - before_in) as usize;
            let out = (inflater.total_out() - before_out) as usize;
            (used, out, status, input.is_empty())
        };

        reader.consume(used);
        *consumed += used as u64;
        if let Some(r) = remaining.as_mut() {
            *r -= used as u64;
        }
        if status == Status::StreamEnd {
            *ended = true;
        }
        if out > 0 {
            return Ok(out);
        }
        if *ended {
            return Ok(0);
        }
        if exhausted {
            return Err(ArchiveError::Truncated {
                context: entry.to_string(),
            }
            .into_io());
        }
        if used == 0 {
            return Err(ArchiveError::CorruptData {
                entry: entry.to_string(),
                message: "deflate stream made no progress".to_string(),
            }
            .into_io());
        }
    }
}

struct Descriptor {
    crc32: u32,
    compressed_size: u64,
    size: u64,
}

fn read_descriptor<B: BufRead>(
    reader: &mut B,
    zip64: bool,
    entry: &str,
) -> Result<Descriptor, ArchiveError> {
    let read = |reader: &mut B, buf: &mut [u8]| {
        reader
            .read_exact(buf)
            .map_err(|e| ArchiveError::classify_io(&e, &format!("data descriptor of {entry}")))
    };

    let mut word = [0u8; 4];
    read(reader, &mut word)?;
    // The descriptor signature is optional
    if u32::from_le_bytes(word) == DATA_DESCRIPTOR_SIG {
        read(reader, &mut word)?;
    }
    let crc32 = u32::from_le_bytes(word);

    let (compressed_size, size) = if zip64 {
        let mut sizes = [0u8; 16];
        read(reader, &mut sizes)?;
        (le64(&sizes, 0), le64(&sizes, 8))
    } else {
        let mut sizes = [0u8; 8];
        read(reader, &mut sizes)?;
        (u64::from(le32(&sizes, 0)), u64::from(le32(&sizes, 4)))
    };

    Ok(Descriptor {
        crc32,
        compressed_size,
        size,
    })
}

fn skip_bytes<B: BufRead>(reader: &mut B, mut count: u64, entry: &str) -> Result<(), ArchiveError> {
    while count > 0 {
        let available = match reader.fill_buf() {
            Ok(available) => available.len(),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ArchiveError::classify_io(&e, entry)),
        };
        if available == 0 {
            return Err(ArchiveError::Truncated {
                context: entry.to_string(),
            });
        }
        let step = usize::try_from(count).map_or(available, |c| c.min(available));
        reader.consume(step);
        count -= step as u64;
    }
    Ok(())
}

/// Replace 32-bit sentinel sizes with the values from a ZIP64 extra field
fn apply_zip64_extra(extra: &[u8], size: u32, compressed_size: u32) -> (u64, u64, bool) {
    let mut size64 = u64::from(size);
    let mut compressed64 = u64::from(compressed_size);
    let mut zip64 = false;

    let mut at = 0;
    while at + 4 <= extra.len() {
        let id = le16(extra, at);
        let len = usize::from(le16(extra, at + 2));
        let data_start = at + 4;
        let data_end = (data_start + len).min(extra.len());
        if id == ZIP64_EXTRA_ID {
            zip64 = true;
            let data = &extra[data_start..data_end];
            let mut field = 0;
            // Local headers list uncompressed then compressed size
            if size == ZIP64_SENTINEL && data.len() >= field + 8 {
                size64 = le64(data, field);
                field += 8;
            }
            if compressed_size == ZIP64_SENTINEL && data.len() >= field + 8 {
                compressed64 = le64(data, field);
            }
        }
        at = data_start + len;
    }
    (size64, compressed64, zip64)
}

fn le16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn le64(buf: &[u8], at: usize) -> u64 {
    u64::from(le32(buf, at)) | (u64::from(le32(buf, at + 4)) << 32)
}

/// One entry of a [`ZipStream`]; reading yields the uncompressed bytes
pub struct ZipEntry<'a, R> {
    header: EntryHeader,
    stream: &'a mut ZipStream<R>,
}

impl<R> ZipEntry<'_, R> {
    #[must_use]
    pub fn header(&self) -> &EntryHeader {
        &self.header
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.header.name
    }

    #[must_use]
    pub fn size(&self) -> Option<u64> {
        self.header.size
    }
}

impl<R: Read> Read for ZipEntry<'_, R> {
    /// Every error carries an [`ArchiveError`] payload. Failures of the
    /// underlying reader arrive as [`ArchiveError::Io`].
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read_current(buf)
    }
}
