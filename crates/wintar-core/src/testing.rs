//! Test fixtures: synthesized backup streams and a fake backup source.

use crate::error::{Result, WintarError};
use crate::source::{BackupFile, BackupSource};
use crate::types::{BasicFileInfo, FileIdentity, FileTime, FILE_ATTRIBUTE_ARCHIVE, FILE_ATTRIBUTE_DIRECTORY};
use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Builds raw `BackupRead` byte streams.
#[derive(Default)]
pub struct StreamBuilder {
    bytes: Vec<u8>,
}

impl StreamBuilder {
    pub fn new() -> Self {
        StreamBuilder::default()
    }

    /// Append only a stream header, with no name or payload.
    pub fn raw_header(mut self, id: u32, attributes: u32, size: u64, name_len: u32) -> Self {
        self.bytes.extend_from_slice(&id.to_le_bytes());
        self.bytes.extend_from_slice(&attributes.to_le_bytes());
        self.bytes.extend_from_slice(&size.to_le_bytes());
        self.bytes.extend_from_slice(&name_len.to_le_bytes());
        self
    }

    pub fn record(self, id: u32, attributes: u32, name: Option<&str>, payload: &[u8]) -> Self {
        let name_bytes = name.map(utf16le).unwrap_or_default();
        let mut this = self.raw_header(id, attributes, payload.len() as u64, name_bytes.len() as u32);
        this.bytes.extend_from_slice(&name_bytes);
        this.bytes.extend_from_slice(payload);
        this
    }

    pub fn data(self, payload: &[u8]) -> Self {
        self.record(1, 0, None, payload)
    }

    pub fn ea(self, payload: &[u8]) -> Self {
        self.record(2, 0, None, payload)
    }

    pub fn security(self, descriptor: &[u8]) -> Self {
        self.record(3, 2, None, descriptor)
    }

    pub fn alternate(self, name: &str, payload: &[u8]) -> Self {
        self.record(4, 0, Some(name), payload)
    }

    pub fn reparse(self, buffer: &[u8]) -> Self {
        self.record(8, 0, None, buffer)
    }

    /// A `BACKUP_DATA` header flagged sparse, with no payload of its own.
    pub fn sparse_data_header(self) -> Self {
        self.raw_header(1, 8, 0, 0)
    }

    pub fn sparse_block(self, offset: u64, data: &[u8]) -> Self {
        let mut this = self.raw_header(9, 0, 8 + data.len() as u64, 0);
        this.bytes.extend_from_slice(&offset.to_le_bytes());
        this.bytes.extend_from_slice(data);
        this
    }

    /// The zero-length block that terminates a sparse stream.
    pub fn sparse_end(self, offset: u64) -> Self {
        self.sparse_block(offset, &[])
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
}

/// A `REPARSE_DATA_BUFFER` for a symbolic link.
pub fn symlink_reparse_buffer(substitute: &str, print: &str, relative: bool) -> Vec<u8> {
    let mut data = name_fields(substitute, print);
    let flags: u32 = if relative { 1 } else { 0 };
    let path_buffer = data.split_off(8);
    data.extend_from_slice(&flags.to_le_bytes());
    data.extend_from_slice(&path_buffer);
    reparse_buffer(0xA000_000C, data)
}

/// A `REPARSE_DATA_BUFFER` for a junction.
pub fn mount_point_reparse_buffer(substitute: &str, print: &str) -> Vec<u8> {
    reparse_buffer(0xA000_0003, name_fields(substitute, print))
}

fn name_fields(substitute: &str, print: &str) -> Vec<u8> {
    let substitute = utf16le(substitute);
    let print = utf16le(print);
    let mut data = Vec::new();
    data.extend_from_slice(&0u16.to_le_bytes());
    data.extend_from_slice(&(substitute.len() as u16).to_le_bytes());
    data.extend_from_slice(&(substitute.len() as u16).to_le_bytes());
    data.extend_from_slice(&(print.len() as u16).to_le_bytes());
    data.extend_from_slice(&substitute);
    data.extend_from_slice(&print);
    data
}

fn reparse_buffer(tag: u32, data: Vec<u8>) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&tag.to_le_bytes());
    buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&data);
    buf
}

/// A `FILE_FULL_EA_INFORMATION` chain, entries aligned to 4 bytes.
pub fn ea_buffer(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buf = Vec::new();
    for (i, (name, value)) in entries.iter().enumerate() {
        let mut entry = Vec::new();
        entry.extend_from_slice(&0u32.to_le_bytes());
        entry.push(0);
        entry.push(name.len() as u8);
        entry.extend_from_slice(&(value.len() as u16).to_le_bytes());
        entry.extend_from_slice(name.as_bytes());
        entry.push(0);
        entry.extend_from_slice(value);

        if i + 1 < entries.len() {
            while entry.len() % 4 != 0 {
                entry.push(0);
            }
            let next = entry.len() as u32;
            entry[..4].copy_from_slice(&next.to_le_bytes());
        }
        buf.extend_from_slice(&entry);
    }
    buf
}

/// Fixed timestamp used for every fake file: 2021-01-01 00:00:00.25 UTC.
pub fn fake_time() -> FileTime {
    FileTime::from_unix(1_609_459_200, 250_000_000)
}

/// A backup source over a real directory tree with synthesized streams.
///
/// File contents come from disk; identities, security descriptors and
/// extra streams come from the knobs set on the source.
#[derive(Default)]
pub struct FakeSource {
    aliases: HashMap<PathBuf, PathBuf>,
    security: HashMap<PathBuf, Vec<u8>>,
    extra_streams: HashMap<PathBuf, Vec<u8>>,
    attributes: HashMap<PathBuf, u32>,
    truncated: HashSet<PathBuf>,
    empty_data_record: bool,
    open_handles: Rc<Cell<usize>>,
    opened: Rc<Cell<usize>>,
}

impl FakeSource {
    pub fn new() -> Self {
        FakeSource::default()
    }

    /// Give `link` the same identity as `target` (a hardlink).
    pub fn hardlink(mut self, link: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        self.aliases.insert(link.into(), target.into());
        self
    }

    pub fn security(mut self, path: impl Into<PathBuf>, descriptor: &[u8]) -> Self {
        self.security.insert(path.into(), descriptor.to_vec());
        self
    }

    /// Raw records appended after the data record of `path`.
    pub fn extra_streams(mut self, path: impl Into<PathBuf>, records: Vec<u8>) -> Self {
        self.extra_streams.insert(path.into(), records);
        self
    }

    pub fn attributes(mut self, path: impl Into<PathBuf>, attributes: u32) -> Self {
        self.attributes.insert(path.into(), attributes);
        self
    }

    /// Make the data record of `path` claim 60 bytes more than it carries.
    pub fn truncated(mut self, path: impl Into<PathBuf>) -> Self {
        self.truncated.insert(path.into());
        self
    }

    /// Emit a zero-length data record for empty files instead of none.
    pub fn with_empty_data_record(mut self) -> Self {
        self.empty_data_record = true;
        self
    }

    /// Number of handles currently open
    pub fn open_handles(&self) -> usize {
        self.open_handles.get()
    }

    /// Number of successful opens so far
    pub fn opened(&self) -> usize {
        self.opened.get()
    }

    fn identity_of(&self, path: &Path) -> FileIdentity {
        let key = self.aliases.get(path).map(PathBuf::as_path).unwrap_or(path);
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        FileIdentity::new(0x1234_5678, hasher.finish())
    }
}

impl BackupSource for FakeSource {
    type File = FakeFile;

    fn open_for_backup(&self, path: &Path) -> Result<FakeFile> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(WintarError::Missing {
                    path: path.to_path_buf(),
                })
            }
            Err(err) => return Err(WintarError::access(path, "open", err.to_string())),
        };

        let default_attributes = if metadata.is_dir() {
            FILE_ATTRIBUTE_DIRECTORY
        } else {
            FILE_ATTRIBUTE_ARCHIVE
        };
        let attributes = self
            .attributes
            .get(path)
            .copied()
            .unwrap_or(default_attributes);

        let content = if metadata.is_dir() {
            Vec::new()
        } else {
            fs::read(path).map_err(|err| WintarError::access(path, "read", err.to_string()))?
        };

        let mut body = StreamBuilder::new();
        if self.truncated.contains(path) {
            body = body.raw_header(1, 0, content.len() as u64 + 60, 0);
            let mut bytes = body.build();
            bytes.extend_from_slice(&content);
            body = StreamBuilder { bytes };
        } else if !content.is_empty() || (self.empty_data_record && !metadata.is_dir()) {
            body = body.data(&content);
        }
        let mut body = body.build();
        if let Some(extra) = self.extra_streams.get(path) {
            body.extend_from_slice(extra);
        }

        self.open_handles.set(self.open_handles.get() + 1);
        self.opened.set(self.opened.get() + 1);

        Ok(FakeFile {
            info: BasicFileInfo {
                creation_time: fake_time(),
                last_access_time: fake_time(),
                last_write_time: fake_time(),
                change_time: fake_time(),
                file_attributes: attributes,
            },
            identity: self.identity_of(path),
            size: content.len() as u64,
            security: self.security.get(path).cloned(),
            body,
            open_handles: Rc::clone(&self.open_handles),
        })
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// An open fake file; decrements the open-handle count when dropped.
pub struct FakeFile {
    info: BasicFileInfo,
    identity: FileIdentity,
    size: u64,
    security: Option<Vec<u8>>,
    body: Vec<u8>,
    open_handles: Rc<Cell<usize>>,
}

impl BackupFile for FakeFile {
    fn basic_info(&self) -> Result<BasicFileInfo> {
        Ok(self.info)
    }

    fn identity(&self) -> Result<FileIdentity> {
        Ok(self.identity)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }

    fn backup_stream(&mut self, include_security: bool) -> Result<Box<dyn Read + '_>> {
        let mut stream = StreamBuilder::new();
        if include_security {
            if let Some(sd) = &self.security {
                stream = stream.security(sd);
            }
        }
        let mut bytes = stream.build();
        bytes.extend_from_slice(&self.body);
        Ok(Box::new(Cursor::new(bytes)))
    }
}

impl Drop for FakeFile {
    fn drop(&mut self) {
        self.open_handles.set(self.open_handles.get() - 1);
    }
}
