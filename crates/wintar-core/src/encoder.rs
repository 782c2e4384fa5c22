//! Tar entry encoding.
//!
//! Turns a captured file into tar entries through `tar::Builder`. Windows
//! metadata without a place in the ustar header travels in PAX extension
//! records using the keys understood by go-winio's `backuptar` and
//! libarchive:
//!
//! | Key                        | Value                                  |
//! |----------------------------|----------------------------------------|
//! | `MSWINDOWS.fileattr`       | `FILE_ATTRIBUTE_*` bitmask, decimal    |
//! | `MSWINDOWS.rawsd`          | security descriptor, base64            |
//! | `MSWINDOWS.mountpoint`     | `1` for junctions                      |
//! | `MSWINDOWS.xattr.<name>`   | extended attribute value, base64       |
//! | `MSWINDOWS.ads.<name>`     | alternate data stream content, base64  |
//! | `LIBARCHIVE.creationtime`  | creation time, PAX decimal seconds     |
//! | `atime` / `ctime`          | access / change time                   |
//!
//! Every file is exactly one tar entry; its alternate data streams ride on
//! that entry's extension records.

use crate::capture::CapturedFile;
use crate::error::Result;
use crate::types::{ArchiveWarning, BasicFileInfo, StreamLoss};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;
use tar::{Builder, EntryType, Header};

pub const PAX_FILE_ATTRIBUTES: &str = "MSWINDOWS.fileattr";
pub const PAX_SECURITY_DESCRIPTOR: &str = "MSWINDOWS.rawsd";
pub const PAX_MOUNT_POINT: &str = "MSWINDOWS.mountpoint";
pub const PAX_EA_PREFIX: &str = "MSWINDOWS.xattr.";
pub const PAX_ADS_PREFIX: &str = "MSWINDOWS.ads.";
pub const PAX_CREATION_TIME: &str = "LIBARCHIVE.creationtime";

const MODE_DIRECTORY: u32 = 0o040755;
const MODE_REGULAR: u32 = 0o100644;
const MODE_SYMLINK: u32 = 0o120777;
const WRITE_BITS: u32 = 0o222;

const USTAR_NAME_LEN: usize = 100;
const USTAR_PREFIX_LEN: usize = 155;

/// Archive flavour written by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// ustar headers plus PAX extension records
    #[default]
    Pax,

    /// Plain ustar; Windows metadata is dropped with warnings
    Ustar,
}

impl ArchiveFormat {
    pub fn has_extension_records(self) -> bool {
        self == ArchiveFormat::Pax
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveFormat::Pax => write!(f, "pax"),
            ArchiveFormat::Ustar => write!(f, "ustar"),
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pax" => Ok(ArchiveFormat::Pax),
            "ustar" => Ok(ArchiveFormat::Ustar),
            other => Err(format!("unknown archive format '{}' (expected pax or ustar)", other)),
        }
    }
}

/// What a captured file becomes in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    Symlink,
    Regular,
}

impl EntryKind {
    pub fn of(info: &BasicFileInfo, captured: &CapturedFile) -> Self {
        if info.is_directory() && captured.reparse_point.is_none() {
            EntryKind::Directory
        } else if captured.reparse_point.is_some() {
            EntryKind::Symlink
        } else {
            EntryKind::Regular
        }
    }
}

/// Sink wrapper that can be switched to refuse all writes.
///
/// `tar::Builder` appends the end-of-archive marker when dropped; poisoning
/// the sink first keeps that marker out of an aborted archive.
struct PoisonableWriter<W> {
    inner: W,
    poisoned: bool,
}

impl<W: Write> Write for PoisonableWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.poisoned {
            return Err(io::Error::new(io::ErrorKind::Other, "archive aborted"));
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.poisoned {
            return Ok(());
        }
        self.inner.flush()
    }
}

/// Writes tar entries for captured files.
pub struct TarEntryEncoder<W: Write> {
    builder: Builder<PoisonableWriter<W>>,
    format: ArchiveFormat,
}

impl<W: Write> TarEntryEncoder<W> {
    pub fn new(writer: W, format: ArchiveFormat) -> Self {
        TarEntryEncoder {
            builder: Builder::new(PoisonableWriter {
                inner: writer,
                poisoned: false,
            }),
            format,
        }
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// Write a hardlink entry pointing at an earlier entry.
    pub fn write_link(&mut self, name: &str, info: &BasicFileInfo, target: &str) -> Result<()> {
        let mut header = base_header(info, EntryType::Link, MODE_REGULAR);
        header.set_size(0);
        let pax = self.time_records(info);
        self.append(header, name, Some(&target.replace('\\', "/")), pax, io::empty())
    }

    /// Write the single entry for a captured file.
    ///
    /// Returns the metadata that could not be written.
    pub fn write_entry(
        &mut self,
        name: &str,
        info: &BasicFileInfo,
        captured: CapturedFile,
    ) -> Result<Vec<ArchiveWarning>> {
        let kind = EntryKind::of(info, &captured);
        let mut losses = captured.losses;

        let (entry_type, mode) = match kind {
            EntryKind::Directory => (EntryType::Directory, MODE_DIRECTORY),
            EntryKind::Symlink => (EntryType::Symlink, MODE_SYMLINK),
            EntryKind::Regular => (EntryType::Regular, MODE_REGULAR),
        };
        let mode = if info.is_readonly() && kind != EntryKind::Symlink {
            mode & !WRITE_BITS
        } else {
            mode
        };

        let mut header = base_header(info, entry_type, mode);
        let mut pax = self.time_records(info);

        if let Some(sd) = &captured.security_descriptor {
            if self.format.has_extension_records() {
                pax.push((
                    PAX_SECURITY_DESCRIPTOR.to_string(),
                    base64::encode(sd).into_bytes(),
                ));
            } else {
                losses.push(StreamLoss::NoExtensionRecords {
                    what: "security descriptor",
                });
            }
        }

        if !captured.extended_attributes.is_empty() {
            if self.format.has_extension_records() {
                for ea in &captured.extended_attributes {
                    pax.push((
                        format!("{}{}", PAX_EA_PREFIX, ea.name),
                        base64::encode(&ea.value).into_bytes(),
                    ));
                }
            } else {
                losses.push(StreamLoss::NoExtensionRecords {
                    what: "extended attributes",
                });
            }
        }

        if !captured.alternate_streams.is_empty() {
            if self.format.has_extension_records() {
                for stream in captured.alternate_streams {
                    let mut content = Vec::with_capacity(stream.data.len() as usize);
                    stream.data.into_reader()?.read_to_end(&mut content)?;
                    pax.push((
                        format!("{}{}", PAX_ADS_PREFIX, stream.name),
                        base64::encode(&content).into_bytes(),
                    ));
                }
            } else {
                losses.push(StreamLoss::NoExtensionRecords {
                    what: "alternate data streams",
                });
            }
        }

        let link_target = captured.reparse_point.as_ref().map(|rp| rp.target.clone());
        if let Some(rp) = &captured.reparse_point {
            if rp.is_mount_point {
                if self.format.has_extension_records() {
                    pax.push((PAX_MOUNT_POINT.to_string(), b"1".to_vec()));
                } else {
                    losses.push(StreamLoss::NoExtensionRecords {
                        what: "mount point flag",
                    });
                }
            }
        }

        let entry_name = match kind {
            EntryKind::Directory => directory_name(name),
            _ => name.to_string(),
        };

        match (kind, captured.data) {
            (EntryKind::Regular, Some(data)) => {
                header.set_size(data.len());
                self.append(header, &entry_name, None, pax, data.into_reader()?)?;
            }
            (kind, data) => {
                if let (EntryKind::Symlink, Some(data)) = (kind, &data) {
                    if !data.is_empty() {
                        losses.push(StreamLoss::SymlinkData { size: data.len() });
                    }
                }
                header.set_size(0);
                self.append(header, &entry_name, link_target.as_deref(), pax, io::empty())?;
            }
        }

        Ok(losses
            .into_iter()
            .map(|loss| ArchiveWarning::new(name, loss))
            .collect())
    }

    fn time_records(&self, info: &BasicFileInfo) -> Vec<(String, Vec<u8>)> {
        if !self.format.has_extension_records() {
            return Vec::new();
        }
        vec![
            (
                PAX_FILE_ATTRIBUTES.to_string(),
                info.file_attributes.to_string().into_bytes(),
            ),
            (
                PAX_CREATION_TIME.to_string(),
                info.creation_time.to_pax().into_bytes(),
            ),
            ("atime".to_string(), info.last_access_time.to_pax().into_bytes()),
            ("ctime".to_string(), info.change_time.to_pax().into_bytes()),
        ]
    }

    fn append<R: Read>(
        &mut self,
        mut header: Header,
        name: &str,
        link: Option<&str>,
        mut pax: Vec<(String, Vec<u8>)>,
        body: R,
    ) -> Result<()> {
        let name_fits = set_name_bytes(&mut header, name);
        let link_fits = link.map_or(true, |target| set_link_bytes(&mut header, target));

        match self.format {
            ArchiveFormat::Pax => {
                if !name_fits {
                    pax.push(("path".to_string(), name.as_bytes().to_vec()));
                }
                if let (false, Some(target)) = (link_fits, link) {
                    pax.push(("linkpath".to_string(), target.as_bytes().to_vec()));
                }
                if !pax.is_empty() {
                    self.builder.append_pax_extensions(
                        pax.iter().map(|(key, value)| (key.as_str(), value.as_slice())),
                    )?;
                }
                header.set_cksum();
                self.builder.append(&header, body)?;
            }
            ArchiveFormat::Ustar => match (name_fits && link_fits, link) {
                (true, _) => {
                    header.set_cksum();
                    self.builder.append(&header, body)?;
                }
                // GNU long name records.
                (false, Some(target)) => self.builder.append_link(&mut header, name, target)?,
                (false, None) => self.builder.append_data(&mut header, name, body)?,
            },
        }
        Ok(())
    }

    /// Write the end-of-archive marker and return the sink.
    pub fn finish(self) -> Result<W> {
        let writer = self.builder.into_inner()?;
        Ok(writer.inner)
    }

    /// Stop without writing the end-of-archive marker.
    ///
    /// Whatever was already written stays in the sink; it is not a valid
    /// archive.
    pub fn abort(mut self) {
        self.builder.get_mut().poisoned = true;
    }
}

fn base_header(info: &BasicFileInfo, entry_type: EntryType, mode: u32) -> Header {
    let mut header = Header::new_ustar();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(info.last_write_time.unix_seconds_clamped());
    header
}

fn directory_name(name: &str) -> String {
    if name.ends_with('/') {
        name.to_string()
    } else {
        format!("{}/", name)
    }
}

/// Store `name` in the ustar name/prefix fields if it fits.
fn set_name_bytes(header: &mut Header, name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() <= USTAR_NAME_LEN {
        header.as_old_mut().name[..bytes.len()].copy_from_slice(bytes);
        return true;
    }

    let split = bytes.iter().enumerate().position(|(i, b)| {
        *b == b'/'
            && i > 0
            && i <= USTAR_PREFIX_LEN
            && i + 1 < bytes.len()
            && bytes.len() - i - 1 <= USTAR_NAME_LEN
    });
    if let Some(i) = split {
        if let Some(ustar) = header.as_ustar_mut() {
            ustar.prefix[..i].copy_from_slice(&bytes[..i]);
            ustar.name[..bytes.len() - i - 1].copy_from_slice(&bytes[i + 1..]);
            return true;
        }
    }

    header
        .as_old_mut()
        .name
        .copy_from_slice(&bytes[..USTAR_NAME_LEN]);
    false
}

fn set_link_bytes(header: &mut Header, target: &str) -> bool {
    let bytes = target.as_bytes();
    let slot = &mut header.as_old_mut().linkname;
    if bytes.len() <= slot.len() {
        slot[..bytes.len()].copy_from_slice(bytes);
        true
    } else {
        let len = slot.len();
        slot.copy_from_slice(&bytes[..len]);
        false
    }
}
