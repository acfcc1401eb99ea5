use std::io::{Read, Write};
use tar::Entry;

/// The smallest valid tar stream: two 512-byte blocks of zeros. Written as
/// the `layer.tar` of every surviving layer except the squash layer.
pub const EMPTY_LAYER_TAR: [u8; 1024] = [0u8; 1024];

/// What an outer-archive entry is, judged purely by the shape of its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// `.`, `..` or `./`
    Ignore,
    /// top-level `repositories` index
    Repositories,
    /// `<id>/`
    Directory(String),
    /// `<id>/json`
    Json(String),
    /// `<id>/layer.tar`
    LayerTar(String),
    /// `<id>/VERSION`
    Version(String),
    Unknown,
}

/// Classify an outer-archive entry name.
///
/// No length check is imposed on the id component: emitted ids are 64-hex
/// but ingest accepts whatever the input used.
pub fn classify(name: &str) -> EntryKind {
    if name == "." || name == ".." || name == "./" {
        return EntryKind::Ignore;
    }

    let parts: Vec<&str> = name.split('/').collect();
    match parts.as_slice() {
        [] => EntryKind::Ignore,
        ["repositories"] => EntryKind::Repositories,
        [_] => EntryKind::Unknown,
        [id, ""] => EntryKind::Directory(id.to_string()),
        [id, "json"] => EntryKind::Json(id.to_string()),
        [id, "layer.tar"] => EntryKind::LayerTar(id.to_string()),
        [id, "VERSION"] => EntryKind::Version(id.to_string()),
        _ => EntryKind::Unknown,
    }
}

/// The entry's path as a string, long-name extensions resolved.
pub fn entry_name<R: Read>(entry: &Entry<'_, R>) -> String {
    String::from_utf8_lossy(&entry.path_bytes()).into_owned()
}

/// A reader that copies every byte it yields into a spool writer, so a
/// non-seekable input stream can be read back for the second pass.
pub struct TeeReader<R: Read, W: Write> {
    reader: R,
    spool: W,
}

impl<R: Read, W: Write> TeeReader<R, W> {
    pub fn new(reader: R, spool: W) -> Self {
        TeeReader { reader, spool }
    }
}

impl<R: Read, W: Write> Read for TeeReader<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.reader.read(buf)?;
        if n > 0 {
            self.spool.write_all(&buf[..n])?;
        }
        Ok(n)
    }
}
