//! Chunk retrieval: the content-addressed store contract plus payload spooling.
//!
//! A [`ChunkSource`] turns a content identifier into a byte stream. The core never
//! retries; a failed fetch is reported once and ends the affected track.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use symphonia::core::io::MediaSource;

use crate::error::{FetchError, StreamError};

/// Byte-stream provider keyed by chunk identifier.
pub trait ChunkSource: Send + Sync {
    fn fetch(&self, id: &str) -> Result<Box<dyn Read + Send>, FetchError>;
}

/// Ordered, immutable list of chunk identifiers backing one track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkList(Arc<[String]>);

impl ChunkList {
    /// Build a chunk list; an empty list is rejected.
    pub fn new<I, S>(ids: I) -> Result<Self, StreamError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Err(StreamError::NoDataInput);
        }
        Ok(Self(ids.into()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Chunk store rooted at a directory: identifier `id` maps to `<root>/<id>`.
pub struct DirChunkSource {
    root: PathBuf,
}

impl DirChunkSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, id: &str) -> Option<PathBuf> {
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\'])
            && !id.contains('\0');
        valid.then(|| self.root.join(id))
    }
}

impl ChunkSource for DirChunkSource {
    fn fetch(&self, id: &str) -> Result<Box<dyn Read + Send>, FetchError> {
        let Some(path) = self.path_for(id) else {
            return Err(FetchError::NotFound { id: id.to_string() });
        };
        match File::open(&path) {
            Ok(f) => Ok(Box::new(f)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(FetchError::NotFound { id: id.to_string() })
            }
            Err(e) => Err(FetchError::Transport {
                id: id.to_string(),
                source: e,
            }),
        }
    }
}

/// In-memory chunk store.
#[derive(Default)]
pub struct MemoryChunkSource {
    chunks: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl MemoryChunkSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, data: impl Into<Vec<u8>>) {
        let data: Vec<u8> = data.into();
        if let Ok(mut g) = self.chunks.write() {
            g.insert(id.into(), data.into());
        }
    }
}

impl ChunkSource for MemoryChunkSource {
    fn fetch(&self, id: &str) -> Result<Box<dyn Read + Send>, FetchError> {
        let data = self
            .chunks
            .read()
            .ok()
            .and_then(|g| g.get(id).cloned())
            .ok_or_else(|| FetchError::NotFound { id: id.to_string() })?;
        Ok(Box::new(Cursor::new(data)))
    }
}

/// A fetched chunk, held in memory or in a spool file that is removed on drop.
pub enum ChunkPayload {
    Memory(Cursor<Vec<u8>>),
    Spooled(SpooledChunk),
}

impl ChunkPayload {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        ChunkPayload::Memory(Cursor::new(data))
    }

    pub fn len(&self) -> u64 {
        match self {
            ChunkPayload::Memory(c) => c.get_ref().len() as u64,
            ChunkPayload::Spooled(s) => s.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Read for ChunkPayload {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ChunkPayload::Memory(c) => c.read(buf),
            ChunkPayload::Spooled(s) => s.file.read(buf),
        }
    }
}

impl Seek for ChunkPayload {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            ChunkPayload::Memory(c) => c.seek(pos),
            ChunkPayload::Spooled(s) => s.file.seek(pos),
        }
    }
}

impl MediaSource for ChunkPayload {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.len())
    }
}

/// File-backed chunk payload.
pub struct SpooledChunk {
    path: PathBuf,
    file: File,
    len: u64,
}

impl SpooledChunk {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SpooledChunk {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = ?self.path, "spool cleanup warning: {e}");
            }
        }
    }
}

/// Per-stream spool directory handle; every file it creates shares one prefix.
#[derive(Clone, Debug)]
pub struct Spool {
    dir: PathBuf,
    prefix: String,
}

static SPOOL_SEQ: AtomicU64 = AtomicU64::new(0);

impl Spool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let seq = SPOOL_SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            dir: dir.into(),
            prefix: format!("chunk-{}-{seq}.", std::process::id()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Copy `reader` into a new spool file and reopen it for reading.
    pub fn spool(&self, reader: &mut dyn Read) -> io::Result<SpooledChunk> {
        std::fs::create_dir_all(&self.dir)?;
        let path = make_temp_path(&self.dir, &self.prefix);
        let mut out = File::create(&path)?;
        let len = match io::copy(reader, &mut out).and_then(|n| out.flush().map(|_| n)) {
            Ok(n) => n,
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
        };
        drop(out);
        let file = File::open(&path)?;
        Ok(SpooledChunk { path, file, len })
    }

    /// Remove every file left behind under this spool's prefix.
    pub fn cleanup(&self) -> io::Result<usize> {
        cleanup_temp_files(&self.dir, &self.prefix)
    }
}

/// Fetch chunk `id` fully, either into memory or into `spool`.
pub fn fetch_payload(
    source: &dyn ChunkSource,
    id: &str,
    spool: Option<&Spool>,
) -> Result<ChunkPayload, FetchError> {
    let mut reader = source.fetch(id)?;
    let transport = |source: io::Error| FetchError::Transport {
        id: id.to_string(),
        source,
    };
    match spool {
        Some(spool) => spool
            .spool(&mut reader)
            .map(ChunkPayload::Spooled)
            .map_err(transport),
        None => {
            let mut data = Vec::new();
            reader.read_to_end(&mut data).map_err(transport)?;
            Ok(ChunkPayload::from_bytes(data))
        }
    }
}

/// Remove stale spool files whose name starts with `prefix`.
pub(crate) fn cleanup_temp_files(dir: &Path, prefix: &str) -> io::Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut removed = 0usize;
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if !file_name.starts_with(prefix) {
            continue;
        }
        if std::fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

fn make_temp_path(dir: &Path, prefix: &str) -> PathBuf {
    static FILE_SEQ: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = FILE_SEQ.fetch_add(1, Ordering::Relaxed);
    dir.join(format!("{prefix}{nanos}-{seq}.chunk"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "media-player-{name}-{}-{}",
            std::process::id(),
            SPOOL_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn chunk_list_rejects_empty() {
        let err = ChunkList::new(Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, StreamError::NoDataInput));
    }

    #[test]
    fn chunk_list_preserves_order() {
        let list = ChunkList::new(["b", "a", "c"]).unwrap();
        assert_eq!(list.iter().collect::<Vec<_>>(), vec!["b", "a", "c"]);
        assert_eq!(list.get(2), Some("c"));
        assert_eq!(list.get(3), None);
    }

    #[test]
    fn memory_source_reports_missing_chunks() {
        let src = MemoryChunkSource::new();
        src.insert("abc", b"hello".to_vec());
        let mut out = String::new();
        src.fetch("abc").unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");
        assert!(matches!(
            src.fetch("nope"),
            Err(FetchError::NotFound { .. })
        ));
    }

    #[test]
    fn dir_source_rejects_path_traversal() {
        let dir = scratch_dir("dir-source");
        std::fs::write(dir.join("good"), b"ok").unwrap();
        let src = DirChunkSource::new(&dir);
        assert!(src.fetch("good").is_ok());
        assert!(matches!(src.fetch("../good"), Err(FetchError::NotFound { .. })));
        assert!(matches!(src.fetch(".."), Err(FetchError::NotFound { .. })));
        assert!(matches!(src.fetch("missing"), Err(FetchError::NotFound { .. })));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn spooled_payload_is_removed_on_drop() {
        let dir = scratch_dir("spool-drop");
        let spool = Spool::new(&dir);
        let src = MemoryChunkSource::new();
        src.insert("c0", vec![7u8; 32]);

        let mut payload = fetch_payload(&src, "c0", Some(&spool)).unwrap();
        let path = match &payload {
            ChunkPayload::Spooled(s) => s.path().to_path_buf(),
            ChunkPayload::Memory(_) => panic!("expected spooled payload"),
        };
        assert!(path.exists());
        assert_eq!(payload.len(), 32);
        let mut buf = Vec::new();
        payload.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, vec![7u8; 32]);

        drop(payload);
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn spool_cleanup_only_touches_own_prefix() {
        let dir = scratch_dir("spool-cleanup");
        let spool = Spool::new(&dir);
        std::fs::write(dir.join(format!("{}stale.chunk", spool.prefix())), b"x").unwrap();
        std::fs::write(dir.join("unrelated.bin"), b"x").unwrap();

        assert_eq!(spool.cleanup().unwrap(), 1);
        assert!(dir.join("unrelated.bin").exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn cleanup_of_missing_dir_is_noop() {
        let spool = Spool::new(std::env::temp_dir().join("media-player-does-not-exist-xyz"));
        assert_eq!(spool.cleanup().unwrap(), 0);
    }
}
