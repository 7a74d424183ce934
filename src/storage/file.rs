use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{PoolError, Result};
use crate::types::{NsName, Selector};

use super::{Record, Storage};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct DocumentHeader {
    kind: String,
    version: u32,
    crc32: u32,
    len: u64,
}

fn document_crc32(kind: &str, body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(kind.as_bytes());
    hasher.update(&[0]);
    hasher.update(body);
    hasher.finalize()
}

struct Inner<R> {
    records: BTreeMap<NsName, R>,
    version: u64,
}

/// Storage persisted as `<dir>/<kind>.json`.
///
/// The document is a one-line JSON header carrying the kind, format version,
/// body length and CRC32, followed by the JSON body. Every mutation rewrites
/// the document through a temporary file in the same directory and renames it
/// into place.
pub struct FileStorage<R> {
    path: PathBuf,
    inner: RwLock<Inner<R>>,
}

impl<R: Record> FileStorage<R> {
    /// Opens the store for `R` in `dir`, creating the directory when missing.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", R::KIND));
        let records = if path.exists() {
            read_document::<R>(&path)?
        } else {
            Vec::new()
        };
        let mut inner = Inner {
            records: BTreeMap::new(),
            version: 0,
        };
        for record in records {
            inner.version = inner.version.max(record.meta().resource_version);
            inner.records.insert(record.key(), record);
        }
        debug!(
            kind = R::KIND,
            records = inner.records.len(),
            path = %path.display(),
            "storage.file.opened"
        );
        Ok(Self {
            path,
            inner: RwLock::new(inner),
        })
    }

    /// Location of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, records: &BTreeMap<NsName, R>) -> Result<()> {
        let body = serde_json::to_vec_pretty(&records.values().collect::<Vec<_>>())?;
        let header = DocumentHeader {
            kind: R::KIND.to_string(),
            version: FORMAT_VERSION,
            crc32: document_crc32(R::KIND, &body),
            len: body.len() as u64,
        };
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, &header)?;
        tmp.write_all(b"\n")?;
        tmp.write_all(&body)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| PoolError::Io(err.error))?;
        Ok(())
    }
}

fn read_document<R: Record>(path: &Path) -> Result<Vec<R>> {
    let raw = fs::read(path)?;
    let split = raw
        .iter()
        .position(|byte| *byte == b'\n')
        .ok_or_else(|| PoolError::Corruption(format!("{} has no header", path.display())))?;
    let header: DocumentHeader = serde_json::from_slice(&raw[..split])
        .map_err(|err| PoolError::Corruption(format!("{}: bad header: {err}", path.display())))?;
    let body = &raw[split + 1..];
    if header.kind != R::KIND {
        return Err(PoolError::Corruption(format!(
            "{} holds {} records, expected {}",
            path.display(),
            header.kind,
            R::KIND
        )));
    }
    if header.version != FORMAT_VERSION {
        return Err(PoolError::Corruption(format!(
            "{} has unsupported format version {}",
            path.display(),
            header.version
        )));
    }
    if header.len != body.len() as u64 {
        return Err(PoolError::Corruption(format!(
            "{} body is {} bytes, header says {}",
            path.display(),
            body.len(),
            header.len
        )));
    }
    let crc = document_crc32(R::KIND, body);
    if crc != header.crc32 {
        return Err(PoolError::Corruption(format!(
            "{} checksum mismatch (stored {:#010x}, computed {crc:#010x})",
            path.display(),
            header.crc32
        )));
    }
    Ok(serde_json::from_slice(body)?)
}

impl<R: Record> Storage<R> for FileStorage<R> {
    fn get(&self, key: &NsName) -> Result<Option<R>> {
        Ok(self.inner.read().records.get(key).cloned())
    }

    fn list(&self, selector: &Selector) -> Result<Vec<R>> {
        Ok(self
            .inner
            .read()
            .records
            .values()
            .filter(|record| selector.matches(*record))
            .cloned()
            .collect())
    }

    fn apply(&self, mut record: R, field_owner: &str) -> Result<R> {
        let mut inner = self.inner.write();
        let version = inner.version + 1;
        let meta = record.meta_mut();
        meta.resource_version = version;
        meta.managed_by = Some(field_owner.to_string());

        let mut records = inner.records.clone();
        records.insert(record.key(), record.clone());
        self.persist(&records)?;
        inner.records = records;
        inner.version = version;
        Ok(record)
    }

    fn delete(&self, key: &NsName) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.records.contains_key(key) {
            return Ok(());
        }
        let mut records = inner.records.clone();
        records.remove(key);
        self.persist(&records)?;
        inner.records = records;
        Ok(())
    }
}
