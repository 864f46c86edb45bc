//! Invoice persistence.
//!
//! [`InvoiceStore`] is the only contract callers depend on, so a transactional database can
//! replace the JSON file without touching them.

use crate::error::{Error, Result};
use crate::invoice::{Invoice, InvoiceId};
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait InvoiceStore {
    /// Fails with [`Error::NotFound`] when `id` is absent.
    fn read(&self, id: &InvoiceId) -> Result<Invoice>;

    /// Inserts or overwrites the invoice under its computed id and returns the id.
    fn write(&self, invoice: &Invoice) -> Result<InvoiceId>;
}

/// On-disk shape: `{ "0x<64 hex>": Invoice, ... }`. Sorted keys keep diffs deterministic.
pub type InvoiceMap = BTreeMap<InvoiceId, Invoice>;

/// JSON file store.
///
/// Writes are read-modify-write under an exclusive lock on `<file>.lock`, and the file is
/// replaced atomically, so concurrent writers (threads or processes) serialize instead of
/// losing updates.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every invoice in the file; a missing or empty file is an empty store.
    pub fn load_all(&self) -> Result<InvoiceMap> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(InvoiceMap::new()),
            Err(e) => {
                return Err(Error::Store(format!(
                    "failed to read invoice file {}: {e}",
                    self.path.display()
                )))
            }
        };
        if raw.trim().is_empty() {
            return Ok(InvoiceMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| {
            Error::Store(format!(
                "failed to parse invoice file {}: {e}",
                self.path.display()
            ))
        })
    }

    fn save_all(&self, invoices: &InvoiceMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::Store(format!(
                        "failed to create invoice directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let json = serde_json::to_string_pretty(invoices)
            .map_err(|e| Error::Store(format!("failed to serialize invoices: {e}")))?;

        // Atomic-ish write: write to a temp file then rename.
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| {
            Error::Store(format!(
                "failed to write temp invoice file {}: {e}",
                tmp_path.display()
            ))
        })?;

        // On Windows, rename fails if the destination exists; remove then rename.
        if let Err(err) = fs::rename(&tmp_path, &self.path) {
            if cfg!(windows) {
                let _ = fs::remove_file(&self.path);
                fs::rename(&tmp_path, &self.path).map_err(|e| {
                    Error::Store(format!(
                        "failed to replace invoice file {}: {e}",
                        self.path.display()
                    ))
                })?;
            } else {
                return Err(Error::Store(format!(
                    "failed to replace invoice file {}: {err}",
                    self.path.display()
                )));
            }
        }
        Ok(())
    }

    /// Blocks until this process holds the writer lock. Released when the file is dropped.
    fn lock(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::Store(format!(
                        "failed to create invoice directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        let lock_path = self.path.with_extension("lock");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| {
                Error::Store(format!(
                    "failed to open lock file {}: {e}",
                    lock_path.display()
                ))
            })?;
        file.lock_exclusive().map_err(|e| {
            Error::Store(format!("failed to lock {}: {e}", lock_path.display()))
        })?;
        Ok(file)
    }
}

impl InvoiceStore for JsonFileStore {
    fn read(&self, id: &InvoiceId) -> Result<Invoice> {
        self.load_all()?
            .remove(id)
            .ok_or(Error::NotFound(*id))
    }

    fn write(&self, invoice: &Invoice) -> Result<InvoiceId> {
        let id = invoice.id()?;
        let _guard = self.lock()?;

        let mut invoices = self.load_all()?;
        invoices.insert(id, invoice.clone());
        self.save_all(&invoices)?;

        tracing::info!(
            invoice_id = %id,
            path = %self.path.display(),
            total = invoices.len(),
            "invoice written"
        );
        Ok(id)
    }
}

/// Process-local store, for tests and for embedding behind another persistence layer.
#[derive(Debug, Default)]
pub struct MemoryStore {
    invoices: Mutex<InvoiceMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> Result<std::sync::MutexGuard<'_, InvoiceMap>> {
        self.invoices
            .lock()
            .map_err(|_| Error::Store("memory store mutex poisoned".to_string()))
    }
}

impl InvoiceStore for MemoryStore {
    fn read(&self, id: &InvoiceId) -> Result<Invoice> {
        self.map()?.get(id).cloned().ok_or(Error::NotFound(*id))
    }

    fn write(&self, invoice: &Invoice) -> Result<InvoiceId> {
        let id = invoice.id()?;
        self.map()?.insert(id, invoice.clone());
        Ok(id)
    }
}
