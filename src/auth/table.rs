//! Cipher-encrypted tables persisted as one file each.
//!
//! A table is an ordered collection of rows serialized with the value codec
//! as an array of rows, then encrypted with the install-wide file key. It is
//! always read and rewritten whole.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::cipher;
use crate::value::{Value, ValueError};

/// A type stored as one row of an [`EncryptedTable`].
pub trait Row: Sized {
    fn to_value(&self) -> Value;
    fn from_value(value: &Value) -> Result<Self, ValueError>;
}

/// One encrypted table file.
#[derive(Debug)]
pub struct EncryptedTable<R> {
    path: PathBuf,
    key: String,
    _row: PhantomData<fn() -> R>,
}

impl<R: Row> EncryptedTable<R> {
    pub fn new(path: PathBuf, key: String) -> Self {
        Self {
            path,
            key,
            _row: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Reads and decrypts every row.
    pub fn read(&self) -> Result<Vec<R>> {
        let cipher_text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let text = cipher::decode(&self.key, cipher_text.trim())
            .with_context(|| format!("Failed to decrypt {}", self.path.display()))?;
        let value = Value::decode(&text)
            .with_context(|| format!("Corrupt table {}", self.path.display()))?;
        value
            .as_array()
            .and_then(|rows| rows.iter().map(R::from_value).collect())
            .with_context(|| format!("Corrupt row in {}", self.path.display()))
    }

    /// Encrypts and replaces the whole file.
    pub fn write(&self, rows: &[R]) -> Result<()> {
        let text = Value::Array(rows.iter().map(Row::to_value).collect()).encode();
        let cipher_text = cipher::encode(&self.key, &text);

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, cipher_text)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}
