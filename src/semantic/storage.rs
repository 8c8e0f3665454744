//! Binary storage for corpus embeddings.
//!
//! File format: vectors.bin
//!
//! Header (79 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - catalog: [u8; 32] (SHA256 fingerprint of the catalog paths)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated, in catalog order):
//! - embedding: [f32; dimensions] (little-endian)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::catalog::CategoryRecord;
use crate::semantic::index::CorpusIndex;
use crate::semantic::EmbeddingVector;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + catalog(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 79;

/// Offset of the checksum field
const CHECKSUM_OFFSET: usize = HEADER_SIZE - 4;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Catalog mismatch: file was built from a different catalog")]
    CatalogMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Entry count mismatch: expected {expected}, file has {got}")]
    CountMismatch { expected: usize, got: u64 },

    #[error("Cannot store {0}-dimensional vectors")]
    UnsupportedDimensions(usize),
}

/// SHA256 of the model name, identifying which model produced the vectors.
pub fn model_id(model_name: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}

/// SHA256 over every record path, in order.
pub fn catalog_fingerprint(records: &[CategoryRecord]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for record in records {
        hasher.update(record.full_path.as_bytes());
        hasher.update([0u8]);
    }
    hasher.finalize().into()
}

#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    catalog: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

/// Storage manager for corpus vectors.
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load vectors for a catalog, in catalog order.
    ///
    /// Fails unless the file was written by the same model for the same
    /// catalog with the expected dimensions and record count.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_catalog: &[u8; 32],
        expected_dimensions: usize,
        expected_count: usize,
    ) -> Result<Vec<EmbeddingVector>, VectorStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;

        if header.model_id != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }
        if header.catalog != *expected_catalog {
            return Err(VectorStorageError::CatalogMismatch);
        }
        if header.dimensions as usize != expected_dimensions {
            return Err(VectorStorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        // checked before allocating anything sized by the file
        if header.entry_count != expected_count as u64 {
            return Err(VectorStorageError::CountMismatch {
                expected: expected_count,
                got: header.entry_count,
            });
        }

        let dimensions = header.dimensions as usize;
        let mut vectors = Vec::with_capacity(expected_count);
        let mut buf = vec![0u8; dimensions * 4];
        for _ in 0..header.entry_count {
            reader.read_exact(&mut buf)?;
            let embedding: Vec<f32> = buf
                .chunks_exact(4)
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect();
            vectors.push(Arc::from(embedding));
        }

        log::debug!(
            "read {} vectors (format v{}) from {}",
            vectors.len(),
            header.version,
            self.path.display()
        );

        Ok(vectors)
    }

    /// Save the index vectors.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn save(
        &self,
        index: &CorpusIndex,
        model_id: &[u8; 32],
        catalog: &[u8; 32],
    ) -> Result<(), VectorStorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("tmp");

        let result = self.write_to_file(&temp_path, index, model_id, catalog);

        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    fn write_to_file(
        &self,
        path: &Path,
        index: &CorpusIndex,
        model_id: &[u8; 32],
        catalog: &[u8; 32],
    ) -> Result<(), VectorStorageError> {
        let dimensions = u16::try_from(index.dimensions())
            .map_err(|_| VectorStorageError::UnsupportedDimensions(index.dimensions()))?;

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            catalog: *catalog,
            dimensions,
            entry_count: index.len() as u64,
        };
        writer.write_all(&encode_header(&header))?;

        for vector in index.vectors() {
            for value in vector.iter() {
                writer.write_all(&value.to_le_bytes())?;
            }
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;

        Ok(())
    }
}

fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn encode_header(header: &Header) -> [u8; HEADER_SIZE] {
    let mut bytes = [0u8; HEADER_SIZE];

    bytes[0] = header.version;
    bytes[1..33].copy_from_slice(&header.model_id);
    bytes[33..65].copy_from_slice(&header.catalog);
    bytes[65..67].copy_from_slice(&header.dimensions.to_le_bytes());
    bytes[67..75].copy_from_slice(&header.entry_count.to_le_bytes());

    let checksum = compute_checksum(&bytes[..CHECKSUM_OFFSET]);
    bytes[CHECKSUM_OFFSET..].copy_from_slice(&checksum.to_le_bytes());

    bytes
}

fn read_header(reader: &mut impl Read) -> Result<Header, VectorStorageError> {
    let mut bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut bytes)?;

    let version = bytes[0];
    if version != FORMAT_VERSION {
        return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
    }

    let mut stored = [0u8; 4];
    stored.copy_from_slice(&bytes[CHECKSUM_OFFSET..]);
    if u32::from_le_bytes(stored) != compute_checksum(&bytes[..CHECKSUM_OFFSET]) {
        return Err(VectorStorageError::ChecksumMismatch);
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&bytes[1..33]);
    let mut catalog = [0u8; 32];
    catalog.copy_from_slice(&bytes[33..65]);
    let mut dimensions = [0u8; 2];
    dimensions.copy_from_slice(&bytes[65..67]);
    let mut entry_count = [0u8; 8];
    entry_count.copy_from_slice(&bytes[67..75]);

    Ok(Header {
        version,
        model_id,
        catalog,
        dimensions: u16::from_le_bytes(dimensions),
        entry_count: u64::from_le_bytes(entry_count),
    })
}
