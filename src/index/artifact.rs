//! Paired on-disk artifact: the compressed index and its metadata table.
//!
//! Both files share a fixed little-endian header:
//!
//! | field          | size |
//! |----------------|------|
//! | magic          | 8    |
//! | format version | 4    |
//! | artifact id    | 16   |
//! | id range start | 8    |
//! | id range end   | 8    |
//! | pair checksum  | 4    |
//! | body length    | 8    |
//! | body checksum  | 4    |
//!
//! followed by a bincode body. The pair checksum is a CRC-32 over the
//! artifact id and the id range, so the two halves of one save can be matched
//! without decoding either body. Files are written to a temporary name and
//! renamed into place.

use std::fs::{self, File};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use bit_vec::BitVec;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embedding::{EmbeddingProfile, EmbeddingStrategy, ModelFingerprint, ResolvedEmbedder};
use crate::error::{RagError, Result};
use crate::filing::{Chunk, InternalId};
use crate::index::{IndexConfig, IndexStats, IvfPqIndex, MetadataStore};

pub const INDEX_FILE: &str = "index.ivfpq";
pub const METADATA_FILE: &str = "metadata.bin";

const INDEX_MAGIC: &[u8; 8] = b"FSIVFPQ\0";
const METADATA_MAGIC: &[u8; 8] = b"FSMETA\0\0";
const FORMAT_VERSION: u32 = 2;
const HEADER_LEN: usize = 8 + 4 + 16 + 8 + 8 + 4 + 8 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    artifact_id: Uuid,
    id_start: u64,
    id_end: u64,
    pair_checksum: u32,
    body_len: u64,
    body_checksum: u32,
}

impl Header {
    fn new(artifact_id: Uuid, id_end: u64, body: &[u8]) -> Self {
        Self {
            artifact_id,
            id_start: 0,
            id_end,
            pair_checksum: pair_checksum(artifact_id, 0, id_end),
            body_len: body.len() as u64,
            body_checksum: crc32fast::hash(body),
        }
    }

    fn write_to<W: Write>(&self, magic: &[u8; 8], w: &mut W) -> Result<()> {
        w.write_all(magic)?;
        w.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        w.write_all(self.artifact_id.as_bytes())?;
        w.write_u64::<LittleEndian>(self.id_start)?;
        w.write_u64::<LittleEndian>(self.id_end)?;
        w.write_u32::<LittleEndian>(self.pair_checksum)?;
        w.write_u64::<LittleEndian>(self.body_len)?;
        w.write_u32::<LittleEndian>(self.body_checksum)?;
        Ok(())
    }

    fn read_from(magic: &[u8; 8], bytes: &[u8], name: &str) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(RagError::corrupt(format!("{name}: truncated header")));
        }
        let mut r = Cursor::new(bytes);
        let mut found = [0u8; 8];
        r.read_exact(&mut found)?;
        if &found != magic {
            return Err(RagError::corrupt(format!("{name}: bad magic")));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(RagError::corrupt(format!(
                "{name}: unsupported format version {version}"
            )));
        }
        let mut id = [0u8; 16];
        r.read_exact(&mut id)?;
        let header = Header {
            artifact_id: Uuid::from_bytes(id),
            id_start: r.read_u64::<LittleEndian>()?,
            id_end: r.read_u64::<LittleEndian>()?,
            pair_checksum: r.read_u32::<LittleEndian>()?,
            body_len: r.read_u64::<LittleEndian>()?,
            body_checksum: r.read_u32::<LittleEndian>()?,
        };
        if header.pair_checksum != pair_checksum(header.artifact_id, header.id_start, header.id_end)
        {
            return Err(RagError::corrupt(format!("{name}: id-range checksum mismatch")));
        }
        Ok(header)
    }
}

fn pair_checksum(artifact_id: Uuid, id_start: u64, id_end: u64) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(artifact_id.as_bytes());
    hasher.update(&id_start.to_le_bytes());
    hasher.update(&id_end.to_le_bytes());
    hasher.finalize()
}

#[derive(Serialize)]
struct IndexBodyRef<'a> {
    profile: EmbeddingProfile,
    models: &'a ModelFingerprint,
    created_at: DateTime<Utc>,
    index: &'a IvfPqIndex,
}

/// Owned twin of [`IndexBodyRef`]; both encode to the same bytes.
#[derive(Deserialize)]
struct IndexBody {
    profile: EmbeddingProfile,
    models: ModelFingerprint,
    created_at: DateTime<Utc>,
    index: IvfPqIndex,
}

/// Result of an integrity check, without serving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactReport {
    pub artifact_id: Uuid,
    pub profile: EmbeddingProfile,
    pub models: ModelFingerprint,
    pub created_at: DateTime<Utc>,
    pub id_range: (u64, u64),
    pub trained: bool,
    pub index_file_bytes: u64,
    pub metadata_file_bytes: u64,
}

/// The durable state of the retrieval subsystem.
#[derive(Debug, Clone)]
pub struct IndexArtifact {
    artifact_id: Uuid,
    profile: EmbeddingProfile,
    models: ModelFingerprint,
    created_at: DateTime<Utc>,
    pub(crate) index: IvfPqIndex,
    pub(crate) metadata: MetadataStore,
}

impl IndexArtifact {
    /// Start an empty artifact with a fresh id for vectors produced by
    /// `embedder`.
    pub fn new(embedder: &ResolvedEmbedder, config: IndexConfig) -> Result<Self> {
        Ok(Self {
            artifact_id: Uuid::new_v4(),
            profile: embedder.profile(),
            models: embedder.fingerprint(),
            created_at: Utc::now(),
            index: IvfPqIndex::new(config)?,
            metadata: MetadataStore::new(),
        })
    }

    pub fn artifact_id(&self) -> Uuid {
        self.artifact_id
    }

    pub fn profile(&self) -> EmbeddingProfile {
        self.profile
    }

    /// Models the stored vectors were embedded with.
    pub fn models(&self) -> &ModelFingerprint {
        &self.models
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn index(&self) -> &IvfPqIndex {
        &self.index
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn stats(&self) -> IndexStats {
        self.index.stats()
    }

    /// Add one embedded chunk under the next internal id.
    ///
    /// The vector goes to the index, which assigns the id, and the chunk is
    /// recorded under the same id in the metadata table.
    pub fn add_chunk(
        &mut self,
        vector: &[f32],
        chunk: &Chunk,
        strategy: EmbeddingStrategy,
    ) -> Result<InternalId> {
        let id = self.index.add(vector)?;
        self.metadata.push(id, chunk, strategy)?;
        Ok(id)
    }

    pub fn index_path(dir: &Path) -> PathBuf {
        dir.join(INDEX_FILE)
    }

    pub fn metadata_path(dir: &Path) -> PathBuf {
        dir.join(METADATA_FILE)
    }

    /// Whether an artifact pair exists in `dir`.
    pub fn exists(dir: &Path) -> bool {
        Self::index_path(dir).is_file() && Self::metadata_path(dir).is_file()
    }

    /// Write both files into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        if self.metadata.len() != self.index.len() {
            return Err(RagError::index(format!(
                "refusing to save: index holds {} ids but metadata holds {}",
                self.index.len(),
                self.metadata.len()
            )));
        }
        fs::create_dir_all(dir)?;
        let id_end = self.index.len() as u64;

        let index_body = bincode::serialize(&IndexBodyRef {
            profile: self.profile,
            models: &self.models,
            created_at: self.created_at,
            index: &self.index,
        })?;
        let metadata_body = bincode::serialize(&self.metadata)?;

        let index_tmp = dir.join(format!("{INDEX_FILE}.tmp"));
        let metadata_tmp = dir.join(format!("{METADATA_FILE}.tmp"));
        write_file(
            &index_tmp,
            INDEX_MAGIC,
            &Header::new(self.artifact_id, id_end, &index_body),
            &index_body,
        )?;
        write_file(
            &metadata_tmp,
            METADATA_MAGIC,
            &Header::new(self.artifact_id, id_end, &metadata_body),
            &metadata_body,
        )?;
        fs::rename(&metadata_tmp, Self::metadata_path(dir))?;
        fs::rename(&index_tmp, Self::index_path(dir))?;

        log::info!(
            "saved artifact {} ({} vectors, trained: {}) to {}",
            self.artifact_id,
            id_end,
            self.index.is_trained(),
            dir.display()
        );
        Ok(())
    }

    /// Load and verify the pair in `dir`.
    ///
    /// Any disagreement between the two files, or any damaged body, fails
    /// with `CorruptIndex`. A missing file surfaces as an I/O error.
    pub fn load(dir: &Path) -> Result<Self> {
        let (artifact, _) = Self::load_with_sizes(dir)?;
        log::info!(
            "loaded artifact {} ({} vectors) from {}",
            artifact.artifact_id,
            artifact.index.len(),
            dir.display()
        );
        Ok(artifact)
    }

    /// Check the pair in `dir` and report on it.
    pub fn verify(dir: &Path) -> Result<ArtifactReport> {
        let (artifact, (index_bytes, metadata_bytes)) = Self::load_with_sizes(dir)?;
        Ok(ArtifactReport {
            artifact_id: artifact.artifact_id,
            profile: artifact.profile,
            models: artifact.models,
            created_at: artifact.created_at,
            id_range: (0, artifact.index.len() as u64),
            trained: artifact.index.is_trained(),
            index_file_bytes: index_bytes,
            metadata_file_bytes: metadata_bytes,
        })
    }

    fn load_with_sizes(dir: &Path) -> Result<(Self, (u64, u64))> {
        let index_file = File::open(Self::index_path(dir))?;
        let metadata_file = File::open(Self::metadata_path(dir))?;
        // Safety: the files are opened read-only and the maps are dropped
        // before this function returns.
        let index_map = unsafe { Mmap::map(&index_file)? };
        let metadata_map = unsafe { Mmap::map(&metadata_file)? };

        let index_header = Header::read_from(INDEX_MAGIC, &index_map, INDEX_FILE)?;
        let metadata_header = Header::read_from(METADATA_MAGIC, &metadata_map, METADATA_FILE)?;

        if index_header.artifact_id != metadata_header.artifact_id {
            return Err(RagError::corrupt(format!(
                "artifact id mismatch: {} has {}, {} has {}",
                INDEX_FILE, index_header.artifact_id, METADATA_FILE, metadata_header.artifact_id
            )));
        }
        if (index_header.id_start, index_header.id_end)
            != (metadata_header.id_start, metadata_header.id_end)
            || index_header.pair_checksum != metadata_header.pair_checksum
        {
            return Err(RagError::corrupt(format!(
                "id range mismatch: {} covers {}..{}, {} covers {}..{}",
                INDEX_FILE,
                index_header.id_start,
                index_header.id_end,
                METADATA_FILE,
                metadata_header.id_start,
                metadata_header.id_end
            )));
        }

        let index_body = body(&index_map, &index_header, INDEX_FILE)?;
        let metadata_body = body(&metadata_map, &metadata_header, METADATA_FILE)?;

        let decoded: IndexBody = bincode::deserialize(index_body)
            .map_err(|e| RagError::corrupt(format!("{INDEX_FILE}: {e}")))?;
        let mut metadata: MetadataStore = bincode::deserialize(metadata_body)
            .map_err(|e| RagError::corrupt(format!("{METADATA_FILE}: {e}")))?;
        metadata.rebuild_indexes()?;
        decoded.index.check_integrity()?;

        let id_end = index_header.id_end;
        if decoded.index.len() as u64 != id_end || metadata.len() as u64 != id_end {
            return Err(RagError::corrupt(format!(
                "header declares {id_end} ids but index holds {} and metadata holds {}",
                decoded.index.len(),
                metadata.len()
            )));
        }
        check_ids_once(&decoded.index)?;

        let sizes = (index_map.len() as u64, metadata_map.len() as u64);
        Ok((
            Self {
                artifact_id: index_header.artifact_id,
                profile: decoded.profile,
                models: decoded.models,
                created_at: decoded.created_at,
                index: decoded.index,
                metadata,
            },
            sizes,
        ))
    }
}

fn write_file(path: &Path, magic: &[u8; 8], header: &Header, body: &[u8]) -> Result<()> {
    let mut file = std::io::BufWriter::new(File::create(path)?);
    header.write_to(magic, &mut file)?;
    file.write_all(body)?;
    let file = file.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

fn body<'a>(bytes: &'a [u8], header: &Header, name: &str) -> Result<&'a [u8]> {
    let end = HEADER_LEN as u64 + header.body_len;
    if bytes.len() as u64 != end {
        return Err(RagError::corrupt(format!(
            "{name}: expected {end} bytes, found {}",
            bytes.len()
        )));
    }
    let body = &bytes[HEADER_LEN..];
    if crc32fast::hash(body) != header.body_checksum {
        return Err(RagError::corrupt(format!("{name}: body checksum mismatch")));
    }
    Ok(body)
}

/// Every id in `0..len` must appear in the index exactly once.
fn check_ids_once(index: &IvfPqIndex) -> Result<()> {
    let len = index.len();
    let mut seen = BitVec::from_elem(len, false);
    let mut count = 0usize;
    for id in index.ids() {
        let i = id as usize;
        if i >= len || seen.get(i).unwrap_or(false) {
            return Err(RagError::corrupt(format!("id {id} is duplicated or out of range")));
        }
        seen.set(i, true);
        count += 1;
    }
    if count != len {
        return Err(RagError::corrupt(format!(
            "index holds {count} ids for an id range of {len}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use super::*;
    use crate::embedding::{EmbedderSet, HashingEmbedder};

    fn embedder(seed: u32) -> ResolvedEmbedder {
        EmbedderSet::new()
            .with_general(Arc::new(HashingEmbedder::with_seed(
                EmbeddingStrategy::General,
                4,
                seed,
            )))
            .resolve(EmbeddingProfile::General, 8)
            .unwrap()
    }

    fn artifact(n: usize) -> IndexArtifact {
        let config = IndexConfig {
            dimension: 4,
            n_lists: 2,
            pq_subvectors: 2,
            pq_bits: 2,
            training_threshold: 8,
            kmeans_iterations: 4,
            ..IndexConfig::default()
        };
        let mut artifact = IndexArtifact::new(&embedder(0), config).unwrap();
        for i in 0..n {
            let v = [i as f32, 1.0, (i % 3) as f32, -1.0];
            let chunk = Chunk {
                company_id: (i % 2) as u64,
                source_path: Arc::from("f.txt"),
                start_offset: i as u64 * 10,
                end_offset: i as u64 * 10 + 5,
                filing_type: Arc::from("10-K"),
                filing_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                section_hint: None,
            };
            artifact.add_chunk(&v, &chunk, EmbeddingStrategy::General).unwrap();
        }
        artifact
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let original = artifact(12);
        original.save(dir.path()).unwrap();

        let loaded = IndexArtifact::load(dir.path()).unwrap();
        assert_eq!(loaded.artifact_id(), original.artifact_id());
        assert_eq!(loaded.index(), original.index());
        assert_eq!(loaded.metadata().get(7), original.metadata().get(7));

        let report = IndexArtifact::verify(dir.path()).unwrap();
        assert_eq!(report.id_range, (0, 12));
        assert!(report.trained);
    }

    #[test]
    fn test_models_survive_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        artifact(12).save(dir.path()).unwrap();

        let loaded = IndexArtifact::load(dir.path()).unwrap();
        assert_eq!(loaded.models(), &embedder(0).fingerprint());
        assert!(loaded.models().ensure_matches(&embedder(0).fingerprint()).is_ok());
        assert!(loaded.models().ensure_matches(&embedder(9).fingerprint()).is_err());
        assert_eq!(
            IndexArtifact::verify(dir.path()).unwrap().models,
            embedder(0).fingerprint()
        );
    }

    #[test]
    fn test_untrained_artifact_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        artifact(3).save(dir.path()).unwrap();
        let loaded = IndexArtifact::load(dir.path()).unwrap();
        assert_eq!(loaded.index().buffered_len(), 3);
    }

    #[test]
    fn test_flipped_byte_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        artifact(12).save(dir.path()).unwrap();
        let path = IndexArtifact::metadata_path(dir.path());
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();
        assert!(matches!(
            IndexArtifact::load(dir.path()),
            Err(RagError::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_mismatched_pair_is_corrupt() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        artifact(12).save(a.path()).unwrap();
        artifact(12).save(b.path()).unwrap();
        fs::copy(
            IndexArtifact::metadata_path(b.path()),
            IndexArtifact::metadata_path(a.path()),
        )
        .unwrap();
        match IndexArtifact::load(a.path()) {
            Err(RagError::CorruptIndex(msg)) => assert!(msg.contains("artifact id mismatch")),
            other => panic!("expected CorruptIndex, got {:?}", other.map(|a| a.artifact_id())),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = IndexArtifact::load(dir.path()).unwrap_err();
        assert!(err.is_missing_file());
        assert!(!IndexArtifact::exists(dir.path()));
    }
}
