//! IVF-PQ index with deferred training.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::filing::InternalId;
use crate::index::IndexConfig;
use crate::index::kmeans::{KMeansConfig, assign, kmeans, nearest};
use crate::index::quantization::ProductQuantizer;

/// A search hit: internal id and approximate squared L2 distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: InternalId,
    pub distance: f32,
}

impl Eq for Neighbor {}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Vectors held before the codebooks are trained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingBuffer {
    ids: Vec<InternalId>,
    data: Vec<f32>,
}

impl TrainingBuffer {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct InvertedList {
    ids: Vec<InternalId>,
    codes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TrainedIndex {
    /// `n_lists * dim` coarse centroids.
    centroids: Vec<f32>,
    pq: ProductQuantizer,
    lists: Vec<InvertedList>,
    /// `(list, position)` for every internal id, indexed by id.
    locator: Vec<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum IndexState {
    Buffering(TrainingBuffer),
    Trained(TrainedIndex),
}

/// Summary of an index for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_vectors: usize,
    pub buffered_vectors: usize,
    pub trained: bool,
    pub dimension: usize,
    pub n_lists: usize,
    pub code_bytes_per_vector: usize,
    pub compressed_bytes: usize,
    pub uncompressed_bytes: usize,
}

impl IndexStats {
    /// Uncompressed size over compressed size, or 0 before training.
    pub fn compression_ratio(&self) -> f64 {
        if self.compressed_bytes == 0 {
            0.0
        } else {
            self.uncompressed_bytes as f64 / self.compressed_bytes as f64
        }
    }
}

/// Compressed approximate nearest neighbor index.
///
/// Vectors are buffered until `training_threshold` of them have been added.
/// The next add trains the coarse quantizer and the product quantizer on a
/// sample of the buffer, encodes the buffer and drops it. Afterwards every add
/// is encoded directly. Internal ids are assigned by the index, start at 0 and
/// are never reused.
///
/// Vectors are expected to be unit-normalized; distances are squared L2 on
/// the residual to the coarse centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvfPqIndex {
    config: IndexConfig,
    next_id: InternalId,
    state: IndexState,
}

impl IvfPqIndex {
    /// Create a new, untrained index.
    pub fn new(config: IndexConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            next_id: 0,
            state: IndexState::Buffering(TrainingBuffer::default()),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    /// Number of vectors added, buffered or encoded.
    pub fn len(&self) -> usize {
        self.next_id as usize
    }

    pub fn is_empty(&self) -> bool {
        self.next_id == 0
    }

    pub fn is_trained(&self) -> bool {
        matches!(self.state, IndexState::Trained(_))
    }

    /// Number of vectors waiting for training.
    pub fn buffered_len(&self) -> usize {
        match &self.state {
            IndexState::Buffering(buffer) => buffer.len(),
            IndexState::Trained(_) => 0,
        }
    }

    /// Id the next added vector will receive.
    pub fn next_id(&self) -> InternalId {
        self.next_id
    }

    /// Add one vector and return its internal id.
    ///
    /// Reaching the training threshold trains the index as part of this call.
    pub fn add(&mut self, vector: &[f32]) -> Result<InternalId> {
        self.check_vector(vector)?;
        let id = self.next_id;

        match &mut self.state {
            IndexState::Buffering(buffer) => {
                buffer.ids.push(id);
                buffer.data.extend_from_slice(vector);
                self.next_id += 1;
                if buffer.len() >= self.config.training_threshold {
                    self.train()?;
                }
            }
            IndexState::Trained(trained) => {
                trained.insert(id, vector, self.config.dimension)?;
                self.next_id += 1;
            }
        }
        Ok(id)
    }

    /// Add many vectors, returning their ids in order.
    pub fn add_batch(&mut self, vectors: &[Vec<f32>]) -> Result<Vec<InternalId>> {
        vectors.iter().map(|v| self.add(v)).collect()
    }

    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(RagError::invalid_operation(format!(
                "Vector dimension mismatch: expected {}, got {}",
                self.config.dimension,
                vector.len()
            )));
        }
        if !vector.iter().all(|x| x.is_finite()) {
            return Err(RagError::invalid_operation(
                "Vector contains invalid values (NaN or infinity)",
            ));
        }
        Ok(())
    }

    fn train(&mut self) -> Result<()> {
        let IndexState::Buffering(buffer) = &self.state else {
            return Ok(());
        };
        let dim = self.config.dimension;
        let n = buffer.len();

        let sample = if n > self.config.max_training_samples {
            let mut rng = StdRng::seed_from_u64(self.config.seed);
            let mut picked =
                rand::seq::index::sample(&mut rng, n, self.config.max_training_samples).into_vec();
            picked.sort_unstable();
            let mut sample = Vec::with_capacity(picked.len() * dim);
            for i in picked {
                sample.extend_from_slice(&buffer.data[i * dim..(i + 1) * dim]);
            }
            sample
        } else {
            buffer.data.clone()
        };
        let sample_rows = sample.len() / dim;

        log::info!(
            "training IVF-PQ index on {} of {} buffered vectors into {} lists",
            sample_rows,
            n,
            self.config.n_lists.min(sample_rows)
        );

        let centroids = kmeans(
            &sample,
            dim,
            &KMeansConfig {
                k: self.config.n_lists,
                max_iterations: self.config.kmeans_iterations,
                seed: self.config.seed,
            },
        )?;
        let residuals = residuals(&sample, dim, &centroids);
        let pq = ProductQuantizer::train(
            &residuals,
            dim,
            self.config.pq_subvectors,
            self.config.pq_bits,
            self.config.kmeans_iterations,
            self.config.seed.wrapping_add(1),
        )?;

        let n_lists = centroids.len() / dim;
        let mut trained = TrainedIndex {
            centroids,
            pq,
            lists: vec![InvertedList::default(); n_lists],
            locator: Vec::with_capacity(n),
        };

        let encoded: Vec<(usize, Vec<u8>)> = buffer
            .data
            .par_chunks_exact(dim)
            .map(|v| trained.encode(v, dim))
            .collect();
        for (&id, (list, codes)) in buffer.ids.iter().zip(encoded) {
            trained.push(id, list, &codes)?;
        }

        log::info!("IVF-PQ index trained, {} vectors encoded", n);
        self.state = IndexState::Trained(trained);
        Ok(())
    }

    fn trained(&self) -> Result<&TrainedIndex> {
        match &self.state {
            IndexState::Trained(trained) => Ok(trained),
            IndexState::Buffering(buffer) => Err(RagError::BelowTrainingThreshold {
                buffered: buffer.len(),
                threshold: self.config.training_threshold,
            }),
        }
    }

    /// The `k` nearest neighbors of `query`, probing `n_probe` lists.
    ///
    /// Fails with `BelowTrainingThreshold` before training.
    pub fn search(&self, query: &[f32], k: usize, n_probe: usize) -> Result<Vec<Neighbor>> {
        self.search_filtered(query, k, n_probe, |_| true)
    }

    /// Like [`Self::search`], keeping only ids accepted by `filter`.
    ///
    /// Lists are probed nearest first. At least `n_probe` lists are scanned,
    /// and probing continues until `k` accepted neighbors are found or every
    /// list has been scanned, so a selective filter returns every match it
    /// can reach instead of an empty or padded result.
    pub fn search_filtered<F>(
        &self,
        query: &[f32],
        k: usize,
        n_probe: usize,
        filter: F,
    ) -> Result<Vec<Neighbor>>
    where
        F: Fn(InternalId) -> bool,
    {
        let trained = self.trained()?;
        self.check_vector(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let dim = self.config.dimension;

        let mut order: Vec<(usize, f32)> = trained
            .centroids
            .chunks_exact(dim)
            .enumerate()
            .map(|(i, c)| (i, crate::vector::l2_squared(query, c)))
            .collect();
        order.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        let mut heap = BinaryHeap::with_capacity(k + 1);
        let mut accepted = 0usize;
        let mut residual = vec![0.0f32; dim];
        for (probed, (list_no, _)) in order.into_iter().enumerate() {
            if probed >= n_probe.max(1) && accepted >= k {
                break;
            }
            let list = &trained.lists[list_no];
            if list.ids.is_empty() {
                continue;
            }
            trained.residual_into(query, list_no, dim, &mut residual);
            let table = trained.pq.distance_table(&residual)?;
            let m = trained.pq.code_len();
            for (pos, &id) in list.ids.iter().enumerate() {
                if !filter(id) {
                    continue;
                }
                accepted += 1;
                let distance = trained.pq.adc(&table, &list.codes[pos * m..(pos + 1) * m]);
                push_bounded(&mut heap, Neighbor { id, distance }, k);
            }
        }

        Ok(heap.into_sorted_vec())
    }

    /// Exact ADC ranking of a known set of ids.
    ///
    /// Used for small filtered partitions, where scoring every member is
    /// cheaper than probing lists.
    pub fn search_ids(&self, query: &[f32], ids: &[InternalId], k: usize) -> Result<Vec<Neighbor>> {
        let trained = self.trained()?;
        self.check_vector(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let dim = self.config.dimension;
        let m = trained.pq.code_len();

        let mut tables: HashMap<u32, Vec<f32>> = HashMap::new();
        let mut residual = vec![0.0f32; dim];
        let mut heap = BinaryHeap::with_capacity(k + 1);
        for &id in ids {
            let Some(&(list_no, pos)) = trained.locator.get(id as usize) else {
                return Err(RagError::not_found(format!("internal id {id}")));
            };
            let table = match tables.get(&list_no) {
                Some(table) => table,
                None => {
                    trained.residual_into(query, list_no as usize, dim, &mut residual);
                    let table = trained.pq.distance_table(&residual)?;
                    tables.entry(list_no).or_insert(table)
                }
            };
            let codes = &trained.lists[list_no as usize].codes;
            let pos = pos as usize;
            let distance = trained.pq.adc(table, &codes[pos * m..(pos + 1) * m]);
            push_bounded(&mut heap, Neighbor { id, distance }, k);
        }
        Ok(heap.into_sorted_vec())
    }

    /// Approximate vector stored for `id`.
    pub fn reconstruct(&self, id: InternalId) -> Result<Vec<f32>> {
        let trained = self.trained()?;
        let &(list_no, pos) = trained
            .locator
            .get(id as usize)
            .ok_or_else(|| RagError::not_found(format!("internal id {id}")))?;
        let m = trained.pq.code_len();
        let pos = pos as usize;
        let codes = &trained.lists[list_no as usize].codes[pos * m..(pos + 1) * m];
        let mut v = trained.pq.decode(codes)?;
        let dim = self.config.dimension;
        let centroid = &trained.centroids[list_no as usize * dim..(list_no as usize + 1) * dim];
        for (x, c) in v.iter_mut().zip(centroid) {
            *x += c;
        }
        Ok(v)
    }

    pub fn stats(&self) -> IndexStats {
        let dim = self.config.dimension;
        let total = self.len();
        match &self.state {
            IndexState::Buffering(buffer) => IndexStats {
                total_vectors: total,
                buffered_vectors: buffer.len(),
                trained: false,
                dimension: dim,
                n_lists: 0,
                code_bytes_per_vector: 0,
                compressed_bytes: 0,
                uncompressed_bytes: total * dim * 4,
            },
            IndexState::Trained(trained) => {
                let codes: usize = trained.lists.iter().map(|l| l.codes.len()).sum();
                IndexStats {
                    total_vectors: total,
                    buffered_vectors: 0,
                    trained: true,
                    dimension: dim,
                    n_lists: trained.lists.len(),
                    code_bytes_per_vector: trained.pq.code_len(),
                    compressed_bytes: codes + total * std::mem::size_of::<InternalId>(),
                    uncompressed_bytes: total * dim * 4,
                }
            }
        }
    }

    /// Every internal id held by the index, buffered or encoded, in no
    /// particular order.
    pub fn ids(&self) -> Box<dyn Iterator<Item = InternalId> + '_> {
        match &self.state {
            IndexState::Buffering(buffer) => Box::new(buffer.ids.iter().copied()),
            IndexState::Trained(trained) => {
                Box::new(trained.lists.iter().flat_map(|l| l.ids.iter().copied()))
            }
        }
    }

    /// Structural checks for an index read from disk.
    pub(crate) fn check_integrity(&self) -> Result<()> {
        self.config.validate().map_err(|e| RagError::corrupt(e.to_string()))?;
        let dim = self.config.dimension;
        match &self.state {
            IndexState::Buffering(buffer) => {
                if buffer.data.len() != buffer.ids.len() * dim {
                    return Err(RagError::corrupt("training buffer length mismatch"));
                }
            }
            IndexState::Trained(trained) => {
                if trained.pq.dimension() != dim
                    || trained.centroids.len() != trained.lists.len() * dim
                {
                    return Err(RagError::corrupt("quantizer shape does not match index"));
                }
                let m = trained.pq.code_len();
                for list in &trained.lists {
                    if list.codes.len() != list.ids.len() * m {
                        return Err(RagError::corrupt("inverted list length mismatch"));
                    }
                    trained.pq.validate_codes(&list.codes)?;
                }
                if trained.locator.len() != self.len() {
                    return Err(RagError::corrupt("id locator does not cover id range"));
                }
                for (id, &(list_no, pos)) in trained.locator.iter().enumerate() {
                    let found = trained
                        .lists
                        .get(list_no as usize)
                        .and_then(|l| l.ids.get(pos as usize));
                    if found != Some(&(id as InternalId)) {
                        return Err(RagError::corrupt(format!("id {id} is not where the locator says")));
                    }
                }
            }
        }
        Ok(())
    }
}

impl TrainedIndex {
    fn encode(&self, v: &[f32], dim: usize) -> (usize, Vec<u8>) {
        let (list, _) = nearest(&self.centroids, dim, v);
        let centroid = &self.centroids[list * dim..(list + 1) * dim];
        let residual: Vec<f32> = v.iter().zip(centroid).map(|(x, c)| x - c).collect();
        let mut codes = Vec::with_capacity(self.pq.code_len());
        self.pq.encode_into(&residual, &mut codes);
        (list, codes)
    }

    fn insert(&mut self, id: InternalId, v: &[f32], dim: usize) -> Result<()> {
        let (list, codes) = self.encode(v, dim);
        self.push(id, list, &codes)
    }

    fn push(&mut self, id: InternalId, list_no: usize, codes: &[u8]) -> Result<()> {
        if id as usize != self.locator.len() {
            return Err(RagError::index(format!(
                "out-of-order insert of id {id}, expected {}",
                self.locator.len()
            )));
        }
        let list = &mut self.lists[list_no];
        self.locator.push((list_no as u32, list.ids.len() as u32));
        list.ids.push(id);
        list.codes.extend_from_slice(codes);
        Ok(())
    }

    fn residual_into(&self, query: &[f32], list_no: usize, dim: usize, out: &mut [f32]) {
        let centroid = &self.centroids[list_no * dim..(list_no + 1) * dim];
        for ((o, q), c) in out.iter_mut().zip(query).zip(centroid) {
            *o = q - c;
        }
    }
}

fn residuals(data: &[f32], dim: usize, centroids: &[f32]) -> Vec<f32> {
    let assignments = assign(data, dim, centroids);
    let mut out = Vec::with_capacity(data.len());
    for (row, (list, _)) in data.chunks_exact(dim).zip(assignments) {
        let centroid = &centroids[list * dim..(list + 1) * dim];
        out.extend(row.iter().zip(centroid).map(|(x, c)| x - c));
    }
    out
}

/// Keep the `k` smallest neighbors in a max-heap.
fn push_bounded(heap: &mut BinaryHeap<Neighbor>, neighbor: Neighbor, k: usize) {
    if heap.len() < k {
        heap.push(neighbor);
    } else if let Some(worst) = heap.peek() {
        if neighbor < *worst {
            heap.pop();
            heap.push(neighbor);
        }
    }
}
