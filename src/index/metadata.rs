//! Columnar metadata table keyed by internal id.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use bit_vec::BitVec;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingStrategy;
use crate::error::{RagError, Result};
use crate::filing::{Chunk, CompanyId, InternalId};

const NO_SECTION: u32 = u32::MAX;

/// Interned strings with dense ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StringTable {
    values: Vec<Arc<str>>,
    #[serde(skip)]
    lookup: AHashMap<Arc<str>, u32>,
}

impl StringTable {
    fn intern(&mut self, value: &Arc<str>) -> u32 {
        if let Some(&id) = self.lookup.get(value) {
            return id;
        }
        let id = self.values.len() as u32;
        self.values.push(Arc::clone(value));
        self.lookup.insert(Arc::clone(value), id);
        id
    }

    fn id_of(&self, value: &str) -> Option<u32> {
        self.lookup.get(value).copied()
    }

    fn get(&self, id: u32) -> Option<&Arc<str>> {
        self.values.get(id as usize)
    }

    fn rebuild(&mut self) {
        self.lookup = self
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| (Arc::clone(v), i as u32))
            .collect();
    }
}

/// Metadata predicates applied during search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub company: Option<CompanyId>,
    /// Accepted filing types. Empty accepts every type.
    pub filing_types: Vec<String>,
    /// Keep filings dated on or after this day.
    pub filed_after: Option<NaiveDate>,
    /// Keep chunks embedded with this strategy.
    pub strategy: Option<EmbeddingStrategy>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.company.is_none()
            && self.filing_types.is_empty()
            && self.filed_after.is_none()
            && self.strategy.is_none()
    }
}

/// A [`MetadataFilter`] bound to one store's string tables.
#[derive(Debug, Clone)]
pub struct ResolvedFilter {
    company: Option<CompanyId>,
    types: Option<BitVec>,
    filed_after: Option<i32>,
    strategy: Option<u8>,
}

impl ResolvedFilter {
    pub fn company(&self) -> Option<CompanyId> {
        self.company
    }
}

/// Dense, parallel columns for every indexed chunk.
///
/// Row `i` describes internal id `i`. Strings are interned so a row costs a
/// few dozen bytes regardless of path length.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataStore {
    company_ids: Vec<CompanyId>,
    path_ids: Vec<u32>,
    starts: Vec<u64>,
    ends: Vec<u64>,
    type_ids: Vec<u16>,
    dates: Vec<i32>,
    section_ids: Vec<u32>,
    strategies: Vec<u8>,
    paths: StringTable,
    types: StringTable,
    sections: StringTable,
    #[serde(skip)]
    by_company: AHashMap<CompanyId, Vec<InternalId>>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.company_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.company_ids.is_empty()
    }

    /// Append the row for `id`, which must be the next id.
    pub fn push(&mut self, id: InternalId, chunk: &Chunk, strategy: EmbeddingStrategy) -> Result<()> {
        if id as usize != self.len() {
            return Err(RagError::index(format!(
                "metadata rows must be dense: got id {id}, expected {}",
                self.len()
            )));
        }
        let type_id = self.types.intern(&chunk.filing_type);
        if type_id > u16::MAX as u32 {
            return Err(RagError::index("too many distinct filing types"));
        }

        self.company_ids.push(chunk.company_id);
        self.path_ids.push(self.paths.intern(&chunk.source_path));
        self.starts.push(chunk.start_offset);
        self.ends.push(chunk.end_offset);
        self.type_ids.push(type_id as u16);
        self.dates.push(chunk.filing_date.num_days_from_ce());
        let section = match &chunk.section_hint {
            Some(s) => self.sections.intern(s),
            None => NO_SECTION,
        };
        self.section_ids.push(section);
        self.strategies.push(strategy.to_tag());
        self.by_company.entry(chunk.company_id).or_default().push(id);
        Ok(())
    }

    /// The chunk stored for `id`.
    pub fn get(&self, id: InternalId) -> Option<Chunk> {
        let i = id as usize;
        if i >= self.len() {
            return None;
        }
        Some(Chunk {
            company_id: self.company_ids[i],
            source_path: Arc::clone(self.paths.get(self.path_ids[i])?),
            start_offset: self.starts[i],
            end_offset: self.ends[i],
            filing_type: Arc::clone(self.types.get(self.type_ids[i] as u32)?),
            filing_date: NaiveDate::from_num_days_from_ce_opt(self.dates[i])?,
            section_hint: match self.section_ids[i] {
                NO_SECTION => None,
                s => Some(Arc::clone(self.sections.get(s)?)),
            },
        })
    }

    /// Strategy the vector for `id` was embedded with.
    pub fn strategy(&self, id: InternalId) -> Option<EmbeddingStrategy> {
        self.strategies
            .get(id as usize)
            .and_then(|t| EmbeddingStrategy::from_tag(*t))
    }

    /// Ids of every chunk of `company`, ascending.
    pub fn ids_for_company(&self, company: CompanyId) -> &[InternalId] {
        self.by_company
            .get(&company)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn company_count(&self) -> usize {
        self.by_company.len()
    }

    /// Number of chunks per filing type.
    pub fn filing_type_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = vec![0usize; self.types.values.len()];
        for &t in &self.type_ids {
            counts[t as usize] += 1;
        }
        self.types
            .values
            .iter()
            .zip(counts)
            .map(|(name, count)| (name.to_string(), count))
            .collect()
    }

    /// Bind `filter` to this store's string tables.
    pub fn resolve_filter(&self, filter: &MetadataFilter) -> ResolvedFilter {
        let types = (!filter.filing_types.is_empty()).then(|| {
            let mut bits = BitVec::from_elem(self.types.values.len(), false);
            for name in &filter.filing_types {
                if let Some(id) = self.types.id_of(name) {
                    bits.set(id as usize, true);
                }
            }
            bits
        });
        ResolvedFilter {
            company: filter.company,
            types,
            filed_after: filter.filed_after.map(|d| d.num_days_from_ce()),
            strategy: filter.strategy.map(EmbeddingStrategy::to_tag),
        }
    }

    /// Whether row `id` satisfies `filter`.
    pub fn matches(&self, id: InternalId, filter: &ResolvedFilter) -> bool {
        let i = id as usize;
        if i >= self.len() {
            return false;
        }
        if let Some(company) = filter.company {
            if self.company_ids[i] != company {
                return false;
            }
        }
        if let Some(types) = &filter.types {
            if !types.get(self.type_ids[i] as usize).unwrap_or(false) {
                return false;
            }
        }
        if let Some(after) = filter.filed_after {
            if self.dates[i] < after {
                return false;
            }
        }
        if let Some(tag) = filter.strategy {
            if self.strategies[i] != tag {
                return false;
            }
        }
        true
    }

    /// Rebuild the lookup structures that are not persisted.
    pub(crate) fn rebuild_indexes(&mut self) -> Result<()> {
        let n = self.len();
        let columns = [
            self.path_ids.len(),
            self.starts.len(),
            self.ends.len(),
            self.type_ids.len(),
            self.dates.len(),
            self.section_ids.len(),
            self.strategies.len(),
        ];
        if columns.iter().any(|len| *len != n) {
            return Err(RagError::corrupt("metadata columns have different lengths"));
        }
        for i in 0..n {
            let bad_section = self.section_ids[i] != NO_SECTION
                && self.sections.get(self.section_ids[i]).is_none();
            if self.paths.get(self.path_ids[i]).is_none()
                || self.types.get(self.type_ids[i] as u32).is_none()
                || bad_section
                || self.starts[i] > self.ends[i]
                || EmbeddingStrategy::from_tag(self.strategies[i]).is_none()
            {
                return Err(RagError::corrupt(format!("metadata row {i} is invalid")));
            }
        }

        self.paths.rebuild();
        self.types.rebuild();
        self.sections.rebuild();
        self.by_company.clear();
        for (i, &company) in self.company_ids.iter().enumerate() {
            self.by_company.entry(company).or_default().push(i as InternalId);
        }
        Ok(())
    }
}
