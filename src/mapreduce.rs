//! Bulk-synchronous map-reduce engine over the cluster substrate.
//!
//! Each rank holds a buffer of key/value pairs. Map fills it from the rank's share of
//! the shard list, collate routes every pair to the rank owning its key and groups
//! duplicates, reduce combines each group into a single pair, gather centralizes the
//! survivors on one rank. The engine does not interpret keys or values beyond equality;
//! the pair encoding is the codec's business.
//!
//! Collation is deterministic for a fixed rank count: keys are processed in sorted
//! order and a key's values keep source-rank order, so a seeded run reproduces its
//! reductions bitwise.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use anyhow::Result;
use rayon::prelude::*;

use crate::cluster::Communicator;

/// One wire pair. Key equality decides the reduce bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        KeyValue { key: key.into(), value: value.into() }
    }
}

pub struct MapReduce<'a> {
    comm: &'a Communicator,
    /// flat pairs, before collate or after reduce
    kv: Vec<KeyValue>,
    /// grouped pairs, between collate and reduce
    kmv: BTreeMap<String, Vec<String>>,
}

impl<'a> MapReduce<'a> {
    pub fn new(comm: &'a Communicator) -> Self {
        MapReduce { comm, kv: Vec::new(), kmv: BTreeMap::new() }
    }

    /// Appends one pair to the rank's buffer.
    pub fn add(&mut self, pair: KeyValue) {
        self.kv.push(pair);
    }

    pub fn get_pairs(&self) -> &[KeyValue] {
        &self.kv
    }

    /// Runs the map task over this rank's share of the shard list and replaces the
    /// rank's buffer with what the tasks emitted.
    ///
    /// Shard i belongs to rank i % size; a rank's tasks run in parallel on the rayon
    /// pool and their emissions are concatenated in shard order. The task receives the
    /// global shard index, the shard path and an emission sink.
    pub fn map_shards<F>(&mut self, shards: &[PathBuf], task: F) -> Result<u64>
    where
        F: Fn(usize, &Path, &mut Vec<KeyValue>) -> Result<()> + Sync,
    {
        let rank = self.comm.get_rank();
        let size = self.comm.get_size();
        let mine: Vec<(usize, &PathBuf)> = shards
            .iter()
            .enumerate()
            .filter(|(itask, _)| *itask % size == rank)
            .collect();
        log::debug!("rank {} maps {} of {} shards", rank, mine.len(), shards.len());
        let emitted: Vec<Vec<KeyValue>> = mine
            .par_iter()
            .map(|(itask, path)| {
                let mut out = Vec::new();
                task(*itask, path.as_path(), &mut out)?;
                Ok(out)
            })
            .collect::<Result<_>>()?;
        self.kv = emitted.into_iter().flatten().collect();
        Ok(self.kv.len() as u64)
    } // end of map_shards

    /// Routes every pair to the rank owning its key and groups values by key.
    /// Returns the number of distinct keys owned by this rank.
    pub fn collate(&mut self) -> Result<u64> {
        let size = self.comm.get_size();
        let mut outgoing: Vec<Vec<KeyValue>> = (0..size).map(|_| Vec::new()).collect();
        for pair in self.kv.drain(..) {
            outgoing[owner_rank(&pair.key, size)].push(pair);
        }
        let incoming = self.comm.exchange(outgoing)?;
        self.kmv.clear();
        for batch in incoming {
            for pair in batch {
                self.kmv.entry(pair.key).or_default().push(pair.value);
            }
        }
        log::trace!("rank {} owns {} keys after collate", self.comm.get_rank(), self.kmv.len());
        Ok(self.kmv.len() as u64)
    } // end of collate

    /// Combines each key's values into the pairs the combiner emits.
    /// The combiner must be commutative and associative over its value type; the
    /// engine is free to feed it partial groups in any order.
    pub fn reduce<F>(&mut self, combine: F) -> Result<u64>
    where
        F: Fn(&str, &[String], &mut Vec<KeyValue>) -> Result<()>,
    {
        let mut reduced = Vec::with_capacity(self.kmv.len());
        for (key, values) in &self.kmv {
            combine(key, values, &mut reduced)?;
        }
        self.kmv.clear();
        self.kv = reduced;
        Ok(self.kv.len() as u64)
    } // end of reduce

    /// Moves every rank's pairs to root. Other ranks end up empty.
    pub fn gather(&mut self, root: usize) -> Result<u64> {
        self.kv = self.comm.gather(std::mem::take(&mut self.kv), root)?;
        Ok(self.kv.len() as u64)
    }

    /// Runs f over the pairs held by this rank.
    pub fn map_pairs<F>(&mut self, mut f: F) -> Result<u64>
    where
        F: FnMut(&KeyValue) -> Result<()>,
    {
        for pair in &self.kv {
            f(pair)?;
        }
        Ok(self.kv.len() as u64)
    }
} // end of impl MapReduce

/// The rank owning a key. DefaultHasher is keyed identically on every rank of the
/// process, so all ranks agree on ownership.
fn owner_rank(key: &str, size: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % size as u64) as usize
}

//===========================================================================

// end of mod tests
