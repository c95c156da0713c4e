//! Three-level Merkle tree over per-chunk SHA-256 hashes
//!
//! ```text
//!               root = sha256(serialize([top list]))
//!                              |
//!   level3:   [ sha256(level2[k]) ... ]         (only for > 1024^2 chunks)
//!   level2:   [ sha256(level1[j]) ... ]         (only for > 1024 chunks)
//!   level1:   [ sha256(chunk[i])  ... ]         1024 hashes per list
//! ```
//!
//! The highest level always holds exactly one list. A fourth level would be
//! needed beyond 1024^3 chunks (5 PiB) and is rejected.

use bytes::BufMut;
use ctfs_core::codec::{put_var_bytes, Decoder};
use ctfs_core::{CtfsError, CtfsResult};

use crate::chunk::chunk_count;
use crate::hash::sha256;

/// Hashes packed into one [`ChunkHashList`].
pub const HASHES_PER_LIST: usize = 1024;

const HASH_SIZE: usize = 32;

/// Up to 1024 concatenated 32-byte hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHashList {
    hashes: Vec<u8>,
}

impl ChunkHashList {
    pub fn new(hashes: Vec<u8>) -> CtfsResult<Self> {
        if hashes.len() % HASH_SIZE != 0 || hashes.len() > HASHES_PER_LIST * HASH_SIZE {
            return Err(CtfsError::structural(format!(
                "invalid chunk hash list of {} bytes",
                hashes.len()
            )));
        }
        Ok(Self { hashes })
    }

    pub fn len(&self) -> usize {
        self.hashes.len() / HASH_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<[u8; 32]> {
        let start = index.checked_mul(HASH_SIZE)?;
        let slice = self.hashes.get(start..start + HASH_SIZE)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(slice);
        Some(out)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.hashes.len());
        put_var_bytes(&mut buf, &self.hashes);
        buf
    }

    fn decode(d: &mut Decoder<'_>) -> CtfsResult<Self> {
        Self::new(d.read_var_bytes("chunk hash list")?.to_vec())
    }

    fn digest(&self) -> [u8; 32] {
        sha256(&self.serialize())
    }
}

fn put_level(buf: &mut impl BufMut, level: &[ChunkHashList]) {
    buf.put_u32(level.len() as u32);
    for list in level {
        put_var_bytes(buf, &list.hashes);
    }
}

fn read_level(d: &mut Decoder<'_>, what: &str) -> CtfsResult<Vec<ChunkHashList>> {
    let count = d.read_u32(what)? as usize;
    // Each list costs at least its 4-byte length prefix.
    if count > d.remaining() / 4 {
        return Err(CtfsError::structural(format!(
            "{what} claims {count} lists in {} bytes",
            d.remaining()
        )));
    }
    (0..count).map(|_| ChunkHashList::decode(d)).collect()
}

fn level_root(list: &ChunkHashList) -> [u8; 32] {
    let mut buf = Vec::new();
    put_level(&mut buf, std::slice::from_ref(list));
    sha256(&buf)
}

fn group(hashes: &[[u8; 32]], fanout: usize) -> Vec<ChunkHashList> {
    hashes
        .chunks(fanout)
        .map(|group| ChunkHashList {
            hashes: group.concat(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashTree {
    root_hash: [u8; 32],
    level1: Vec<ChunkHashList>,
    level2: Vec<ChunkHashList>,
    level3: Vec<ChunkHashList>,
}

impl HashTree {
    /// Build from the ordered hashes of every chunk in a file.
    pub fn build(chunk_hashes: &[[u8; 32]]) -> CtfsResult<Self> {
        Self::build_with_fanout(chunk_hashes, HASHES_PER_LIST)
    }

    pub(crate) fn build_with_fanout(chunk_hashes: &[[u8; 32]], fanout: usize) -> CtfsResult<Self> {
        if chunk_hashes.is_empty() {
            return Err(CtfsError::structural("a file has at least one chunk hash"));
        }
        let next = |level: &[ChunkHashList]| {
            let digests: Vec<[u8; 32]> = level.iter().map(ChunkHashList::digest).collect();
            group(&digests, fanout)
        };

        let level1 = group(chunk_hashes, fanout);
        if level1.len() == 1 {
            let root_hash = level_root(&level1[0]);
            return Ok(Self {
                root_hash,
                level1,
                level2: Vec::new(),
                level3: Vec::new(),
            });
        }
        let level2 = next(&level1);
        if level2.len() == 1 {
            let root_hash = level_root(&level2[0]);
            return Ok(Self {
                root_hash,
                level1,
                level2,
                level3: Vec::new(),
            });
        }
        let level3 = next(&level2);
        if level3.len() == 1 {
            let root_hash = level_root(&level3[0]);
            return Ok(Self {
                root_hash,
                level1,
                level2,
                level3,
            });
        }
        Err(CtfsError::structural(
            "files bigger than 5 PiB are not supported by the hash tree",
        ))
    }

    pub fn root_hash(&self) -> &[u8; 32] {
        &self.root_hash
    }

    pub fn level1(&self) -> &[ChunkHashList] {
        &self.level1
    }

    pub fn level2(&self) -> &[ChunkHashList] {
        &self.level2
    }

    pub fn level3(&self) -> &[ChunkHashList] {
        &self.level3
    }

    /// The lists on the path from chunk `index` to the root.
    pub fn branch(&self, index: u64) -> HashBranch {
        let per = HASHES_PER_LIST as u64;
        let pick = |level: &[ChunkHashList], i: u64| {
            usize::try_from(i).ok().and_then(|i| level.get(i)).cloned()
        };
        HashBranch {
            root_hash: self.root_hash,
            level1: pick(&self.level1, index / per),
            level2: pick(&self.level2, index / per / per),
            level3: pick(&self.level3, index / per / per / per),
        }
    }

    pub fn verify_chunk(&self, index: u64, data: &[u8]) -> bool {
        self.branch(index).verify(index, data)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_slice(&self.root_hash);
        put_level(&mut buf, &self.level1);
        put_level(&mut buf, &self.level2);
        put_level(&mut buf, &self.level3);
        buf
    }

    pub fn deserialize(raw: &[u8]) -> CtfsResult<Self> {
        let mut d = Decoder::new(raw);
        let root_hash = d.read_array("root hash")?;
        let level1 = read_level(&mut d, "level1")?;
        let level2 = read_level(&mut d, "level2")?;
        let level3 = read_level(&mut d, "level3")?;
        d.finish("hash tree")?;
        Ok(Self {
            root_hash,
            level1,
            level2,
            level3,
        })
    }
}

/// The subset of a [`HashTree`] needed to verify one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashBranch {
    pub root_hash: [u8; 32],
    pub level1: Option<ChunkHashList>,
    pub level2: Option<ChunkHashList>,
    pub level3: Option<ChunkHashList>,
}

impl HashBranch {
    /// Check `data` is chunk `index` of the file this branch was taken from.
    pub fn verify(&self, index: u64, data: &[u8]) -> bool {
        let per = HASHES_PER_LIST as u64;
        let Some(l1) = &self.level1 else {
            return false;
        };
        if l1.get((index % per) as usize) != Some(sha256(data)) {
            return false;
        }
        let Some(l2) = &self.level2 else {
            return self.level3.is_none() && level_root(l1) == self.root_hash;
        };
        if l2.get((index / per % per) as usize) != Some(l1.digest()) {
            return false;
        }
        let Some(l3) = &self.level3 else {
            return level_root(l2) == self.root_hash;
        };
        l3.get((index / per / per % per) as usize) == Some(l2.digest())
            && level_root(l3) == self.root_hash
    }
}

/// Collects chunk hashes as a file is uploaded.
#[derive(Debug)]
pub struct HashTreeBuilder {
    slots: Vec<Option<[u8; 32]>>,
}

impl HashTreeBuilder {
    pub fn new(file_size: u64) -> Self {
        let count = usize::try_from(chunk_count(file_size)).unwrap_or(usize::MAX);
        Self {
            slots: vec![None; count],
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.slots.len()
    }

    pub fn set_chunk(&mut self, index: u64, data: &[u8]) -> CtfsResult<()> {
        self.set_chunk_hash(index, sha256(data))
    }

    pub fn set_chunk_hash(&mut self, index: u64, hash: [u8; 32]) -> CtfsResult<()> {
        let total = self.slots.len();
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| self.slots.get_mut(i))
            .ok_or_else(|| {
                CtfsError::structural(format!("chunk {index} out of range for {total} chunks"))
            })?;
        *slot = Some(hash);
        Ok(())
    }

    pub fn complete(self) -> CtfsResult<HashTree> {
        let mut hashes = Vec::with_capacity(self.slots.len());
        for (i, slot) in self.slots.into_iter().enumerate() {
            hashes.push(slot.ok_or_else(|| {
                CtfsError::structural(format!("hash tree incomplete: chunk {i} never set"))
            })?);
        }
        HashTree::build(&hashes)
    }
}
