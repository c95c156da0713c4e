//! Locating, fetching and decrypting the chunks of a file
//!
//! Every chunk node of a file carries an [`EncryptedChunkRetriever`]: the
//! nonce and tag of that chunk's ciphertext, the hashes of its fragments and
//! the map key of the next chunk. A [`ChunkChain`] ties those together for a
//! whole file and is what the readers pull from.

use bytes::BufMut;
use ctfs_chunks::{
    chunk_count, effective_chunk_length, map_key_at, next_map_key, EncryptedChunk, Fragmenter,
    HashTree, MAX_CHUNK_SIZE,
};
use ctfs_core::codec::{put_presence, Decoder};
use ctfs_core::{ContentHash, CtfsError, CtfsResult, Location, MapKey};
use ctfs_crypto::{Nonce, SymmetricKey, NONCE_SIZE, TAG_SIZE};
use ctfs_storage::{BlockStore, PointerStore};

use crate::capability::AbsoluteCapability;
use crate::network::Network;
use crate::node::CryptreeNode;
use crate::props::STREAM_SECRET_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedChunkRetriever {
    pub nonce: Nonce,
    pub auth: [u8; TAG_SIZE],
    pub cipher_len: u32,
    pub fragmenter: Fragmenter,
    pub fragment_hashes: Vec<ContentHash>,
    /// Absent on the last chunk.
    pub next_map_key: Option<MapKey>,
}

impl EncryptedChunkRetriever {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.nonce);
        buf.put_slice(&self.auth);
        buf.put_u32(self.cipher_len);
        self.fragmenter.encode(buf);
        buf.put_u32(self.fragment_hashes.len() as u32);
        for hash in &self.fragment_hashes {
            buf.put_slice(hash.as_bytes());
        }
        put_presence(buf, self.next_map_key.is_some());
        if let Some(next) = &self.next_map_key {
            buf.put_slice(next.as_bytes());
        }
    }

    pub fn decode(d: &mut Decoder<'_>) -> CtfsResult<Self> {
        let nonce: [u8; NONCE_SIZE] = d.read_array("chunk nonce")?;
        let auth = d.read_array("chunk auth tag")?;
        let cipher_len = d.read_u32("ciphertext length")?;
        if cipher_len as usize > MAX_CHUNK_SIZE {
            return Err(CtfsError::structural(format!(
                "chunk ciphertext of {cipher_len} bytes exceeds {MAX_CHUNK_SIZE}"
            )));
        }
        let fragmenter = Fragmenter::decode(d)?;
        let count = d.read_u32("fragment count")? as usize;
        if count * 32 > d.remaining() {
            return Err(CtfsError::structural(format!(
                "retriever claims {count} fragments but only {} bytes remain",
                d.remaining()
            )));
        }
        let fragment_hashes = (0..count)
            .map(|_| d.read_array("fragment hash").map(ContentHash::new))
            .collect::<CtfsResult<Vec<_>>>()?;
        let next_map_key = d.read_option("next map key", |d| {
            d.read_array("next map key").map(MapKey::new)
        })?;
        Ok(Self {
            nonce,
            auth,
            cipher_len,
            fragmenter,
            fragment_hashes,
            next_map_key,
        })
    }

    /// Download, recombine and decrypt this chunk.
    pub async fn get_chunk<B: BlockStore, P: PointerStore>(
        &self,
        network: &Network<B, P>,
        data_key: &SymmetricKey,
    ) -> CtfsResult<Vec<u8>> {
        let shares = network.download_fragments(&self.fragment_hashes).await?;
        let encrypted = EncryptedChunk::from_fragments(
            &self.fragmenter,
            shares,
            self.auth,
            self.cipher_len as usize,
        )?;
        encrypted.decrypt(data_key, &self.nonce)
    }
}

/// Plaintext of one chunk and where the following chunk lives.
#[derive(Debug, Clone)]
pub struct FetchedChunk {
    pub data: Vec<u8>,
    pub next: Option<MapKey>,
}

/// Everything needed to read any chunk of one file.
#[derive(Clone)]
pub struct ChunkChain<B, P> {
    network: Network<B, P>,
    first: Location,
    data_key: SymmetricKey,
    stream_secret: Option<[u8; STREAM_SECRET_SIZE]>,
    file_size: u64,
    hash_tree: Option<HashTree>,
}

impl<B: BlockStore, P: PointerStore> ChunkChain<B, P> {
    /// Resolve a file capability into its chunk chain.
    pub async fn open(network: Network<B, P>, cap: &AbsoluteCapability) -> CtfsResult<Self> {
        let location = cap.location();
        let (node, _) = network
            .get_metadata(&location)
            .await?
            .ok_or_else(|| CtfsError::NotFound(format!("no node at {}", cap.map_key)))?;
        let CryptreeNode::File(file) = node else {
            return Err(CtfsError::structural(format!(
                "{} is a directory, not a file",
                cap.map_key
            )));
        };
        let props = file.properties(&cap.r_base_key)?;
        let data_key = file.data_key(&cap.r_base_key)?;
        Ok(Self {
            network,
            first: location,
            data_key,
            stream_secret: props.stream_secret,
            file_size: props.size,
            hash_tree: None,
        })
    }

    /// Check every fetched chunk against `tree`.
    pub fn verified_by(mut self, tree: HashTree) -> Self {
        self.hash_tree = Some(tree);
        self
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_count(&self) -> u64 {
        chunk_count(self.file_size)
    }

    /// Map key of chunk `index`: computed from the stream secret when the
    /// file has one, otherwise found by walking `next` links. `None` when
    /// the chain ends before `index`.
    pub async fn map_key_of(&self, index: u64) -> CtfsResult<Option<MapKey>> {
        if let Some(secret) = &self.stream_secret {
            return Ok(Some(map_key_at(
                secret,
                &self.first.map_key,
                index * MAX_CHUNK_SIZE as u64,
            )));
        }
        let mut key = self.first.map_key;
        for _ in 0..index {
            let next = match self.network.get_metadata(&self.first.with_map_key(key)).await? {
                Some((CryptreeNode::File(file), _)) => {
                    file.retriever().and_then(|r| r.next_map_key)
                }
                _ => None,
            };
            match next {
                Some(next) => key = next,
                None => return Ok(None),
            }
        }
        Ok(Some(key))
    }

    /// Fetch chunk `index` stored at `map_key`.
    ///
    /// The plaintext is truncated or zero-padded to the chunk's effective
    /// length. A chunk with no node yet reads as zeros.
    pub async fn fetch(&self, index: u64, map_key: MapKey) -> CtfsResult<FetchedChunk> {
        let expected = effective_chunk_length(self.file_size, index);
        let location = self.first.with_map_key(map_key);
        let fetched = match self.network.get_metadata(&location).await? {
            None => {
                tracing::debug!(index, %map_key, "chunk not written yet, zero-filling");
                FetchedChunk {
                    data: vec![0u8; expected],
                    next: self
                        .stream_secret
                        .as_ref()
                        .map(|secret| next_map_key(secret, &map_key)),
                }
            }
            Some((CryptreeNode::File(file), _)) => {
                let retriever = file.retriever().ok_or_else(|| {
                    CtfsError::structural(format!("chunk node {map_key} has no retriever"))
                })?;
                let mut data = retriever.get_chunk(&self.network, &self.data_key).await?;
                data.resize(expected, 0);
                FetchedChunk {
                    data,
                    next: retriever.next_map_key,
                }
            }
            Some((CryptreeNode::Dir(_), _)) => {
                return Err(CtfsError::structural(format!(
                    "chunk {index} of a file resolves to a directory"
                )))
            }
        };
        if let Some(tree) = &self.hash_tree {
            if !tree.verify_chunk(index, &fetched.data) {
                return Err(CtfsError::structural(format!(
                    "chunk {index} does not match the file's hash tree"
                )));
            }
        }
        Ok(fetched)
    }

    /// Fetch chunk `index`, locating it first.
    pub async fn chunk(&self, index: u64) -> CtfsResult<FetchedChunk> {
        match self.map_key_of(index).await? {
            Some(map_key) => self.fetch(index, map_key).await,
            None => Ok(FetchedChunk {
                data: vec![0u8; effective_chunk_length(self.file_size, index)],
                next: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(next: Option<MapKey>, fragmenter: Fragmenter) -> EncryptedChunkRetriever {
        EncryptedChunkRetriever {
            nonce: [4u8; NONCE_SIZE],
            auth: [5u8; TAG_SIZE],
            cipher_len: 1000,
            fragmenter,
            fragment_hashes: vec![ContentHash::random(), ContentHash::random()],
            next_map_key: next,
        }
    }

    #[test]
    fn test_retriever_codec() {
        for retriever in [
            sample(Some(MapKey::random()), Fragmenter::Split),
            sample(None, Fragmenter::erasure(10, 5).unwrap()),
        ] {
            let mut buf = Vec::new();
            retriever.encode(&mut buf);
            let mut d = Decoder::new(&buf);
            assert_eq!(EncryptedChunkRetriever::decode(&mut d).unwrap(), retriever);
            d.finish("retriever").unwrap();
        }
    }

    #[test]
    fn test_retriever_rejects_inflated_fragment_count() {
        let mut buf = Vec::new();
        sample(None, Fragmenter::Split).encode(&mut buf);
        // fragment count sits after nonce, tag, length and the split tag.
        let at = NONCE_SIZE + TAG_SIZE + 4 + 1;
        buf[at..at + 4].copy_from_slice(&u32::MAX.to_be_bytes());
        let err = EncryptedChunkRetriever::decode(&mut Decoder::new(&buf)).unwrap_err();
        assert!(matches!(err, CtfsError::Structural(_)));
    }
}
