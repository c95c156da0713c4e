//! Fragmentation of encrypted chunks into independently stored blocks
//!
//! Two strategies, selected per file and persisted with every chunk node:
//!   - **Split**: consecutive pieces of at most 128 KiB; every piece is needed.
//!   - **Erasure**: `n_original + 2 * n_allowed_failures` Reed-Solomon shares
//!     of equal length; up to `n_allowed_failures` may be lost.
//!
//! Serialized form: tag byte `0` for split, or `1 ‖ n_original ‖ n_allowed_failures`.

use bytes::{BufMut, Bytes};
use ctfs_core::codec::Decoder;
use ctfs_core::config::{validate_erasure_params, UploadConfig};
use ctfs_core::{ContentHash, CtfsError, CtfsResult};

use crate::erasure::ReedSolomon;
use crate::hash::content_hash;

/// Maximum size of a plain-split fragment (128 KiB)
pub const MAX_FRAGMENT_SIZE: usize = 128 * 1024;

const TAG_SPLIT: u8 = 0;
const TAG_ERASURE: u8 = 1;

/// One physically stored unit of ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    data: Bytes,
}

impl Fragment {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn hash(&self) -> ContentHash {
        content_hash(&self.data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fragmenter {
    Split,
    Erasure {
        n_original: u8,
        n_allowed_failures: u8,
    },
}

impl Fragmenter {
    /// Erasure fragmenter with parameters from the supported set.
    pub fn erasure(n_original: u8, n_allowed_failures: u8) -> CtfsResult<Self> {
        validate_erasure_params(n_original, n_allowed_failures)?;
        Ok(Fragmenter::Erasure {
            n_original,
            n_allowed_failures,
        })
    }

    pub fn from_config(upload: &UploadConfig) -> CtfsResult<Self> {
        match upload.erasure_params()? {
            None => Ok(Fragmenter::Split),
            Some((n, f)) => Self::erasure(n, f),
        }
    }

    /// Number of fragments `split` yields for `len` bytes of ciphertext.
    pub fn fragment_count(&self, len: usize) -> usize {
        match *self {
            Fragmenter::Split => len.div_ceil(MAX_FRAGMENT_SIZE),
            Fragmenter::Erasure {
                n_original,
                n_allowed_failures,
            } => n_original as usize + 2 * n_allowed_failures as usize,
        }
    }

    pub fn split(&self, data: &[u8]) -> Vec<Fragment> {
        match *self {
            Fragmenter::Split => data
                .chunks(MAX_FRAGMENT_SIZE)
                .map(|piece| Fragment::new(piece.to_vec()))
                .collect(),
            Fragmenter::Erasure {
                n_original,
                n_allowed_failures,
            } => ReedSolomon::new(n_original as usize, 2 * n_allowed_failures as usize)
                .encode(data)
                .into_iter()
                .map(Fragment::new)
                .collect(),
        }
    }

    /// Rebuild the original bytes. `None` entries are shares that could not
    /// be fetched or failed verification; erasure shares of the wrong length
    /// count as missing too.
    pub fn recombine(
        &self,
        shares: Vec<Option<Fragment>>,
        expected_len: usize,
    ) -> CtfsResult<Vec<u8>> {
        match *self {
            Fragmenter::Split => {
                let mut out = Vec::with_capacity(expected_len);
                for (i, share) in shares.into_iter().enumerate() {
                    let fragment = share.ok_or_else(|| {
                        CtfsError::Reconstruction(format!("split fragment {i} is missing"))
                    })?;
                    out.extend_from_slice(fragment.data());
                }
                if out.len() != expected_len {
                    return Err(CtfsError::structural(format!(
                        "recombined {} bytes, expected {expected_len}",
                        out.len()
                    )));
                }
                Ok(out)
            }
            Fragmenter::Erasure {
                n_original,
                n_allowed_failures,
            } => {
                let rs = ReedSolomon::new(n_original as usize, 2 * n_allowed_failures as usize);
                let size = rs.shard_size(expected_len);
                let shares: Vec<Option<Vec<u8>>> = shares
                    .into_iter()
                    .map(|s| s.filter(|f| f.len() == size).map(|f| f.data.to_vec()))
                    .collect();
                let missing = shares.iter().filter(|s| s.is_none()).count();
                if missing > n_allowed_failures as usize {
                    return Err(CtfsError::Reconstruction(format!(
                        "{missing} shares missing or malformed, at most {n_allowed_failures} tolerated"
                    )));
                }
                rs.decode(shares, expected_len)
            }
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        match *self {
            Fragmenter::Split => buf.put_u8(TAG_SPLIT),
            Fragmenter::Erasure {
                n_original,
                n_allowed_failures,
            } => {
                buf.put_u8(TAG_ERASURE);
                buf.put_u8(n_original);
                buf.put_u8(n_allowed_failures);
            }
        }
    }

    pub fn decode(d: &mut Decoder<'_>) -> CtfsResult<Self> {
        match d.read_u8("fragmenter tag")? {
            TAG_SPLIT => Ok(Fragmenter::Split),
            TAG_ERASURE => {
                let n = d.read_u8("n_original")?;
                let f = d.read_u8("n_allowed_failures")?;
                Self::erasure(n, f).map_err(|e| CtfsError::structural(e.to_string()))
            }
            other => Err(CtfsError::structural(format!(
                "unknown fragmenter tag {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 256) as u8).collect()
    }

    fn all_present(fragments: Vec<Fragment>) -> Vec<Option<Fragment>> {
        fragments.into_iter().map(Some).collect()
    }

    #[test]
    fn test_split_piece_sizes() {
        let input = data(MAX_FRAGMENT_SIZE * 2 + 5);
        let fragments = Fragmenter::Split.split(&input);
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].len(), MAX_FRAGMENT_SIZE);
        assert_eq!(fragments[2].len(), 5);
    }

    #[test]
    fn test_split_empty() {
        let fragments = Fragmenter::Split.split(&[]);
        assert!(fragments.is_empty());
        assert!(Fragmenter::Split.recombine(vec![], 0).unwrap().is_empty());
    }

    #[test]
    fn test_split_length_mismatch_is_structural() {
        let fragments = Fragmenter::Split.split(&data(100));
        let err = Fragmenter::Split
            .recombine(all_present(fragments), 101)
            .unwrap_err();
        assert!(matches!(err, CtfsError::Structural(_)));
    }

    #[test]
    fn test_split_missing_fragment_fails() {
        let mut shares = all_present(Fragmenter::Split.split(&data(MAX_FRAGMENT_SIZE + 1)));
        shares[1] = None;
        let err = Fragmenter::Split
            .recombine(shares, MAX_FRAGMENT_SIZE + 1)
            .unwrap_err();
        assert!(matches!(err, CtfsError::Reconstruction(_)));
    }

    #[test]
    fn test_erasure_share_count() {
        let f = Fragmenter::erasure(40, 10).unwrap();
        assert_eq!(f.split(&data(1000)).len(), 60);
        assert_eq!(f.fragment_count(1000), 60);
    }

    #[test]
    fn test_erasure_40_10_tolerates_ten_missing() {
        let f = Fragmenter::erasure(40, 10).unwrap();
        let input = data(50_000);
        let mut shares = all_present(f.split(&input));
        // Drop a mix of data and parity shares.
        for i in [0, 3, 7, 12, 19, 25, 33, 39, 45, 58] {
            shares[i] = None;
        }
        assert_eq!(f.recombine(shares, input.len()).unwrap(), input);
    }

    #[test]
    fn test_erasure_40_10_fails_with_eleven_missing() {
        let f = Fragmenter::erasure(40, 10).unwrap();
        let input = data(50_000);
        let mut shares = all_present(f.split(&input));
        for share in shares.iter_mut().take(11) {
            *share = None;
        }
        let err = f.recombine(shares, input.len()).unwrap_err();
        assert!(matches!(err, CtfsError::Reconstruction(_)));
    }

    #[test]
    fn test_erasure_truncated_share_counts_as_missing() {
        let f = Fragmenter::erasure(40, 10).unwrap();
        let input = data(50_000);
        let truncate = |share: &mut Option<Fragment>| {
            let short = share.as_ref().unwrap().data().slice(1..);
            *share = Some(Fragment::new(short));
        };

        let mut shares = all_present(f.split(&input));
        for share in shares.iter_mut().take(9) {
            *share = None;
        }
        truncate(&mut shares[20]);
        assert_eq!(f.recombine(shares.clone(), input.len()).unwrap(), input);

        truncate(&mut shares[50]);
        let err = f.recombine(shares, input.len()).unwrap_err();
        assert!(matches!(err, CtfsError::Reconstruction(_)));
    }

    #[test]
    fn test_erasure_all_data_shares_lost() {
        let f = Fragmenter::erasure(5, 5).unwrap();
        let input = data(4097);
        let mut shares = all_present(f.split(&input));
        for share in shares.iter_mut().take(5) {
            *share = None;
        }
        assert_eq!(f.recombine(shares, input.len()).unwrap(), input);
    }

    #[test]
    fn test_rejects_unsupported_params() {
        assert!(Fragmenter::erasure(6, 5).is_err());
        assert!(Fragmenter::erasure(5, 0).is_err());
        assert!(Fragmenter::erasure(80, 80).is_ok());
    }

    #[test]
    fn test_from_config() {
        let split = UploadConfig {
            n_original: 40,
            n_allowed_failures: 0,
        };
        assert_eq!(Fragmenter::from_config(&split).unwrap(), Fragmenter::Split);

        let erasure = UploadConfig {
            n_original: 20,
            n_allowed_failures: 10,
        };
        assert_eq!(
            Fragmenter::from_config(&erasure).unwrap(),
            Fragmenter::Erasure {
                n_original: 20,
                n_allowed_failures: 10
            }
        );
    }

    #[test]
    fn test_encode_decode() {
        for f in [Fragmenter::Split, Fragmenter::erasure(80, 20).unwrap()] {
            let mut buf = Vec::new();
            f.encode(&mut buf);
            let mut d = Decoder::new(&buf);
            assert_eq!(Fragmenter::decode(&mut d).unwrap(), f);
            d.finish("fragmenter").unwrap();
        }
    }

    #[test]
    fn test_decode_rejects_invalid_erasure_params() {
        let buf = [TAG_ERASURE, 7, 5];
        let err = Fragmenter::decode(&mut Decoder::new(&buf)).unwrap_err();
        assert!(matches!(err, CtfsError::Structural(_)));
    }

    fn any_fragmenter() -> impl Strategy<Value = Fragmenter> {
        let params = prop::sample::select(vec![5u8, 10, 20, 40, 80]);
        prop_oneof![
            Just(Fragmenter::Split),
            (params.clone(), params).prop_map(|(n, f)| Fragmenter::Erasure {
                n_original: n,
                n_allowed_failures: f
            }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_recombine_inverts_split(
            f in any_fragmenter(),
            input in proptest::collection::vec(any::<u8>(), 0..100_000),
        ) {
            let shares = all_present(f.split(&input));
            prop_assert_eq!(f.recombine(shares, input.len()).unwrap(), input);
        }

        #[test]
        fn prop_erasure_survives_allowed_losses(
            input in proptest::collection::vec(any::<u8>(), 1..20_000),
            seed in any::<u64>(),
        ) {
            let f = Fragmenter::erasure(10, 5).unwrap();
            let mut shares = all_present(f.split(&input));
            let total = shares.len() as u64;
            let mut s = seed;
            for _ in 0..5 {
                s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                shares[((s >> 33) % total) as usize] = None;
            }
            prop_assert_eq!(f.recombine(shares, input.len()).unwrap(), input);
        }
    }
}
