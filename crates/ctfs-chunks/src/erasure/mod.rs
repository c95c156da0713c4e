//! Systematic Reed-Solomon erasure code over GF(2^8)
//!
//! The generator matrix is the identity stacked on a Cauchy matrix:
//!
//! ```text
//!   [ I_k ]        k data shares are the padded input itself
//!   [ C   ]        C[i][j] = 1 / (x_i + y_j),  x_i = k + i,  y_j = j
//! ```
//!
//! Every square submatrix of a Cauchy matrix is invertible, so any `k` of the
//! `k + m` shares determine the data. Shares are equally sized; the input is
//! zero-padded to a multiple of `k` and the caller supplies the true length
//! when decoding.

pub mod gf256;

use ctfs_core::{CtfsError, CtfsResult};
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct ReedSolomon {
    data_shards: usize,
    parity_shards: usize,
    /// `parity_shards` rows of `data_shards` coefficients.
    parity_matrix: Vec<Vec<u8>>,
}

impl ReedSolomon {
    /// # Panics
    /// If `data_shards == 0` or `data_shards + parity_shards > 256`; the
    /// fragmenter only constructs codes from its validated parameter set.
    pub fn new(data_shards: usize, parity_shards: usize) -> Self {
        assert!(data_shards > 0, "need at least one data shard");
        assert!(
            data_shards + parity_shards <= 256,
            "GF(256) supports at most 256 shares"
        );
        let parity_matrix = (0..parity_shards)
            .map(|i| {
                let x = (data_shards + i) as u8;
                (0..data_shards)
                    .map(|j| gf256::inv(x ^ j as u8))
                    .collect()
            })
            .collect();
        Self {
            data_shards,
            parity_shards,
            parity_matrix,
        }
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    pub fn shard_size(&self, len: usize) -> usize {
        len.div_ceil(self.data_shards).max(1)
    }

    /// Encode `data` into `data_shards + parity_shards` equal-length shares.
    pub fn encode(&self, data: &[u8]) -> Vec<Vec<u8>> {
        let size = self.shard_size(data.len());
        let mut padded = data.to_vec();
        padded.resize(size * self.data_shards, 0);

        let data_shares: Vec<&[u8]> = padded.chunks(size).collect();
        let parity: Vec<Vec<u8>> = self
            .parity_matrix
            .par_iter()
            .map(|row| {
                let mut out = vec![0u8; size];
                for (coef, share) in row.iter().zip(&data_shares) {
                    gf256::mul_add_slice(*coef, share, &mut out);
                }
                out
            })
            .collect();

        let mut shares: Vec<Vec<u8>> = data_shares.iter().map(|s| s.to_vec()).collect();
        shares.extend(parity);
        shares
    }

    /// Recover the first `len` bytes from any `data_shards` intact shares.
    ///
    /// Shares whose length differs from the majority shard size are treated
    /// as missing.
    pub fn decode(&self, mut shares: Vec<Option<Vec<u8>>>, len: usize) -> CtfsResult<Vec<u8>> {
        if shares.len() != self.total_shards() {
            return Err(CtfsError::structural(format!(
                "expected {} shares, got {}",
                self.total_shards(),
                shares.len()
            )));
        }
        let size = self.shard_size(len);
        for share in shares.iter_mut() {
            if share.as_ref().is_some_and(|s| s.len() != size) {
                *share = None;
            }
        }

        let present: Vec<usize> = shares
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .take(self.data_shards)
            .collect();
        if present.len() < self.data_shards {
            return Err(CtfsError::Reconstruction(format!(
                "only {} of {} required shares available",
                present.len(),
                self.data_shards
            )));
        }

        let missing_data: Vec<usize> = (0..self.data_shards)
            .filter(|&j| shares[j].is_none())
            .collect();

        if !missing_data.is_empty() {
            tracing::debug!(
                missing = missing_data.len(),
                data_shards = self.data_shards,
                "reconstructing data shares from parity"
            );
            // Rows of the generator matrix for the shares we will use.
            let rows: Vec<Vec<u8>> = present.iter().map(|&i| self.generator_row(i)).collect();
            let inverse = invert(rows)?;

            let recovered: Vec<(usize, Vec<u8>)> = missing_data
                .par_iter()
                .map(|&j| {
                    let mut out = vec![0u8; size];
                    for (r, &i) in present.iter().enumerate() {
                        if let Some(share) = &shares[i] {
                            gf256::mul_add_slice(inverse[j][r], share, &mut out);
                        }
                    }
                    (j, out)
                })
                .collect();
            for (j, share) in recovered {
                shares[j] = Some(share);
            }
        }

        let mut out = Vec::with_capacity(size * self.data_shards);
        for share in shares.into_iter().take(self.data_shards).flatten() {
            out.extend_from_slice(&share);
        }
        if out.len() < len {
            return Err(CtfsError::structural(format!(
                "decoded {} bytes, expected at least {len}",
                out.len()
            )));
        }
        out.truncate(len);
        Ok(out)
    }

    fn generator_row(&self, share: usize) -> Vec<u8> {
        if share < self.data_shards {
            let mut row = vec![0u8; self.data_shards];
            row[share] = 1;
            row
        } else {
            self.parity_matrix[share - self.data_shards].clone()
        }
    }
}

/// Gauss-Jordan inversion of a square matrix over GF(256).
fn invert(mut m: Vec<Vec<u8>>) -> CtfsResult<Vec<Vec<u8>>> {
    let n = m.len();
    let mut inv: Vec<Vec<u8>> = (0..n)
        .map(|i| {
            let mut row = vec![0u8; n];
            row[i] = 1;
            row
        })
        .collect();

    for col in 0..n {
        let pivot = (col..n)
            .find(|&r| m[r][col] != 0)
            .ok_or_else(|| CtfsError::Reconstruction("singular decoding matrix".into()))?;
        m.swap(col, pivot);
        inv.swap(col, pivot);

        let scale = gf256::inv(m[col][col]);
        for k in 0..n {
            m[col][k] = gf256::mul(m[col][k], scale);
            inv[col][k] = gf256::mul(inv[col][k], scale);
        }

        for r in 0..n {
            if r == col || m[r][col] == 0 {
                continue;
            }
            let factor = m[r][col];
            for k in 0..n {
                let a = gf256::mul(factor, m[col][k]);
                let b = gf256::mul(factor, inv[col][k]);
                m[r][k] ^= a;
                inv[r][k] ^= b;
            }
        }
    }
    Ok(inv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_data_shares_are_systematic() {
        let rs = ReedSolomon::new(4, 2);
        let input = sample(16);
        let shares = rs.encode(&input);
        assert_eq!(shares.len(), 6);
        assert_eq!(shares[..4].concat(), input);
    }

    #[test]
    fn test_decode_without_losses() {
        let rs = ReedSolomon::new(5, 10);
        let input = sample(1234);
        let shares = rs.encode(&input).into_iter().map(Some).collect();
        assert_eq!(rs.decode(shares, input.len()).unwrap(), input);
    }

    #[test]
    fn test_decode_from_parity_only() {
        let rs = ReedSolomon::new(5, 10);
        let input = sample(1000);
        let mut shares: Vec<_> = rs.encode(&input).into_iter().map(Some).collect();
        for share in shares.iter_mut().take(5) {
            *share = None;
        }
        assert_eq!(rs.decode(shares, input.len()).unwrap(), input);
    }

    #[test]
    fn test_too_few_shares() {
        let rs = ReedSolomon::new(4, 2);
        let input = sample(100);
        let mut shares: Vec<_> = rs.encode(&input).into_iter().map(Some).collect();
        shares[0] = None;
        shares[1] = None;
        shares[5] = None;
        assert!(matches!(
            rs.decode(shares, input.len()),
            Err(CtfsError::Reconstruction(_))
        ));
    }

    #[test]
    fn test_wrong_length_share_counts_as_missing() {
        let rs = ReedSolomon::new(4, 2);
        let input = sample(100);
        let mut shares: Vec<_> = rs.encode(&input).into_iter().map(Some).collect();
        shares[2] = Some(vec![0u8; 3]);
        assert_eq!(rs.decode(shares, input.len()).unwrap(), input);
    }

    #[test]
    fn test_empty_input() {
        let rs = ReedSolomon::new(5, 10);
        let shares: Vec<_> = rs.encode(&[]).into_iter().map(Some).collect();
        assert_eq!(shares.len(), 15);
        assert!(rs.decode(shares, 0).unwrap().is_empty());
    }

    #[test]
    fn test_largest_code() {
        let rs = ReedSolomon::new(80, 160);
        let input = sample(8000);
        let mut shares: Vec<_> = rs.encode(&input).into_iter().map(Some).collect();
        for i in (0..240).step_by(3) {
            shares[i] = None;
        }
        assert_eq!(rs.decode(shares, input.len()).unwrap(), input);
    }
}
