//! EVEN-ODD parity kernels over one stripe.
//!
//! A stripe is a `(p-1) x p` grid of `cell_size`-byte cells plus an imaginary
//! all-zero row `p-1`. Column `p` stores row parity, column `p+1` stores
//! diagonal parity with the adjuster `S` (the XOR of the `(p-1)`-th diagonal)
//! folded into every cell. Any two missing columns are recoverable.

use anyhow::{bail, ensure, Result};

use crate::layout::{is_supported_prime, MAX_PRIME, MIN_PRIME};

fn xor_acc(dst: &mut [u8], src: &[u8]) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= *s;
    }
}

pub struct EvenOdd {
    pub p: usize,
    pub cell_size: usize,
}

impl EvenOdd {
    pub fn new(p: usize, cell_size: usize) -> Result<Self> {
        if !is_supported_prime(p) {
            bail!("p must be an odd prime in {MIN_PRIME}..={MAX_PRIME}, got {p}");
        }
        if cell_size == 0 {
            bail!("cell_size must be > 0");
        }
        Ok(Self { p, cell_size })
    }

    /// Bytes in one stripe column: `p-1` cells.
    pub fn column_len(&self) -> usize {
        (self.p - 1) * self.cell_size
    }

    /// Fills columns `p` (row parity) and `p+1` (diagonal parity) from the
    /// `p` data columns. All `p+2` buffers must be `column_len()` bytes.
    pub fn encode(&self, shards: &mut [&mut [u8]]) -> Result<()> {
        let p = self.p;
        ensure!(shards.len() == p + 2, "expected {} columns, got {}", p + 2, shards.len());
        let clen = self.column_len();
        for (i, col) in shards.iter().enumerate() {
            ensure!(col.len() == clen, "column {} has {} bytes, expected {}", i, col.len(), clen);
        }
        let (data, parity) = shards.split_at_mut(p);
        let data: Vec<&[u8]> = data.iter().map(|c| &c[..]).collect();
        parity[0].copy_from_slice(&self.row_parity(&data));
        parity[1].copy_from_slice(&self.diag_parity(&data));
        Ok(())
    }

    /// Rebuilds up to two `None` columns in place. `shards` holds the `p+2`
    /// stripe columns in unit order; present columns are never modified.
    pub fn reconstruct(&self, shards: &mut [Option<Vec<u8>>]) -> Result<()> {
        let p = self.p;
        ensure!(shards.len() == p + 2, "expected {} columns, got {}", p + 2, shards.len());
        let clen = self.column_len();
        for (i, col) in shards.iter().enumerate() {
            if let Some(col) = col {
                ensure!(
                    col.len() == clen,
                    "column {} has {} bytes, expected {}",
                    i,
                    col.len(),
                    clen
                );
            }
        }
        let missing: Vec<usize> =
            shards.iter().enumerate().filter(|(_, c)| c.is_none()).map(|(i, _)| i).collect();
        if missing.is_empty() {
            return Ok(());
        }
        if missing.len() > 2 {
            bail!("{} columns missing, EVEN-ODD tolerates at most 2", missing.len());
        }

        let rebuilt: Vec<(usize, Vec<u8>)> = {
            let cols: Vec<Option<&[u8]>> = shards.iter().map(|c| c.as_deref()).collect();
            let have = |i: usize| cols[i].expect("column present");
            // Present data columns with their unit index; the diagonal math
            // needs the index, the row math only the bytes.
            let known: Vec<(usize, &[u8])> =
                cols[..p].iter().enumerate().filter_map(|(j, c)| c.map(|c| (j, c))).collect();
            let known_bytes: Vec<&[u8]> = known.iter().map(|&(_, c)| c).collect();

            match missing[..] {
                [q] if q == p + 1 => vec![(q, self.diag_parity(&known_bytes))],
                [r] if r == p => vec![(r, self.row_parity(&known_bytes))],
                [u] => vec![(u, self.recover_by_rows(&known_bytes, have(p)))],
                [r, q] if r == p && q == p + 1 => vec![
                    (r, self.row_parity(&known_bytes)),
                    (q, self.diag_parity(&known_bytes)),
                ],
                [u, q] if q == p + 1 => {
                    let du = self.recover_by_rows(&known_bytes, have(p));
                    let data = Self::splice(&known, p, u, &du);
                    let dq = self.diag_parity(&data);
                    vec![(u, du), (q, dq)]
                }
                [u, r] if r == p => {
                    let du = self.recover_by_diagonals(&known, have(p + 1), u);
                    let data = Self::splice(&known, p, u, &du);
                    let dr = self.row_parity(&data);
                    vec![(u, du), (r, dr)]
                }
                [u, v] => {
                    let (du, dv) = self.recover_two_data(&known, have(p), have(p + 1), u, v);
                    vec![(u, du), (v, dv)]
                }
                _ => unreachable!("missing set bounded above"),
            }
        };
        for (i, col) in rebuilt {
            shards[i] = Some(col);
        }
        Ok(())
    }

    /// All `p` data columns in unit order, with `col` standing in at `u`.
    fn splice<'a>(known: &[(usize, &'a [u8])], p: usize, u: usize, col: &'a [u8]) -> Vec<&'a [u8]> {
        let mut data: Vec<&[u8]> = Vec::with_capacity(p);
        let mut it = known.iter();
        for j in 0..p {
            if j == u {
                data.push(col);
            } else {
                let &(idx, c) = it.next().expect("known data column");
                debug_assert_eq!(idx, j);
                data.push(c);
            }
        }
        data
    }

    /// Row parity is the plain XOR of the data columns; rows line up, so the
    /// whole column folds in one pass.
    fn row_parity(&self, data: &[&[u8]]) -> Vec<u8> {
        let mut out = vec![0u8; self.column_len()];
        for col in data {
            xor_acc(&mut out, col);
        }
        out
    }

    /// Diagonal parity: accumulate the `p` diagonal sums `T[d]`, take
    /// `S = T[p-1]`, and store `Q[d] = S ^ T[d]` for `d < p-1`.
    fn diag_parity(&self, data: &[&[u8]]) -> Vec<u8> {
        let (p, b) = (self.p, self.cell_size);
        let mut t = vec![0u8; p * b];
        for (j, col) in data.iter().enumerate() {
            for r in 0..p - 1 {
                let d = (r + j) % p;
                xor_acc(&mut t[d * b..(d + 1) * b], &col[r * b..(r + 1) * b]);
            }
        }
        let s = t[(p - 1) * b..].to_vec();
        let mut out = vec![0u8; self.column_len()];
        for d in 0..p - 1 {
            let cell = &mut out[d * b..(d + 1) * b];
            cell.copy_from_slice(&s);
            xor_acc(cell, &t[d * b..(d + 1) * b]);
        }
        out
    }

    /// One data column from row parity: `D[r][u] = R[r] ^ (other cells of row r)`.
    fn recover_by_rows(&self, known: &[&[u8]], row_par: &[u8]) -> Vec<u8> {
        let mut out = row_par.to_vec();
        for col in known {
            xor_acc(&mut out, col);
        }
        out
    }

    /// Diagonal syndromes `S ^ Q[d] ^ (known cells on d)` for every diagonal,
    /// with `Q[p-1]` read as zero. What remains in `delta[d]` is exactly the
    /// XOR of the cells the caller excluded from `known`.
    fn diag_syndromes(&self, known: &[(usize, &[u8])], diag_par: &[u8], s: &[u8]) -> Vec<u8> {
        let (p, b) = (self.p, self.cell_size);
        let mut delta = vec![0u8; p * b];
        for d in 0..p {
            let cell = &mut delta[d * b..(d + 1) * b];
            cell.copy_from_slice(s);
            if d < p - 1 {
                xor_acc(cell, &diag_par[d * b..(d + 1) * b]);
            }
        }
        for &(j, col) in known {
            for r in 0..p - 1 {
                let d = (r + j) % p;
                xor_acc(&mut delta[d * b..(d + 1) * b], &col[r * b..(r + 1) * b]);
            }
        }
        delta
    }

    /// One data column from diagonal parity (row parity lost). The adjuster
    /// comes from diagonal `(u-1) mod p`, the only one whose column-`u` cell
    /// falls on the imaginary row.
    fn recover_by_diagonals(&self, known: &[(usize, &[u8])], diag_par: &[u8], u: usize) -> Vec<u8> {
        let (p, b) = (self.p, self.cell_size);
        let dstar = (u + p - 1) % p;
        let mut s = vec![0u8; b];
        if dstar < p - 1 {
            xor_acc(&mut s, &diag_par[dstar * b..(dstar + 1) * b]);
        }
        for &(j, col) in known {
            let r = (dstar + p - j) % p;
            if r < p - 1 {
                xor_acc(&mut s, &col[r * b..(r + 1) * b]);
            }
        }
        let delta = self.diag_syndromes(known, diag_par, &s);
        let mut out = vec![0u8; self.column_len()];
        for r in 0..p - 1 {
            let d = (r + u) % p;
            out[r * b..(r + 1) * b].copy_from_slice(&delta[d * b..(d + 1) * b]);
        }
        out
    }

    /// The two-data-column decode. `known` holds the surviving `p-2` data
    /// columns; `u < v < p` are the lost ones.
    fn recover_two_data(
        &self,
        known: &[(usize, &[u8])],
        row_par: &[u8],
        diag_par: &[u8],
        u: usize,
        v: usize,
    ) -> (Vec<u8>, Vec<u8>) {
        let (p, b) = (self.p, self.cell_size);
        // S from parity alone: the stored diagonal cells fold (p-1) copies of
        // S, an even count, so XOR-ing both parity columns cancels everything
        // but S itself.
        let mut s = vec![0u8; b];
        xor_acc(&mut s, &self.fold_cells(row_par));
        xor_acc(&mut s, &self.fold_cells(diag_par));
        // Row syndromes: rho[r] = unknown pair of row r.
        let mut rho = row_par.to_vec();
        for &(_, col) in known {
            xor_acc(&mut rho, col);
        }
        // Diagonal syndromes: delta[d] = unknown cells on diagonal d.
        let delta = self.diag_syndromes(known, diag_par, &s);

        // Zig-zag: diagonal (v-1) mod p meets column v only on the imaginary
        // row, which seeds the chain. Row steps of v-u generate Z_p, so p-1
        // iterations cover every real row.
        let step = v - u;
        let mut col_u = vec![0u8; self.column_len()];
        let mut col_v = vec![0u8; self.column_len()];
        let mut prev: Option<usize> = None;
        for t in 1..p {
            let r = (t * step - 1) % p;
            let d = (r + u) % p;
            let cu = &mut col_u[r * b..(r + 1) * b];
            cu.copy_from_slice(&delta[d * b..(d + 1) * b]);
            if let Some(pr) = prev {
                xor_acc(cu, &col_v[pr * b..(pr + 1) * b]);
            }
            let cv = &mut col_v[r * b..(r + 1) * b];
            cv.copy_from_slice(&rho[r * b..(r + 1) * b]);
            xor_acc(cv, &col_u[r * b..(r + 1) * b]);
            prev = Some(r);
        }
        (col_u, col_v)
    }

    /// XOR of every cell of one column into a single cell.
    fn fold_cells(&self, col: &[u8]) -> Vec<u8> {
        let b = self.cell_size;
        let mut out = vec![0u8; b];
        for r in 0..col.len() / b {
            xor_acc(&mut out, &col[r * b..(r + 1) * b]);
        }
        out
    }
}
