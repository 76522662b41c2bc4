use anyhow::{bail, Result};

/// Smallest stripe parameter the code supports.
pub const MIN_PRIME: usize = 3;
/// Largest stripe parameter the code supports.
pub const MAX_PRIME: usize = 97;

/// Trial-division primality check restricted to the supported range.
pub fn is_supported_prime(p: usize) -> bool {
    if !(MIN_PRIME..=MAX_PRIME).contains(&p) || p % 2 == 0 {
        return false;
    }
    let mut d = 3;
    while d * d <= p {
        if p % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

/// Geometry of one striped file: how `file_len` bytes map onto the
/// `(p-1) x p` cell grid of each stripe and onto the `p+2` unit columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    pub prime: usize,
    pub cell_size: usize,
    pub file_len: u64,
}

impl Layout {
    pub fn new(prime: usize, cell_size: usize, file_len: u64) -> Result<Self> {
        if !is_supported_prime(prime) {
            bail!("p must be an odd prime in {MIN_PRIME}..={MAX_PRIME}, got {prime}");
        }
        if cell_size == 0 {
            bail!("cell_size must be > 0");
        }
        Ok(Self { prime, cell_size, file_len })
    }

    /// Number of storage units a file occupies: `p` data + row parity + diagonal parity.
    pub fn unit_count(&self) -> usize {
        self.prime + 2
    }

    /// Cells per column per stripe.
    pub fn rows(&self) -> usize {
        self.prime - 1
    }

    /// Data bytes consumed by one full stripe.
    pub fn stripe_bytes(&self) -> u64 {
        (self.prime * (self.prime - 1) * self.cell_size) as u64
    }

    /// Stripe count; an empty file has no stripes.
    pub fn stripes(&self) -> u64 {
        self.file_len.div_ceil(self.stripe_bytes())
    }

    /// Zero bytes appended to fill the final stripe.
    pub fn padding(&self) -> u64 {
        self.stripes() * self.stripe_bytes() - self.file_len
    }

    /// Per-stripe column size in bytes.
    pub fn column_stripe_bytes(&self) -> usize {
        self.rows() * self.cell_size
    }

    /// Total payload bytes each unit stores for this file.
    pub fn column_bytes(&self) -> u64 {
        self.stripes() * self.column_stripe_bytes() as u64
    }

    /// Source-file offset of cell `(row, unit)` of `stripe`. Consecutive
    /// cells of the original byte stream rotate across the data units.
    pub fn source_offset(&self, stripe: u64, row: usize, unit: usize) -> u64 {
        let cell = (row * self.prime + unit) as u64;
        stripe * self.stripe_bytes() + cell * self.cell_size as u64
    }
}
