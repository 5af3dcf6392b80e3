use core::fmt::Display;
use serde::{Deserialize, Serialize};

/// Extents of the tile computed by one block.
#[derive(
    new, Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TileShape {
    /// Rows of the output tile.
    pub m: usize,
    /// Columns of the output tile.
    pub n: usize,
    /// Depth of one reduction step.
    pub k: usize,
}

/// Number of warps along the `m` and `n` axes of a block.
#[derive(
    new, Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct WarpSplit {
    /// Warps along `m`.
    pub m: usize,
    /// Warps along `n`.
    pub n: usize,
}

/// Problem extents after padding to whole tiles.
#[derive(
    new, Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Extents {
    /// Padded `m`.
    pub m: usize,
    /// Padded `n`.
    pub n: usize,
    /// Padded `k`.
    pub k: usize,
}

impl Extents {
    /// Pad `(m, n, k)` up to multiples of the tile.
    pub fn padded(m: usize, n: usize, k: usize, tile: &TileShape) -> Self {
        Self {
            m: m.div_ceil(tile.m) * tile.m,
            n: n.div_ceil(tile.n) * tile.n,
            k: k.div_ceil(tile.k) * tile.k,
        }
    }
}

/// A scheduling configuration of a fused operator graph.
///
/// Equality is structural over every field, and the derived order is the tie-break of the
/// policy's cost ordering.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Configuration {
    /// Tile of one block.
    pub block: TileShape,
    /// Warp layout inside a block.
    pub warp: WarpSplit,
    /// Problem extents, each a multiple of the block tile.
    pub padded: Extents,
    /// Elements per vectorized global load.
    pub vectorize: usize,
    /// Number of shared memory buffers in flight.
    pub pipeline_stages: usize,
    /// Whether the inner product uses tensor cores.
    pub use_tensor_core: bool,
    /// Whether the epilogue stages run inside the anchor kernel.
    pub fuse_epilogue: bool,
    /// Whether the activations are read in fragment layout.
    pub propagate_input_layout: bool,
    /// Whether the weights are read in fragment layout.
    pub propagate_weight_layout: bool,
}

impl Configuration {
    /// Number of warps of one block.
    pub fn num_warps(&self) -> usize {
        self.warp.m * self.warp.n
    }

    /// Threads of one block.
    pub fn threads(&self, warp_size: u32) -> u32 {
        self.num_warps() as u32 * warp_size
    }

    /// Tile computed by one warp, `(m, n)`.
    pub fn warp_tile(&self) -> (usize, usize) {
        (self.block.m / self.warp.m, self.block.n / self.warp.n)
    }

    /// Number of blocks launched.
    pub fn grid(&self) -> usize {
        (self.padded.m / self.block.m) * (self.padded.n / self.block.n)
    }

    /// Shared memory used by the staged input tiles, in bytes.
    pub fn shared_memory(&self, input_bits: usize, weight_bits: usize) -> usize {
        let lhs = self.block.m * self.block.k * input_bits;
        let rhs = self.block.n * self.block.k * weight_bits;
        self.pipeline_stages * (lhs + rhs).div_ceil(8)
    }

    /// Estimated registers per thread: one 32-bit accumulator per output element plus a fixed
    /// budget for addressing and fragments.
    pub fn registers_per_thread(&self, warp_size: u32) -> u32 {
        const BASE_REGISTERS: u32 = 32;
        let accumulators = (self.block.m * self.block.n) as u32 / self.threads(warp_size).max(1);
        accumulators + BASE_REGISTERS
    }
}

impl Display for Configuration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "b{}x{}x{}_w{}x{}_v{}_s{}",
            self.block.m,
            self.block.n,
            self.block.k,
            self.warp.m,
            self.warp.n,
            self.vectorize,
            self.pipeline_stages
        )?;
        if self.use_tensor_core {
            f.write_str("_tc")?;
        }
        if self.fuse_epilogue {
            f.write_str("_fused")?;
        }
        if self.propagate_input_layout {
            f.write_str("_pa")?;
        }
        if self.propagate_weight_layout {
            f.write_str("_pb")?;
        }
        Ok(())
    }
}
