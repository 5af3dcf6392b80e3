use crate::{QuantError, QuantScheme, packed_row_bytes};

/// Edge of the square tile reordered by [propagate_layout].
pub const FRAGMENT_SIZE: usize = 16;

const WORD_BYTES: usize = 4;

/// Position in the source tile of the element loaded at `(i, j)` by a fragment load.
fn fragment_source(i: usize, j: usize) -> (usize, usize) {
    let thread_id = i * 2 + j / 8;
    let row = (i / 8) * 8 + thread_id % 8;
    let col = j % 8 + 8 * ((thread_id / 8) % 2);
    (row, col)
}

/// Reorder every 16x16 tile of a `rows x cols` matrix into fragment load order.
pub fn propagate_layout<T: Copy>(
    values: &[T],
    rows: usize,
    cols: usize,
) -> Result<Vec<T>, QuantError> {
    check_fragment_shape(values.len(), rows, cols)?;

    let mut out = values.to_vec();
    for_each_fragment(rows, cols, |dst, src| out[dst] = values[src]);
    Ok(out)
}

/// Inverse of [propagate_layout].
pub fn restore_layout<T: Copy>(
    values: &[T],
    rows: usize,
    cols: usize,
) -> Result<Vec<T>, QuantError> {
    check_fragment_shape(values.len(), rows, cols)?;

    let mut out = values.to_vec();
    for_each_fragment(rows, cols, |dst, src| out[src] = values[dst]);
    Ok(out)
}

fn for_each_fragment(rows: usize, cols: usize, mut func: impl FnMut(usize, usize)) {
    for tile_row in (0..rows).step_by(FRAGMENT_SIZE) {
        for tile_col in (0..cols).step_by(FRAGMENT_SIZE) {
            for i in 0..FRAGMENT_SIZE {
                for j in 0..FRAGMENT_SIZE {
                    let (row, col) = fragment_source(i, j);
                    let dst = (tile_row + i) * cols + tile_col + j;
                    let src = (tile_row + row) * cols + tile_col + col;
                    func(dst, src);
                }
            }
        }
    }
}

fn check_fragment_shape(len: usize, rows: usize, cols: usize) -> Result<(), QuantError> {
    if len != rows * cols {
        return Err(QuantError::ShapeMismatch {
            expected: rows * cols,
            actual: len,
        });
    }
    if rows % FRAGMENT_SIZE != 0 {
        return Err(QuantError::Misaligned {
            what: "Rows",
            extent: rows,
            multiple: FRAGMENT_SIZE,
        });
    }
    if cols % FRAGMENT_SIZE != 0 {
        return Err(QuantError::Misaligned {
            what: "Columns",
            extent: cols,
            multiple: FRAGMENT_SIZE,
        });
    }
    Ok(())
}

/// Logical value index held by physical slot `slot` of a word with `count` values.
///
/// Even values fill the low half of the word and odd values the high half.
fn interleaved_source(slot: usize, count: usize) -> usize {
    let half = count / 2;
    if slot < half {
        slot * 2
    } else {
        (slot - half) * 2 + 1
    }
}

/// Interleave the values of every packed 32-bit word for fast decoding.
pub fn interleave(packed: &[u8], cols: usize, scheme: &QuantScheme) -> Result<Vec<u8>, QuantError> {
    map_words(packed, cols, scheme, |slot, count| {
        (slot, interleaved_source(slot, count))
    })
}

/// Inverse of [interleave].
pub fn deinterleave(
    packed: &[u8],
    cols: usize,
    scheme: &QuantScheme,
) -> Result<Vec<u8>, QuantError> {
    map_words(packed, cols, scheme, |slot, count| {
        (interleaved_source(slot, count), slot)
    })
}

/// Rewrite every word so that value `dst` takes the value found at `src`, where
/// `(dst, src) = mapping(slot, count)`.
fn map_words(
    packed: &[u8],
    cols: usize,
    scheme: &QuantScheme,
    mapping: impl Fn(usize, usize) -> (usize, usize),
) -> Result<Vec<u8>, QuantError> {
    let row_bytes = packed_row_bytes(cols, scheme);
    if row_bytes % WORD_BYTES != 0 {
        return Err(QuantError::Misaligned {
            what: "Packed row bytes",
            extent: row_bytes,
            multiple: WORD_BYTES,
        });
    }
    if packed.len() % WORD_BYTES != 0 {
        return Err(QuantError::Misaligned {
            what: "Packed bytes",
            extent: packed.len(),
            multiple: WORD_BYTES,
        });
    }

    let bits = scheme.size_bits_value();
    let count = 32 / bits;
    let mask = (1u32 << bits) - 1;
    let mut out = Vec::with_capacity(packed.len());

    for chunk in packed.chunks(WORD_BYTES) {
        let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let mut result = 0u32;

        for slot in 0..count {
            let (dst, src) = mapping(slot, count);
            let value = (word >> (src * bits)) & mask;
            result |= value << (dst * bits);
        }
        out.extend_from_slice(&result.to_le_bytes());
    }

    Ok(out)
}
