use crate::{QuantError, QuantScheme};

/// Turn signed or unsigned values into unsigned codes of `scheme.bits` width.
pub fn encode(values: &[i16], scheme: &QuantScheme) -> Result<Vec<u8>, QuantError> {
    let (min, max) = scheme.value_range();
    let zero_point = scheme.zero_point();

    values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            if *value < min || *value > max {
                return Err(QuantError::OutOfRange {
                    index,
                    value: *value,
                    min,
                    max,
                });
            }
            Ok((*value + zero_point) as u8)
        })
        .collect()
}

/// Inverse of [encode].
pub fn decode(codes: &[u8], scheme: &QuantScheme) -> Vec<i16> {
    let zero_point = scheme.zero_point();
    codes.iter().map(|code| *code as i16 - zero_point).collect()
}

/// Number of bytes a packed row of `cols` values occupies.
pub fn packed_row_bytes(cols: usize, scheme: &QuantScheme) -> usize {
    cols / scheme.num_quants() * scheme.store.size_bits() / 8
}

/// Pack codes row by row, little-endian inside every storage element.
///
/// Value `i` of a storage element lives at bit offset `i * bits`.
pub fn pack(codes: &[u8], cols: usize, scheme: &QuantScheme) -> Result<Vec<u8>, QuantError> {
    let num_quants = scheme.num_quants();
    check_cols(codes.len(), cols, num_quants)?;

    let bits = scheme.size_bits_value();
    let store_bytes = scheme.size_bits_stored() / 8;
    let mask = ((1u32 << bits) - 1) as u8;
    let mut packed = Vec::with_capacity(codes.len() / num_quants * store_bytes);

    for element in codes.chunks(num_quants) {
        let mut acc = 0u32;
        for (i, code) in element.iter().enumerate() {
            acc |= ((code & mask) as u32) << (i * bits);
        }
        packed.extend_from_slice(&acc.to_le_bytes()[..store_bytes]);
    }

    Ok(packed)
}

/// Inverse of [pack].
pub fn unpack_codes(
    packed: &[u8],
    cols: usize,
    scheme: &QuantScheme,
) -> Result<Vec<u8>, QuantError> {
    let num_quants = scheme.num_quants();
    let row_bytes = packed_row_bytes(cols, scheme);

    if cols % num_quants != 0 {
        return Err(QuantError::Misaligned {
            what: "Columns",
            extent: cols,
            multiple: num_quants,
        });
    }
    if row_bytes == 0 || packed.len() % row_bytes != 0 {
        return Err(QuantError::ShapeMismatch {
            expected: row_bytes,
            actual: packed.len(),
        });
    }

    let bits = scheme.size_bits_value();
    let store_bytes = scheme.size_bits_stored() / 8;
    let mask = (1u32 << bits) - 1;
    let mut codes = Vec::with_capacity(packed.len() / store_bytes * num_quants);

    for element in packed.chunks(store_bytes) {
        let mut word = [0u8; 4];
        word[..store_bytes].copy_from_slice(element);
        let acc = u32::from_le_bytes(word);

        for i in 0..num_quants {
            codes.push(((acc >> (i * bits)) & mask) as u8);
        }
    }

    Ok(codes)
}

fn check_cols(len: usize, cols: usize, num_quants: usize) -> Result<(), QuantError> {
    if cols == 0 || len % cols != 0 {
        return Err(QuantError::ShapeMismatch {
            expected: cols,
            actual: len,
        });
    }
    if cols % num_quants != 0 {
        return Err(QuantError::Misaligned {
            what: "Columns",
            extent: cols,
            multiple: num_quants,
        });
    }
    Ok(())
}
