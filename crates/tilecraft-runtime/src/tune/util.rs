/// Anchor a number to a power of the provided base, clamped to `[min, max]`.
pub fn anchor(x: usize, max: Option<usize>, min: Option<usize>, base: Option<usize>) -> usize {
    let base = base.unwrap_or(2);
    let power = match x {
        0 => 1,
        x => base.pow(usize::ilog(x, base)),
    };

    let result = if let Some(max) = max {
        core::cmp::min(power, max)
    } else {
        power
    };

    if let Some(min) = min {
        core::cmp::max(result, min)
    } else {
        result
    }
}

/// Powers of two from `min` up to the power of two covering `extent`, at most `max`.
pub fn tile_options(extent: usize, min: usize, max: usize) -> Vec<usize> {
    let upper = anchor(extent.next_power_of_two(), Some(max), Some(min), None);
    let mut options = Vec::new();
    let mut tile = min;

    while tile <= upper {
        options.push(tile);
        tile *= 2;
    }

    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn anchor_rounds_down() {
        assert_eq!(anchor(100, None, None, None), 64);
        assert_eq!(anchor(100, Some(32), None, None), 32);
        assert_eq!(anchor(3, None, Some(16), None), 16);
        assert_eq!(anchor(0, None, None, None), 1);
    }

    #[test]
    fn tiles_cover_small_extents() {
        assert_eq!(tile_options(1, 1, 256), vec![1]);
        assert_eq!(tile_options(1, 16, 256), vec![16]);
        assert_eq!(tile_options(100, 16, 256), vec![16, 32, 64, 128]);
        assert_eq!(tile_options(6272, 16, 256), vec![16, 32, 64, 128, 256]);
    }
}
