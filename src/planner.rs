//! Pure mapping from `(size, chunk_size)` to an ordered list of byte ranges.
//!
//! Ported from `part_coords`/`_part_range`/`_number_of_parts` in the Python
//! original's `reader.py`.

/// One entry in a range plan: a disjoint, contiguous slice of the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePart {
    pub part_id: u32,
    pub start: u64,
    pub length: u32,
}

fn number_of_parts(size: u64, chunk_size: u32) -> u64 {
    if size == 0 {
        return 1;
    }
    (size + chunk_size as u64 - 1) / chunk_size as u64
}

fn part_range(size: u64, chunk_size: u32, part_id: u64, n: u64) -> (u64, u32) {
    let start = part_id * chunk_size as u64;
    let length = if part_id + 1 == n {
        let rem = (size % chunk_size as u64) as u32;
        if rem == 0 {
            chunk_size
        } else {
            rem
        }
    } else {
        chunk_size
    };
    (start, length)
}

/// Build the ordered range plan for an object of `size` bytes split into
/// `chunk_size`-byte parts. `size == 0` yields a single zero-length part so
/// that callers have something to dispatch against.
pub fn plan(size: u64, chunk_size: u32) -> Vec<RangePart> {
    assert!(chunk_size >= 1, "chunk_size must be >= 1");
    let n = number_of_parts(size, chunk_size);
    let mut parts = Vec::with_capacity(n as usize);
    for part_id in 0..n {
        let (start, length) = part_range(size, chunk_size, part_id, n);
        let length = if size == 0 { 0 } else { length };
        parts.push(RangePart {
            part_id: part_id as u32,
            start,
            length,
        });
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total_covered(parts: &[RangePart]) -> u64 {
        parts.iter().map(|p| p.length as u64).sum()
    }

    #[test]
    fn covers_exactly_size_with_no_gaps_or_overlaps() {
        for size in [0u64, 1, 1020, 1021, 1022, 999_983, 54_743_580] {
            for chunk_size in [1u32, 7, 1021, 128 * 1024 * 1024] {
                let parts = plan(size, chunk_size);
                assert_eq!(total_covered(&parts), size, "size={size} chunk_size={chunk_size}");
                let mut expected_start = 0u64;
                for part in &parts {
                    assert_eq!(part.start, expected_start);
                    expected_start += part.length as u64;
                }
            }
        }
    }

    #[test]
    fn size_zero_yields_single_empty_part() {
        let parts = plan(0, 1024);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].length, 0);
    }

    #[test]
    fn size_equal_to_chunk_size_yields_one_full_part() {
        let parts = plan(1024, 1024);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].length, 1024);
    }

    #[test]
    fn size_one_less_than_chunk_size() {
        let parts = plan(1023, 1024);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].length, 1023);
    }

    #[test]
    fn size_one_more_than_chunk_size() {
        let parts = plan(1025, 1024);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].length, 1024);
        assert_eq!(parts[1].length, 1);
    }

    #[test]
    fn last_part_is_remainder_unless_divides_evenly() {
        let parts = plan(2049, 1024);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].length, 1);

        let parts = plan(2048, 1024);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].length, 1024);
    }
}
