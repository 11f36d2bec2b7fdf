use std::fmt;

/// One contiguous, inclusive byte interval of the remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    pub index: usize,
    pub first_byte: u64,
    pub last_byte: u64,
}

impl RangeSpec {
    pub fn len(&self) -> u64 {
        self.last_byte - self.first_byte + 1
    }

    /// Value for the `Range` request header, e.g. `bytes=0-99`.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.first_byte, self.last_byte)
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{}]", self.first_byte, self.last_byte)
    }
}

/// Splits `total_length` bytes into at most `parallelism` gapless ranges.
///
/// `parallelism` is clamped to `1..=total_length`. Every range gets
/// `total_length / parallelism` bytes and the last one also takes the remainder.
/// Returns an empty plan for an empty resource; callers reject that case earlier.
pub fn plan(total_length: u64, parallelism: usize) -> Vec<RangeSpec> {
    if total_length == 0 {
        return Vec::new();
    }

    // 1 <= parallelism <= total_length
    let parallelism = (parallelism.max(1) as u64).min(total_length);

    let unit_length = total_length / parallelism;
    let remainder = total_length % parallelism;

    let mut ranges = Vec::with_capacity(parallelism as usize);
    let mut cursor = 0;
    for index in 0..parallelism {
        let mut last_byte = cursor + unit_length - 1;
        if index == parallelism - 1 {
            last_byte += remainder;
        }
        ranges.push(RangeSpec {
            index: index as usize,
            first_byte: cursor,
            last_byte,
        });
        cursor += unit_length;
    }

    ranges
}
