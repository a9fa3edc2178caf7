/// An incomplete UTF-8 sequence carried over from a previous token piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartialUtf8 {
    /// Bits decoded so far.
    pub value: u32,
    /// Continuation bytes still expected; zero when nothing is pending.
    pub n_remain: u8,
}

impl PartialUtf8 {
    /// True while a multi-byte sequence is incomplete.
    pub fn is_pending(&self) -> bool {
        self.n_remain > 0
    }
}

// sequence length indexed by the high nibble of the first byte; 0 = continuation byte
const SEQUENCE_LEN: [u8; 16] = [1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 2, 2, 3, 4];

/// Decode a token piece into code points, continuing `partial`.
///
/// Returns the complete code points and the new partial state, or `None`
/// when the bytes cannot be valid UTF-8 in this position.
pub fn decode(src: &[u8], partial: PartialUtf8) -> Option<(Vec<u32>, PartialUtf8)> {
    let mut code_points = Vec::with_capacity(src.len());
    let mut value = partial.value;
    let mut n_remain = partial.n_remain;
    let mut i = 0;

    while i < src.len() && n_remain > 0 {
        let byte = src[i];
        if byte >> 6 != 0b10 {
            return None;
        }
        value = (value << 6) | u32::from(byte & 0x3f);
        i += 1;
        n_remain -= 1;
    }
    if partial.n_remain > 0 && n_remain == 0 {
        code_points.push(value);
    }

    while i < src.len() {
        let first = src[i];
        let len = SEQUENCE_LEN[usize::from(first >> 4)];
        if len == 0 {
            return None;
        }
        n_remain = len - 1;
        let mask = (1u8 << (7 - n_remain)) - 1;
        value = u32::from(first & mask);
        i += 1;
        while i < src.len() && n_remain > 0 {
            value = (value << 6) | u32::from(src[i] & 0x3f);
            i += 1;
            n_remain -= 1;
        }
        if n_remain == 0 {
            code_points.push(value);
        }
    }

    let partial = if n_remain == 0 {
        PartialUtf8::default()
    } else {
        PartialUtf8 { value, n_remain }
    };
    Some((code_points, partial))
}
