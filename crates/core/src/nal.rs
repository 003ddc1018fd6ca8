//! H.264 Annex-B helpers
//!
//! Downstream decoders expect every delivered unit to begin with a 4-byte
//! start code. Normalization is a pure reshaping of the bytes and never
//! inspects the payload beyond the prefix.

/// 4-byte Annex-B start code
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

pub const NAL_TYPE_IDR: u8 = 5;
pub const NAL_TYPE_SPS: u8 = 7;
pub const NAL_TYPE_PPS: u8 = 8;

/// Whether `buf` begins with the 4-byte start code
pub fn has_start_code(buf: &[u8]) -> bool {
    buf.starts_with(&START_CODE)
}

/// Copy `buf`, prefixing a start code if it lacks one
///
/// The result is `buf.len()` bytes when the prefix is already present,
/// `buf.len() + 4` otherwise.
pub fn normalized_copy(buf: &[u8]) -> Vec<u8> {
    if has_start_code(buf) {
        return buf.to_vec();
    }
    let mut out = Vec::with_capacity(buf.len() + START_CODE.len());
    out.extend_from_slice(&START_CODE);
    out.extend_from_slice(buf);
    out
}

/// NAL unit type of the first unit in a start-code-prefixed buffer
pub fn nal_unit_type(buf: &[u8]) -> Option<u8> {
    if !has_start_code(buf) {
        return None;
    }
    buf.get(START_CODE.len()).map(|header| header & 0x1F)
}

/// Whether the unit carries decoder configuration (SPS or PPS)
pub fn is_parameter_set(buf: &[u8]) -> bool {
    matches!(nal_unit_type(buf), Some(NAL_TYPE_SPS) | Some(NAL_TYPE_PPS))
}

/// Split an Annex-B byte stream into units at 4-byte start codes
///
/// Each yielded slice starts with its start code. Bytes before the first
/// start code are yielded as a unit of their own.
pub struct AnnexBUnits<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AnnexBUnits<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn next_start_code(&self, from: usize) -> Option<usize> {
        self.data
            .get(from..)?
            .windows(START_CODE.len())
            .position(|window| window == START_CODE)
            .map(|offset| from + offset)
    }
}

impl<'a> Iterator for AnnexBUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let start = self.pos;
        let search_from = if has_start_code(&self.data[start..]) {
            start + START_CODE.len()
        } else {
            start
        };
        let end = self
            .next_start_code(search_from)
            .unwrap_or(self.data.len());
        self.pos = end;
        Some(&self.data[start..end])
    }
}
