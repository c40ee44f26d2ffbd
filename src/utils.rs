#[inline(always)]
pub(crate) fn le_u64(d: &[u8]) -> u64 {
    u64::from_le_bytes([d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]])
}

#[inline(always)]
pub(crate) fn le_u32(d: &[u8]) -> u32 {
    u32::from_le_bytes([d[0], d[1], d[2], d[3]])
}

#[inline(always)]
pub(crate) fn le_u16(d: &[u8]) -> u16 {
    u16::from_le_bytes([d[0], d[1]])
}

#[inline(always)]
pub(crate) fn put_le_u64(d: &mut [u8], value: u64) {
    d[..8].copy_from_slice(&value.to_le_bytes());
}

#[inline(always)]
pub(crate) fn put_le_u32(d: &mut [u8], value: u32) {
    d[..4].copy_from_slice(&value.to_le_bytes());
}

#[inline(always)]
pub(crate) fn put_le_u16(d: &mut [u8], value: u16) {
    d[..2].copy_from_slice(&value.to_le_bytes());
}

/// Little-endian serializer over a growable buffer, used to assemble a
/// record in memory before it is handed to a sink as one unit.
#[derive(Debug, Default)]
pub(crate) struct RecordBuf {
    data: Vec<u8>,
}

impl RecordBuf {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        RecordBuf {
            data: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn u8(&mut self, value: u8) -> &mut Self {
        self.data.push(value);
        self
    }

    pub(crate) fn u16(&mut self, value: u16) -> &mut Self {
        self.data.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub(crate) fn u32(&mut self, value: u32) -> &mut Self {
        self.data.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub(crate) fn u64(&mut self, value: u64) -> &mut Self {
        self.data.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub(crate) fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.data.extend_from_slice(value);
        self
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.data
    }
}
