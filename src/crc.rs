const POLYNOMIAL: u32 = 0xEDB88320;

const fn gen_crc_table() -> [[u32; 256]; 16] {
    let mut table: [[u32; 256]; 16] = [[0; 256]; 16];

    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLYNOMIAL
            } else {
                crc >> 1
            };
            j += 1;
        }

        table[0][i] = crc;
        i += 1;
    }

    i = 1;
    while i < 16 {
        let mut j = 0;
        while j < 256 {
            table[i][j] = (table[i - 1][j] >> 8) ^ table[0][(table[i - 1][j] & 0xFF) as usize];
            j += 1;
        }
        i += 1;
    }

    table
}

static CRC_TABLE: [[u32; 256]; 16] = gen_crc_table();

/// Compute the CRC32 (IEEE) of a byte slice held in memory.
pub fn crc32(data: &[u8]) -> u32 {
    crc32_chunk(data, 0)
}

/// Continues a CRC32 computation over another chunk of data.
#[inline]
pub fn crc32_chunk(data: &[u8], prev: u32) -> u32 {
    let mut chunks = data.chunks_exact(16);
    let mut crc = chunks.by_ref().fold(!prev, |crc, data| {
        CRC_TABLE[0x0][data[0xf] as usize]
            ^ CRC_TABLE[0x1][data[0xe] as usize]
            ^ CRC_TABLE[0x2][data[0xd] as usize]
            ^ CRC_TABLE[0x3][data[0xc] as usize]
            ^ CRC_TABLE[0x4][data[0xb] as usize]
            ^ CRC_TABLE[0x5][data[0xa] as usize]
            ^ CRC_TABLE[0x6][data[0x9] as usize]
            ^ CRC_TABLE[0x7][data[0x8] as usize]
            ^ CRC_TABLE[0x8][data[0x7] as usize]
            ^ CRC_TABLE[0x9][data[0x6] as usize]
            ^ CRC_TABLE[0xa][data[0x5] as usize]
            ^ CRC_TABLE[0xb][data[0x4] as usize]
            ^ CRC_TABLE[0xc][data[0x3] as usize ^ ((crc >> 0x18) & 0xFF) as usize]
            ^ CRC_TABLE[0xd][data[0x2] as usize ^ ((crc >> 0x10) & 0xFF) as usize]
            ^ CRC_TABLE[0xe][data[0x1] as usize ^ ((crc >> 0x08) & 0xFF) as usize]
            ^ CRC_TABLE[0xf][data[0x0] as usize ^ (crc & 0xFF) as usize]
    });

    crc = chunks
        .remainder()
        .iter()
        .fold(crc, |crc, &x| crc_step(crc, x));

    !crc
}

/// One raw table step without the pre/post inversion.
///
/// This is the primitive the traditional PKWARE cipher uses to mix bytes
/// into its key registers.
#[inline(always)]
pub(crate) fn crc_step(crc: u32, byte: u8) -> u32 {
    (crc >> 8) ^ CRC_TABLE[0][((crc ^ u32::from(byte)) & 0xFF) as usize]
}

/// Streaming CRC32 accumulator.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Crc32 {
    value: u32,
}

impl Crc32 {
    pub(crate) fn new() -> Self {
        Crc32 { value: 0 }
    }

    #[inline]
    pub(crate) fn update(&mut self, data: &[u8]) {
        self.value = crc32_chunk(data, self.value);
    }

    pub(crate) fn value(&self) -> u32 {
        self.value
    }
}
