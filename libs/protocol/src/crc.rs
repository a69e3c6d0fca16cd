//! Checksums used on the link: CRC-7 over frame headers, CRC-16/CCITT-FALSE
//! over payloads and CRC-32/IEEE over firmware images.

const CRC7_POLY: u8 = 0x89;

const fn crc7_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u8;
        if c & 0x80 != 0 {
            c ^= CRC7_POLY;
        }
        let mut bit = 1;
        while bit < 8 {
            c <<= 1;
            if c & 0x80 != 0 {
                c ^= CRC7_POLY;
            }
            bit += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

static CRC7_TABLE: [u8; 256] = crc7_table();

/// CRC-7 (polynomial 0x09) with the register seeded to 0xFF, as computed by
/// the MCU over request and response headers.
pub fn crc7(bytes: &[u8]) -> u8 {
    let mut crc = 0xFFu8;
    for &b in bytes {
        crc = CRC7_TABLE[(b ^ (crc << 1)) as usize];
    }
    crc
}

pub fn crc16_ccitt_false(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Streaming CRC-32/IEEE, so large images can be checksummed chunk by chunk.
#[derive(Clone, Copy, Debug)]
pub struct Crc32 {
    state: u32,
}

impl Crc32 {
    pub const fn new() -> Self {
        Self { state: 0xFFFF_FFFF }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        let mut crc = self.state;
        for &b in bytes {
            crc ^= b as u32;
            for _ in 0..8 {
                let mask = 0u32.wrapping_sub(crc & 1);
                crc = (crc >> 1) ^ (0xEDB8_8320u32 & mask);
            }
        }
        self.state = crc;
    }

    pub const fn finish(&self) -> u32 {
        !self.state
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

pub fn crc32_ieee(bytes: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(bytes);
    crc.finish()
}
