/*++

Licensed under the Apache-2.0 license.

File Name:

   crc.rs

Abstract:

    File contains the CRC32/MPEG-2 checksum of CRC protected boot images.

--*/

const CRC32_MPEG2_POLY: u32 = 0x04c1_1db7;

const CRC32_MPEG2_TABLE: [u32; 256] = crc_table();

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ CRC32_MPEG2_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Running CRC32/MPEG-2: MSB first, init `0xffffffff`, no final xor
#[derive(Debug, Clone, Copy)]
pub struct Crc32Mpeg2 {
    crc: u32,
}

impl Default for Crc32Mpeg2 {
    fn default() -> Self {
        Self { crc: 0xffff_ffff }
    }
}

impl Crc32Mpeg2 {
    pub fn update(&mut self, data: &[u8]) {
        for byte in data {
            let index = ((self.crc >> 24) ^ u32::from(*byte)) & 0xff;
            self.crc = (self.crc << 8) ^ CRC32_MPEG2_TABLE[index as usize];
        }
    }

    pub fn finish(self) -> u32 {
        self.crc
    }
}

/// CRC32/MPEG-2 of `data`
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    let mut crc = Crc32Mpeg2::default();
    crc.update(data);
    crc.finish()
}
