use crc::{Algorithm, Crc, CRC_32_ISO_HDLC};

/// JFFS2 checksums use the CRC-32 variant of the Linux MTD layer: the same
/// reflected polynomial as zlib, but seeded with zero and without the final
/// inversion. Plain zlib CRC-32 will not match.
const CRC_32_MTD: Algorithm<u32> = Algorithm {
    init: 0x00000000,
    xorout: 0x00000000,
    ..CRC_32_ISO_HDLC
};

const MTD: Crc<u32> = Crc::<u32>::new(&CRC_32_MTD);

/// Compute the MTD CRC-32 of a byte slice.
pub fn mtd_crc(data: &[u8]) -> u32 {
    MTD.checksum(data)
}
