use std::io::Read;

use lzma_rs::lzma_decompress;

pub const JFFS2_COMPR_NONE: u8 = 0x00;
pub const JFFS2_COMPR_ZERO: u8 = 0x01;
pub const JFFS2_COMPR_RTIME: u8 = 0x02;
pub const JFFS2_COMPR_RUBINMIPS: u8 = 0x03;
pub const JFFS2_COMPR_COPY: u8 = 0x04;
pub const JFFS2_COMPR_DYNRUBIN: u8 = 0x05;
pub const JFFS2_COMPR_ZLIB: u8 = 0x06;
pub const JFFS2_COMPR_LZO: u8 = 0x07;
pub const JFFS2_COMPR_LZMA: u8 = 0x08;

// JFFS2's embedded LZMA writes a raw LZMA1 stream with these fixed
// properties and no container header.
const LZMA_BEST_LC: u8 = 0;
const LZMA_BEST_LP: u8 = 0;
const LZMA_BEST_PB: u8 = 0;
const LZMA_DICT_SIZE: u32 = 0x2000;

pub fn compr_name(compr: u8) -> &'static str {
    match compr {
        JFFS2_COMPR_NONE => "none",
        JFFS2_COMPR_ZERO => "zero",
        JFFS2_COMPR_RTIME => "rtime",
        JFFS2_COMPR_RUBINMIPS => "rubinmips",
        JFFS2_COMPR_COPY => "copy",
        JFFS2_COMPR_DYNRUBIN => "dynrubin",
        JFFS2_COMPR_ZLIB => "zlib",
        JFFS2_COMPR_LZO => "lzo",
        JFFS2_COMPR_LZMA => "lzma",
        _ => "unknown",
    }
}

/// Decompress one inode payload. `dsize` is the uncompressed length recorded
/// in the inode; the ZERO, RTIME and LZMA schemes need it to know when to
/// stop.
pub fn decompress(compr: u8, data: &[u8], dsize: usize) -> Result<Vec<u8>, String> {
    match compr {
        JFFS2_COMPR_NONE => Ok(data.to_vec()),
        JFFS2_COMPR_ZERO => Ok(vec![0u8; dsize]),
        JFFS2_COMPR_ZLIB => zlib_decompress(data),
        JFFS2_COMPR_RTIME => rtime_decompress(data, dsize),
        JFFS2_COMPR_LZMA => lzma_raw_decompress(data, dsize),
        other => Err(format!(
            "unsupported compression type 0x{:02x} ({})",
            other,
            compr_name(other)
        )),
    }
}

fn zlib_decompress(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| format!("zlib decompression error: {}", e))?;
    Ok(out)
}

/// The payload is a header-less LZMA1 bitstream, so the 13-byte container
/// header the codec expects is synthesized in front of it: one properties
/// byte, the dictionary size, and the uncompressed length.
fn lzma_raw_decompress(data: &[u8], dsize: usize) -> Result<Vec<u8>, String> {
    let properties = (LZMA_BEST_PB * 5 + LZMA_BEST_LP) * 9 + LZMA_BEST_LC;
    let mut stream = Vec::with_capacity(13 + data.len());
    stream.push(properties);
    stream.extend(LZMA_DICT_SIZE.to_le_bytes());
    stream.extend((dsize as u64).to_le_bytes());
    stream.extend_from_slice(data);

    let mut out = Vec::with_capacity(dsize);
    lzma_decompress(&mut std::io::Cursor::new(stream), &mut out)
        .map_err(|e| format!("lzma decompression error: {:?}", e))?;
    Ok(out)
}

/// The RTIME scheme: a position table indexed by byte value remembers where
/// each value was last written, and a repeat count after every literal copies
/// from that position. The source index advances with the destination, so a
/// back-reference reaching into the output tail degenerates to run-length
/// expansion.
fn rtime_decompress(data: &[u8], dsize: usize) -> Result<Vec<u8>, String> {
    let mut positions = [0usize; 256];
    let mut out: Vec<u8> = Vec::with_capacity(dsize);
    let mut pos = 0usize;

    while out.len() < dsize {
        if pos + 2 > data.len() {
            return Err(format!(
                "rtime stream exhausted at {} of {} output bytes",
                out.len(),
                dsize
            ));
        }
        let value = data[pos];
        let repeat = data[pos + 1] as usize;
        pos += 2;

        out.push(value);
        let mut backoffs = positions[value as usize];
        positions[value as usize] = out.len();

        if repeat > 0 {
            if out.len() + repeat > dsize {
                return Err(format!(
                    "rtime output overrun: {} + {} exceeds {}",
                    out.len(),
                    repeat,
                    dsize
                ));
            }
            for _ in 0..repeat {
                let byte = out[backoffs];
                out.push(byte);
                backoffs += 1;
            }
        }
    }

    Ok(out)
}
