use serde_json::{json, Value};

use crate::header::Endianness;

/// Fixed part of an erase-block summary node; the packed summary records
/// follow but do not drive extraction.
pub const SUMMARY_FIXED_SIZE: usize = 32;

#[derive(Debug, Clone)]
pub struct SummaryNode {
    pub scan_offset: usize,
    // Number of summarised records in the erase block
    pub sum_num: u32,
    pub cln_mkr: u32,
    pub padded: u32,
    pub sum_crc: u32,
    pub node_crc: u32,
}

impl SummaryNode {
    pub fn from_bytes(
        data: &[u8],
        scan_offset: usize,
        endianness: Endianness,
    ) -> Result<SummaryNode, String> {
        if data.len() < SUMMARY_FIXED_SIZE {
            return Err(format!(
                "not enough bytes for a summary node ({} < {})",
                data.len(),
                SUMMARY_FIXED_SIZE
            ));
        }
        Ok(SummaryNode {
            scan_offset,
            sum_num: endianness.read_u32(data, 0xC),
            cln_mkr: endianness.read_u32(data, 0x10),
            padded: endianness.read_u32(data, 0x14),
            sum_crc: endianness.read_u32(data, 0x18),
            node_crc: endianness.read_u32(data, 0x1C),
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "scan_offset": self.scan_offset,
            "sum_num": self.sum_num,
            "cln_mkr": self.cln_mkr,
            "padded": self.padded,
        })
    }
}
