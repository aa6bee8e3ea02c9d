use serde_json::{json, Value};

use crate::header::Endianness;

/// Fixed part of an extended-attribute node; name and value bytes follow.
pub const XATTR_FIXED_SIZE: usize = 32;
/// An xref node is fixed-size.
pub const XREF_SIZE: usize = 28;

/// An extended-attribute datum. Catalogued only; nothing is applied to the
/// extracted tree.
#[derive(Debug, Clone)]
pub struct XattrNode {
    pub scan_offset: usize,
    pub xid: u32,
    pub version: u32,
    pub xprefix: u8,
    pub name_len: u8,
    pub value_len: u16,
    pub data_crc: u32,
    pub node_crc: u32,
    // Name bytes as far as the node carries them
    pub name: Vec<u8>,
}

impl XattrNode {
    pub fn from_bytes(
        data: &[u8],
        scan_offset: usize,
        endianness: Endianness,
    ) -> Result<XattrNode, String> {
        if data.len() < XATTR_FIXED_SIZE {
            return Err(format!(
                "not enough bytes for an xattr node ({} < {})",
                data.len(),
                XATTR_FIXED_SIZE
            ));
        }
        let name_len = data[0x15];
        let name_end = (XATTR_FIXED_SIZE + name_len as usize).min(data.len());
        Ok(XattrNode {
            scan_offset,
            xid: endianness.read_u32(data, 0xC),
            version: endianness.read_u32(data, 0x10),
            xprefix: data[0x14],
            name_len,
            value_len: endianness.read_u16(data, 0x16),
            data_crc: endianness.read_u32(data, 0x18),
            node_crc: endianness.read_u32(data, 0x1C),
            name: data[XATTR_FIXED_SIZE..name_end].to_vec(),
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "scan_offset": self.scan_offset,
            "xid": self.xid,
            "version": self.version,
            "xprefix": self.xprefix,
            "name": String::from_utf8_lossy(&self.name),
            "value_len": self.value_len,
        })
    }
}

/// A reference binding an xattr datum to an inode. Catalogued only.
#[derive(Debug, Clone)]
pub struct XrefNode {
    pub scan_offset: usize,
    pub ino: u32,
    pub xid: u32,
    pub xseqno: u32,
    pub node_crc: u32,
}

impl XrefNode {
    pub fn from_bytes(
        data: &[u8],
        scan_offset: usize,
        endianness: Endianness,
    ) -> Result<XrefNode, String> {
        if data.len() < XREF_SIZE {
            return Err(format!(
                "not enough bytes for an xref node ({} < {})",
                data.len(),
                XREF_SIZE
            ));
        }
        Ok(XrefNode {
            scan_offset,
            ino: endianness.read_u32(data, 0xC),
            xid: endianness.read_u32(data, 0x10),
            xseqno: endianness.read_u32(data, 0x14),
            node_crc: endianness.read_u32(data, 0x18),
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "scan_offset": self.scan_offset,
            "ino": self.ino,
            "xid": self.xid,
            "xseqno": self.xseqno,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xattr_short_buffer_is_rejected() {
        assert!(XattrNode::from_bytes(&[0u8; 16], 0, Endianness::Little).is_err());
    }

    #[test]
    fn xref_decodes_fields() {
        let mut raw = vec![0u8; XREF_SIZE];
        raw[0xC..0x10].copy_from_slice(&42u32.to_le_bytes());
        raw[0x10..0x14].copy_from_slice(&7u32.to_le_bytes());
        let xref = XrefNode::from_bytes(&raw, 0x20, Endianness::Little).unwrap();
        assert_eq!(xref.ino, 42);
        assert_eq!(xref.xid, 7);
        assert_eq!(xref.scan_offset, 0x20);
    }
}
