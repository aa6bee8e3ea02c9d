use serde_json::{json, Value};
use std::borrow::Cow;

use crate::crc::mtd_crc;
use crate::header::Endianness;

/// Fixed part of a directory entry node: the 12-byte common header plus 28
/// bytes of fields. The name bytes follow.
pub const DIRENT_FIXED_SIZE: usize = 40;

// Structure representing a JFFS2 directory entry node
#[derive(Debug, Clone)]
pub struct DirentNode {
    // Byte offset of the node within the scanned image
    pub scan_offset: usize,
    // Parent inode number
    pub pino: u32,
    // Version of this entry under (pino, name)
    pub version: u32,
    // Inode number this name binds to; zero marks an unlink
    pub ino: u32,
    pub mctime: u32,
    // Name length in bytes
    pub nsize: u8,
    // Directory-entry type (DT_* value)
    pub ntype: u8,
    pub node_crc: u32,
    pub name_crc: u32,
    // Raw name bytes; decoded to UTF-8 only when a host path is built
    pub name: Vec<u8>,
    // Recorded outcome of the non-fatal body checksums
    pub node_crc_ok: bool,
    pub name_crc_ok: bool,
}

impl DirentNode {
    /// Constructs a DirentNode from the raw node bytes (header included).
    ///
    /// # Arguments
    /// * `data` - The node bytes starting at the common header
    /// * `scan_offset` - Where the node sits in the scanned image
    /// * `endianness` - Byte order of the scan pass
    pub fn from_bytes(
        data: &[u8],
        scan_offset: usize,
        endianness: Endianness,
    ) -> Result<DirentNode, String> {
        if data.len() < DIRENT_FIXED_SIZE {
            return Err(format!(
                "not enough bytes for a dirent node ({} < {})",
                data.len(),
                DIRENT_FIXED_SIZE
            ));
        }

        let nsize = data[0x1C];
        if DIRENT_FIXED_SIZE + nsize as usize > data.len() {
            return Err(format!(
                "dirent name ({} bytes) extends past the node ({} bytes)",
                nsize,
                data.len()
            ));
        }
        let name = data[DIRENT_FIXED_SIZE..DIRENT_FIXED_SIZE + nsize as usize].to_vec();

        let node_crc = endianness.read_u32(data, 0x20);
        let name_crc = endianness.read_u32(data, 0x24);

        Ok(DirentNode {
            scan_offset,
            pino: endianness.read_u32(data, 0xC),
            version: endianness.read_u32(data, 0x10),
            ino: endianness.read_u32(data, 0x14),
            mctime: endianness.read_u32(data, 0x18),
            nsize,
            ntype: data[0x1D],
            node_crc,
            name_crc,
            // node_crc covers everything before it, name_crc the name bytes
            node_crc_ok: mtd_crc(&data[0..0x20]) == node_crc,
            name_crc_ok: mtd_crc(&name) == name_crc,
            name,
        })
    }

    /// Lossy rendering of the name for logs and the catalogue.
    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    /// True when this entry records the removal of a name.
    pub fn is_unlink(&self) -> bool {
        self.ino == 0
    }

    /// The to_json method.
    pub fn to_json(&self) -> Value {
        json!({
            "scan_offset": self.scan_offset,
            "pino": self.pino,
            "version": self.version,
            "ino": self.ino,
            "mctime": self.mctime,
            "type": self.ntype,
            "name": self.name_lossy(),
            "node_crc_ok": self.node_crc_ok,
            "name_crc_ok": self.name_crc_ok,
        })
    }

    /// Prints a one-line summary of the directory entry.
    pub fn print_info(&self) {
        println!(
            "dirent @0x{:08x}: ino {} pino {} v{} type 0x{:x} name '{}'",
            self.scan_offset,
            self.ino,
            self.pino,
            self.version,
            self.ntype,
            self.name_lossy()
        );
    }
}
