/// Reference: https://github.com/torvalds/linux/blob/master/include/uapi/linux/jffs2.h
use chrono::{TimeZone, Utc};
use log::warn;
use prettytable::{Cell, Row, Table};
use serde::Serialize;
use serde_json::{json, Value};

use crate::compression::{self, compr_name};
use crate::crc::mtd_crc;
use crate::header::Endianness;

/// Fixed part of an inode node: the 12-byte common header plus 56 bytes of
/// fields. The compressed payload follows.
pub const INODE_FIXED_SIZE: usize = 68;

pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

/// Convert a mode (includes file-type bits) into the familiar 10-character
/// string used by `ls -l`, e.g. "-rw-r--r--".
pub fn mode_to_string(mode: u32) -> String {
    const S_ISUID: u32 = 0o4000;
    const S_ISGID: u32 = 0o2000;
    const S_ISVTX: u32 = 0o1000;

    let file_ch = match mode & S_IFMT {
        S_IFSOCK => 's',
        S_IFLNK => 'l',
        S_IFREG => '-',
        S_IFBLK => 'b',
        S_IFDIR => 'd',
        S_IFCHR => 'c',
        S_IFIFO => 'p',
        _ => '?',
    };

    let mut buf = [b'-'; 9];

    // user
    if mode & 0o400 != 0 {
        buf[0] = b'r';
    }
    if mode & 0o200 != 0 {
        buf[1] = b'w';
    }
    if mode & 0o100 != 0 {
        buf[2] = b'x';
    }
    // group
    if mode & 0o040 != 0 {
        buf[3] = b'r';
    }
    if mode & 0o020 != 0 {
        buf[4] = b'w';
    }
    if mode & 0o010 != 0 {
        buf[5] = b'x';
    }
    // other
    if mode & 0o004 != 0 {
        buf[6] = b'r';
    }
    if mode & 0o002 != 0 {
        buf[7] = b'w';
    }
    if mode & 0o001 != 0 {
        buf[8] = b'x';
    }

    // special bits
    if mode & S_ISUID != 0 {
        buf[2] = if buf[2] == b'x' { b's' } else { b'S' };
    }
    if mode & S_ISGID != 0 {
        buf[5] = if buf[5] == b'x' { b's' } else { b'S' };
    }
    if mode & S_ISVTX != 0 {
        buf[8] = if buf[8] == b'x' { b't' } else { b'T' };
    }

    let mut s = String::with_capacity(10);
    s.push(file_ch);
    s.push_str(std::str::from_utf8(&buf).unwrap());
    s
}

#[derive(Debug, Clone, Serialize)]
pub struct InodeNode {
    pub scan_offset: usize,
    pub ino: u32,
    pub version: u32,
    pub mode: u32,
    pub uid: u16,
    pub gid: u16,
    // Resultant file size recorded by this version (used for truncations)
    pub isize: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub atime_h: String,
    pub mtime_h: String,
    pub ctime_h: String,
    // Byte offset within the file where this node's data belongs
    pub offset: u32,
    pub csize: u32,
    pub dsize: u32,
    pub compr: u8,
    pub usercompr: u8,
    pub flags: u16,
    pub data_crc: u32,
    pub node_crc: u32,
    pub node_crc_ok: bool,
    pub data_crc_ok: bool,
    /// Decompressed payload, owned by the node. On decoder failure this is a
    /// zero-filled placeholder of `dsize` bytes so later overlays keep their
    /// offsets.
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl InodeNode {
    /// Constructs an InodeNode from the raw node bytes (header included) and
    /// decompresses its payload.
    pub fn from_bytes(
        data: &[u8],
        scan_offset: usize,
        endianness: Endianness,
    ) -> Result<InodeNode, String> {
        if data.len() < INODE_FIXED_SIZE {
            return Err(format!(
                "not enough bytes for an inode node ({} < {})",
                data.len(),
                INODE_FIXED_SIZE
            ));
        }

        let format_time = |seconds: u32| {
            Utc.timestamp_opt(seconds as i64, 0)
                .single()
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default()
        };

        let ino = endianness.read_u32(data, 0xC);
        let version = endianness.read_u32(data, 0x10);
        let atime = endianness.read_u32(data, 0x20);
        let mtime = endianness.read_u32(data, 0x24);
        let ctime = endianness.read_u32(data, 0x28);
        let csize = endianness.read_u32(data, 0x30);
        let dsize = endianness.read_u32(data, 0x34);
        let compr = data[0x38];
        let data_crc = endianness.read_u32(data, 0x3C);
        let node_crc = endianness.read_u32(data, 0x40);

        // The payload may be cut short by the end of the image; decode what
        // is there and let the decompressor report the damage.
        let payload_end = (INODE_FIXED_SIZE + csize as usize).min(data.len());
        let payload = &data[INODE_FIXED_SIZE..payload_end];
        if payload.len() < csize as usize {
            warn!(
                "inode {} at 0x{:08x}: payload truncated ({} of {} bytes)",
                ino,
                scan_offset,
                payload.len(),
                csize
            );
        }

        let decompressed = match compression::decompress(compr, payload, dsize as usize) {
            Ok(decompressed) => decompressed,
            Err(message) => {
                warn!(
                    "inode {} at 0x{:08x}: {}; substituting {} zero bytes",
                    ino, scan_offset, message, dsize
                );
                vec![0u8; dsize as usize]
            }
        };
        if decompressed.len() != dsize as usize {
            warn!(
                "inode {} at 0x{:08x}: decompressed to {} bytes, dsize says {}",
                ino,
                scan_offset,
                decompressed.len(),
                dsize
            );
        }

        Ok(InodeNode {
            scan_offset,
            ino,
            version,
            mode: endianness.read_u32(data, 0x14),
            uid: endianness.read_u16(data, 0x18),
            gid: endianness.read_u16(data, 0x1A),
            isize: endianness.read_u32(data, 0x1C),
            atime,
            mtime,
            ctime,
            atime_h: format_time(atime),
            mtime_h: format_time(mtime),
            ctime_h: format_time(ctime),
            offset: endianness.read_u32(data, 0x2C),
            csize,
            dsize,
            compr,
            usercompr: data[0x39],
            flags: endianness.read_u16(data, 0x3A),
            data_crc,
            node_crc,
            // node_crc covers the fixed part minus the two trailing CRCs
            node_crc_ok: mtd_crc(&data[0..0x3C]) == node_crc,
            data_crc_ok: mtd_crc(payload) == data_crc,
            data: decompressed,
        })
    }

    /// Check if this inode version belongs to a directory (S_IFDIR).
    pub fn is_dir(&self) -> bool {
        (self.mode & S_IFMT) == S_IFDIR
    }

    /// Check if this inode version belongs to a regular file (S_IFREG).
    pub fn is_regular_file(&self) -> bool {
        (self.mode & S_IFMT) == S_IFREG
    }

    /// Check if this inode version belongs to a symlink (S_IFLNK).
    pub fn is_symlink(&self) -> bool {
        (self.mode & S_IFMT) == S_IFLNK
    }

    /// Check if this inode version belongs to a device node.
    pub fn is_device(&self) -> bool {
        matches!(self.mode & S_IFMT, S_IFCHR | S_IFBLK)
    }

    /// Permission bits as applied to the extracted file.
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    /// Decode the device id carried in the payload of a CHR/BLK inode.
    ///
    /// The payload is either a 32-bit "new" id or a 16-bit "old" id; `dsize`
    /// disambiguates. Returns `(major, minor)`, or None when the payload has
    /// neither width.
    pub fn device_numbers(&self, endianness: Endianness) -> Option<(u32, u32)> {
        match self.dsize {
            4 if self.data.len() >= 4 => {
                let id = endianness.read_u32(&self.data, 0);
                let major = (id & 0xFFF00) >> 8;
                let minor = (id & 0xFF) | ((id >> 12) & 0xFFF00);
                Some((major, minor))
            }
            2 if self.data.len() >= 2 => {
                let id = endianness.read_u16(&self.data, 0) as u32;
                Some(((id >> 8) & 0xFF, id & 0xFF))
            }
            _ => None,
        }
    }

    /// The to_json method.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }

    /// String representation of an inode node using prettytable
    pub fn to_string(&self) -> String {
        let mut inode_table = Table::new();

        inode_table.add_row(Row::new(vec![
            Cell::new("Inode"),
            Cell::new(&format!("{}", self.ino)),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("Version"),
            Cell::new(&format!("{}", self.version)),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("Mode"),
            Cell::new(&mode_to_string(self.mode)),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("UID / GID"),
            Cell::new(&format!("{} / {}", self.uid, self.gid)),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("Recorded size"),
            Cell::new(&format!("{}", self.isize)),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("atime"),
            Cell::new(&self.atime_h),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("mtime"),
            Cell::new(&self.mtime_h),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("ctime"),
            Cell::new(&self.ctime_h),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("Data offset"),
            Cell::new(&format!("0x{:x}", self.offset)),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("csize / dsize"),
            Cell::new(&format!("{} / {}", self.csize, self.dsize)),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("Compression"),
            Cell::new(compr_name(self.compr)),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("Node CRC ok?"),
            Cell::new(&format!("{}", self.node_crc_ok)),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("Data CRC ok?"),
            Cell::new(&format!("{}", self.data_crc_ok)),
        ]));
        inode_table.to_string()
    }

    /// Prints a one-line summary of the inode node.
    pub fn print_info(&self) {
        println!(
            "inode  @0x{:08x}: ino {} v{} {} offset 0x{:x} csize {} dsize {} compr {}",
            self.scan_offset,
            self.ino,
            self.version,
            mode_to_string(self.mode),
            self.offset,
            self.csize,
            self.dsize,
            compr_name(self.compr)
        );
    }
}
