use std::io::Write;
use std::os::unix::fs::PermissionsExt;

use exhume_jffs2::compression::{JFFS2_COMPR_NONE, JFFS2_COMPR_ZLIB};
use exhume_jffs2::crc::mtd_crc;
use exhume_jffs2::extract_image;
use exhume_jffs2::header::{Endianness, JFFS2_MAGIC, JFFS2_NODETYPE_DIRENT, JFFS2_NODETYPE_INODE};
use exhume_jffs2::inode::{S_IFDIR, S_IFLNK, S_IFREG};

/// Assembles a synthetic flash image node by node, sealing every header and
/// body checksum the way mkfs.jffs2 would.
struct ImageBuilder {
    endianness: Endianness,
    bytes: Vec<u8>,
}

impl ImageBuilder {
    fn new(endianness: Endianness) -> Self {
        ImageBuilder {
            endianness,
            bytes: Vec::new(),
        }
    }

    fn u16(&self, value: u16) -> [u8; 2] {
        match self.endianness {
            Endianness::Big => value.to_be_bytes(),
            Endianness::Little => value.to_le_bytes(),
        }
    }

    fn u32(&self, value: u32) -> [u8; 4] {
        match self.endianness {
            Endianness::Big => value.to_be_bytes(),
            Endianness::Little => value.to_le_bytes(),
        }
    }

    fn append(&mut self, node: Vec<u8>) {
        self.bytes.extend(&node);
        // flash keeps nodes 4-byte aligned; the gap reads as erased 0xFF
        while self.bytes.len() % 4 != 0 {
            self.bytes.push(0xFF);
        }
    }

    fn dirent(&mut self, pino: u32, ino: u32, version: u32, ntype: u8, name: &[u8]) {
        let mut node = Vec::new();
        node.extend(self.u16(JFFS2_MAGIC));
        node.extend(self.u16(JFFS2_NODETYPE_DIRENT));
        node.extend(self.u32(40 + name.len() as u32));
        let hdr_crc = mtd_crc(&node);
        node.extend(self.u32(hdr_crc));
        node.extend(self.u32(pino));
        node.extend(self.u32(version));
        node.extend(self.u32(ino));
        node.extend(self.u32(0)); // mctime
        node.push(name.len() as u8);
        node.push(ntype);
        node.extend([0u8; 2]);
        let node_crc = mtd_crc(&node[0..32]);
        node.extend(self.u32(node_crc));
        node.extend(self.u32(mtd_crc(name)));
        node.extend_from_slice(name);
        self.append(node);
    }

    #[allow(clippy::too_many_arguments)]
    fn inode(
        &mut self,
        ino: u32,
        version: u32,
        mode: u32,
        offset: u32,
        dsize: u32,
        compr: u8,
        payload: &[u8],
    ) {
        let mut node = Vec::new();
        node.extend(self.u16(JFFS2_MAGIC));
        node.extend(self.u16(JFFS2_NODETYPE_INODE));
        node.extend(self.u32(68 + payload.len() as u32));
        let hdr_crc = mtd_crc(&node);
        node.extend(self.u32(hdr_crc));
        node.extend(self.u32(ino));
        node.extend(self.u32(version));
        node.extend(self.u32(mode));
        node.extend(self.u16(0)); // uid
        node.extend(self.u16(0)); // gid
        node.extend(self.u32(offset + dsize)); // isize
        node.extend(self.u32(0)); // atime
        node.extend(self.u32(0)); // mtime
        node.extend(self.u32(0)); // ctime
        node.extend(self.u32(offset));
        node.extend(self.u32(payload.len() as u32)); // csize
        node.extend(self.u32(dsize));
        node.push(compr);
        node.push(0); // usercompr
        node.extend(self.u16(0)); // flags
        node.extend(self.u32(mtd_crc(payload)));
        let node_crc = mtd_crc(&node[0..60]);
        node.extend(self.u32(node_crc));
        node.extend_from_slice(payload);
        self.append(node);
    }
}

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[test]
fn extracts_an_uncompressed_file() {
    let mut image = ImageBuilder::new(Endianness::Little);
    image.dirent(1, 2, 1, 8, b"hello");
    image.inode(2, 1, S_IFREG | 0o644, 0, 5, JFFS2_COMPR_NONE, b"world");

    let dest = tempfile::tempdir().unwrap();
    let count = extract_image(&image.bytes, dest.path(), 0, false).unwrap();
    assert_eq!(count, 1);

    let extracted = dest.path().join("fs_1/hello");
    assert_eq!(std::fs::read(&extracted).unwrap(), b"world");
    let mode = std::fs::metadata(&extracted).unwrap().permissions().mode();
    assert_eq!(mode & 0o7777, 0o644);
}

#[test]
fn extracts_a_zlib_file() {
    let compressed = zlib(b"aaaaaaaaaa");
    let mut image = ImageBuilder::new(Endianness::Little);
    image.dirent(1, 2, 1, 8, b"packed");
    image.inode(2, 1, S_IFREG | 0o600, 0, 10, JFFS2_COMPR_ZLIB, &compressed);

    let dest = tempfile::tempdir().unwrap();
    extract_image(&image.bytes, dest.path(), 0, false).unwrap();

    assert_eq!(
        std::fs::read(dest.path().join("fs_1/packed")).unwrap(),
        b"aaaaaaaaaa"
    );
}

#[test]
fn later_writes_overlay_earlier() {
    let mut image = ImageBuilder::new(Endianness::Little);
    image.dirent(1, 2, 1, 8, b"data.bin");
    image.inode(2, 1, S_IFREG | 0o644, 0, 4, JFFS2_COMPR_NONE, b"AAAA");
    image.inode(2, 2, S_IFREG | 0o644, 2, 2, JFFS2_COMPR_NONE, b"BB");

    let dest = tempfile::tempdir().unwrap();
    extract_image(&image.bytes, dest.path(), 0, false).unwrap();

    assert_eq!(
        std::fs::read(dest.path().join("fs_1/data.bin")).unwrap(),
        b"AABB"
    );
}

#[test]
fn extracts_a_symlink() {
    let mut image = ImageBuilder::new(Endianness::Little);
    image.dirent(1, 2, 1, 10, b"link");
    image.inode(2, 1, S_IFLNK | 0o777, 0, 6, JFFS2_COMPR_NONE, b"target");

    let dest = tempfile::tempdir().unwrap();
    extract_image(&image.bytes, dest.path(), 0, false).unwrap();

    let link = dest.path().join("fs_1/link");
    assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
    assert_eq!(std::fs::read_link(&link).unwrap().to_str(), Some("target"));
}

#[test]
fn nested_directories_are_reconstructed() {
    let mut image = ImageBuilder::new(Endianness::Little);
    image.dirent(1, 2, 1, 4, b"etc");
    image.inode(2, 1, S_IFDIR | 0o755, 0, 0, JFFS2_COMPR_NONE, b"");
    image.dirent(2, 3, 1, 8, b"hostname");
    image.inode(3, 1, S_IFREG | 0o644, 0, 7, JFFS2_COMPR_NONE, b"router\n");

    let dest = tempfile::tempdir().unwrap();
    extract_image(&image.bytes, dest.path(), 0, false).unwrap();

    assert!(dest.path().join("fs_1/etc").is_dir());
    assert_eq!(
        std::fs::read(dest.path().join("fs_1/etc/hostname")).unwrap(),
        b"router\n"
    );
}

#[test]
fn duplicate_inode_numbers_split_filesystems() {
    let mut image = ImageBuilder::new(Endianness::Little);
    image.dirent(1, 5, 1, 8, b"first");
    image.inode(5, 1, S_IFREG | 0o644, 0, 3, JFFS2_COMPR_NONE, b"one");
    image.dirent(1, 5, 1, 8, b"second");
    image.inode(5, 1, S_IFREG | 0o644, 0, 3, JFFS2_COMPR_NONE, b"two");

    let dest = tempfile::tempdir().unwrap();
    let count = extract_image(&image.bytes, dest.path(), 0, false).unwrap();
    assert_eq!(count, 2);

    assert_eq!(std::fs::read(dest.path().join("fs_1/first")).unwrap(), b"one");
    assert_eq!(std::fs::read(dest.path().join("fs_2/second")).unwrap(), b"two");
}

#[test]
fn mixed_endianness_images_are_both_recovered() {
    let mut big = ImageBuilder::new(Endianness::Big);
    big.dirent(1, 2, 1, 8, b"big");
    big.inode(2, 1, S_IFREG | 0o644, 0, 7, JFFS2_COMPR_NONE, b"BE data");

    let mut little = ImageBuilder::new(Endianness::Little);
    little.dirent(1, 2, 1, 8, b"little");
    little.inode(2, 1, S_IFREG | 0o644, 0, 7, JFFS2_COMPR_NONE, b"LE data");

    let mut image = big.bytes;
    image.extend(&little.bytes);

    let dest = tempfile::tempdir().unwrap();
    let count = extract_image(&image, dest.path(), 0, false).unwrap();
    assert_eq!(count, 2);

    // the big-endian pass runs first
    assert_eq!(std::fs::read(dest.path().join("fs_1/big")).unwrap(), b"BE data");
    assert_eq!(
        std::fs::read(dest.path().join("fs_2/little")).unwrap(),
        b"LE data"
    );
}

#[test]
fn corrupted_header_is_stepped_over() {
    let mut image = ImageBuilder::new(Endianness::Little);
    image.dirent(1, 2, 1, 8, b"hello");
    image.inode(2, 1, S_IFREG | 0o644, 0, 5, JFFS2_COMPR_NONE, b"world");

    // Corrupt the dirent's totlen; its header CRC no longer matches, so the
    // scanner must advance byte-wise and still find the inode node behind it.
    image.bytes[4] ^= 0xFF;
    let dest = tempfile::tempdir().unwrap();
    let count = extract_image(&image.bytes, dest.path(), 0, false).unwrap();
    assert_eq!(count, 0, "a lone inode node is not a filesystem");

    // Restore the byte and both nodes come back.
    image.bytes[4] ^= 0xFF;
    let dest = tempfile::tempdir().unwrap();
    let count = extract_image(&image.bytes, dest.path(), 0, false).unwrap();
    assert_eq!(count, 1);
}

#[test]
fn random_noise_produces_no_filesystems() {
    // deterministic xorshift noise, 1 MiB
    let mut state = 0x9E3779B97F4A7C15u64;
    let mut image = Vec::with_capacity(1 << 20);
    while image.len() < 1 << 20 {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        image.extend(state.to_le_bytes());
    }

    let dest = tempfile::tempdir().unwrap();
    let count = extract_image(&image, dest.path(), 0, false).unwrap();
    assert_eq!(count, 0);
    assert!(!dest.path().join("fs_1").exists());
}
