use std::collections::HashSet;
use std::error::Error;
use std::path::Path;

pub mod compression;
pub mod crc;
pub mod direntry;
pub mod extract;
pub mod header;
pub mod inode;
pub mod summary;
pub mod xattr;

use direntry::DirentNode;
use header::{
    Endianness, NodeHeader, JFFS2_NODETYPE_CLEANMARKER, JFFS2_NODETYPE_DIRENT,
    JFFS2_NODETYPE_INODE, JFFS2_NODETYPE_PADDING, JFFS2_NODETYPE_SUMMARY, JFFS2_NODETYPE_XATTR,
    JFFS2_NODETYPE_XREF, NODE_HEADER_SIZE,
};
use inode::InodeNode;
use log::{debug, error, info, warn};
use prettytable::{Cell, Row, Table};
use serde_json::{json, Value};
use summary::SummaryNode;
use xattr::{XattrNode, XrefNode};

/// One logical filesystem: the nodes the scanner groups into a single mount
/// image. A fresh group starts whenever a second dirent claims an inode
/// number already seen in the current one, which is how concatenated images
/// fall apart into their pieces.
pub struct Jffs2Fs {
    pub endianness: Endianness,
    pub dirents: Vec<DirentNode>,
    pub inodes: Vec<InodeNode>,
    pub xattrs: Vec<XattrNode>,
    pub xrefs: Vec<XrefNode>,
    pub summaries: Vec<SummaryNode>,
}

impl Jffs2Fs {
    fn new(endianness: Endianness) -> Self {
        Jffs2Fs {
            endianness,
            dirents: Vec::new(),
            inodes: Vec::new(),
            xattrs: Vec::new(),
            xrefs: Vec::new(),
            summaries: Vec::new(),
        }
    }

    /// A filesystem with no directory entries has nothing to extract; magic
    /// false positives and orphaned data nodes end up in such groups.
    pub fn is_empty(&self) -> bool {
        self.dirents.is_empty()
    }

    /// Walk the image and collect every node whose header checks out.
    ///
    /// The cursor jumps to the padded end of each accepted node and advances
    /// a single byte past every rejected candidate, so a forged length can
    /// never swallow real nodes.
    pub fn scan(image: &[u8], endianness: Endianness, verbose: u8) -> Vec<Jffs2Fs> {
        let mut filesystems = vec![Jffs2Fs::new(endianness)];
        if image.len() < NODE_HEADER_SIZE {
            return filesystems;
        }

        let needle = endianness.magic_needle();
        let limit = image.len() - NODE_HEADER_SIZE;
        let mut dirent_seen: HashSet<u32> = HashSet::new();
        let mut pos = 0usize;

        while pos <= limit {
            match image[pos..].windows(2).position(|w| w == needle) {
                Some(relative) if pos + relative <= limit => pos += relative,
                _ => break,
            }

            let header = match NodeHeader::from_bytes(&image[pos..], endianness) {
                Ok(header) => header,
                Err(_) => break,
            };
            if !header.crc_is_valid(&image[pos..pos + 8]) {
                pos += 1;
                continue;
            }
            let totlen = header.totlen as usize;
            if totlen < NODE_HEADER_SIZE {
                debug!("node at 0x{:08x} claims totlen {}, rejecting", pos, totlen);
                pos += 1;
                continue;
            }

            // The payload may run past the end of the image; decode what is
            // there. The cursor moves by the padded totlen no matter what
            // the per-type decoding does.
            let node_bytes = &image[pos..(pos + totlen).min(image.len())];
            let next = pos + header.aligned_totlen();

            match header.nodetype {
                JFFS2_NODETYPE_DIRENT => match DirentNode::from_bytes(node_bytes, pos, endianness)
                {
                    Ok(dirent) => {
                        if !dirent.node_crc_ok {
                            warn!("dirent at 0x{:08x}: node CRC mismatch", pos);
                        }
                        if !dirent.name_crc_ok {
                            warn!("dirent at 0x{:08x}: name CRC mismatch", pos);
                        }
                        if verbose >= 2 {
                            dirent.print_info();
                        }
                        if dirent_seen.contains(&dirent.ino) {
                            debug!(
                                "inode {} already has a dirent; starting logical filesystem #{}",
                                dirent.ino,
                                filesystems.len() + 1
                            );
                            dirent_seen.clear();
                            dirent_seen.insert(dirent.ino);
                            let mut fresh = Jffs2Fs::new(endianness);
                            fresh.dirents.push(dirent);
                            filesystems.push(fresh);
                        } else {
                            dirent_seen.insert(dirent.ino);
                            filesystems.last_mut().unwrap().dirents.push(dirent);
                        }
                    }
                    Err(message) => warn!("bad dirent at 0x{:08x}: {}", pos, message),
                },
                JFFS2_NODETYPE_INODE => match InodeNode::from_bytes(node_bytes, pos, endianness) {
                    Ok(node) => {
                        if !node.node_crc_ok {
                            warn!("inode at 0x{:08x}: node CRC mismatch", pos);
                        }
                        if !node.data_crc_ok {
                            warn!("inode at 0x{:08x}: data CRC mismatch", pos);
                        }
                        if verbose >= 3 {
                            println!("{}", node.to_string());
                        } else if verbose >= 2 {
                            node.print_info();
                        }
                        filesystems.last_mut().unwrap().inodes.push(node);
                    }
                    Err(message) => warn!("bad inode at 0x{:08x}: {}", pos, message),
                },
                JFFS2_NODETYPE_XATTR => match XattrNode::from_bytes(node_bytes, pos, endianness) {
                    Ok(node) => filesystems.last_mut().unwrap().xattrs.push(node),
                    Err(message) => warn!("bad xattr at 0x{:08x}: {}", pos, message),
                },
                JFFS2_NODETYPE_XREF => match XrefNode::from_bytes(node_bytes, pos, endianness) {
                    Ok(node) => filesystems.last_mut().unwrap().xrefs.push(node),
                    Err(message) => warn!("bad xref at 0x{:08x}: {}", pos, message),
                },
                JFFS2_NODETYPE_SUMMARY => {
                    match SummaryNode::from_bytes(node_bytes, pos, endianness) {
                        Ok(node) => filesystems.last_mut().unwrap().summaries.push(node),
                        Err(message) => warn!("bad summary at 0x{:08x}: {}", pos, message),
                    }
                }
                JFFS2_NODETYPE_CLEANMARKER | JFFS2_NODETYPE_PADDING => {
                    debug!("housekeeping node 0x{:04x} at 0x{:08x}", header.nodetype, pos);
                }
                other => {
                    debug!("unknown node type 0x{:04x} at 0x{:08x}, skipping", other, pos);
                }
            }

            pos = next;
        }

        filesystems
    }

    /// Write this filesystem's tree below `target`.
    pub fn extract(&self, target: &Path) -> Result<(), Box<dyn Error>> {
        extract::extract_filesystem(self, target)
    }

    /// The to_json method: the full node catalogue of this filesystem.
    pub fn to_json(&self) -> Value {
        json!({
            "endianness": self.endianness.to_string(),
            "dirents": self.dirents.iter().map(|d| d.to_json()).collect::<Vec<_>>(),
            "inodes": self.inodes.iter().map(|i| i.to_json()).collect::<Vec<_>>(),
            "xattrs": self.xattrs.iter().map(|x| x.to_json()).collect::<Vec<_>>(),
            "xrefs": self.xrefs.iter().map(|x| x.to_json()).collect::<Vec<_>>(),
            "summaries": self.summaries.iter().map(|s| s.to_json()).collect::<Vec<_>>(),
        })
    }

    /// Per-type node counts as a prettytable rendering.
    pub fn report(&self) -> String {
        let mut table = Table::new();
        table.add_row(Row::new(vec![
            Cell::new("Endianness"),
            Cell::new(&self.endianness.to_string()),
        ]));
        table.add_row(Row::new(vec![
            Cell::new("Dirent nodes"),
            Cell::new(&format!("{}", self.dirents.len())),
        ]));
        table.add_row(Row::new(vec![
            Cell::new("Inode nodes"),
            Cell::new(&format!("{}", self.inodes.len())),
        ]));
        table.add_row(Row::new(vec![
            Cell::new("Xattr nodes"),
            Cell::new(&format!("{}", self.xattrs.len())),
        ]));
        table.add_row(Row::new(vec![
            Cell::new("Xref nodes"),
            Cell::new(&format!("{}", self.xrefs.len())),
        ]));
        table.add_row(Row::new(vec![
            Cell::new("Summary nodes"),
            Cell::new(&format!("{}", self.summaries.len())),
        ]));
        table.to_string()
    }
}

/// Scan the image in both byte orders and materialize every logical
/// filesystem that holds at least one directory entry. Returns how many were
/// written below `dest` as `fs_1`, `fs_2`, ...
pub fn extract_image(
    image: &[u8],
    dest: &Path,
    verbose: u8,
    catalogue_json: bool,
) -> Result<usize, Box<dyn Error>> {
    let mut filesystems = Vec::new();
    for endianness in [Endianness::Big, Endianness::Little] {
        debug!("scanning {} bytes ({}-endian pass)", image.len(), endianness);
        filesystems.extend(Jffs2Fs::scan(image, endianness, verbose));
    }
    filesystems.retain(|filesystem| !filesystem.is_empty());

    if filesystems.is_empty() {
        info!("no JFFS2 filesystems found");
        return Ok(0);
    }

    for (index, filesystem) in filesystems.iter().enumerate() {
        let target = dest.join(format!("fs_{}", index + 1));
        info!(
            "dumping filesystem #{} ({}-endian, {} dirents, {} inodes) to {}",
            index + 1,
            filesystem.endianness,
            filesystem.dirents.len(),
            filesystem.inodes.len(),
            target.display()
        );
        if verbose >= 1 {
            println!("{}", filesystem.report());
        }
        if catalogue_json {
            println!("{}", serde_json::to_string_pretty(&filesystem.to_json())?);
        }
        if let Err(message) = filesystem.extract(&target) {
            error!("filesystem #{}: {}", index + 1, message);
        }
    }

    Ok(filesystems.len())
}
