use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::error::Error;
use std::ffi::CString;
use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::direntry::DirentNode;
use crate::inode::{InodeNode, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK};
use crate::Jffs2Fs;

/// Bound on the pino chain walked during path resolution. Anything deeper is
/// assumed to be a cycle in a damaged image.
const MAX_PATH_DEPTH: usize = 100;

/// Write one logical filesystem below `target`.
///
/// Failures on individual entries are logged and never abort the remaining
/// entries; only the inability to create `target` itself is fatal.
pub fn extract_filesystem(filesystem: &Jffs2Fs, target: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(target)?;

    // Join each dirent with the inode versions carrying its data, in scan
    // order. A second dirent claiming an already-mapped inode number loses.
    let mut inode_map: HashMap<u32, Vec<&InodeNode>> = HashMap::new();
    for node in &filesystem.inodes {
        inode_map.entry(node.ino).or_default().push(node);
    }

    let mut node_dict: HashMap<u32, &DirentNode> = HashMap::new();
    for dirent in &filesystem.dirents {
        if let Some(existing) = node_dict.get(&dirent.ino) {
            warn!(
                "inode {} named twice: keeping '{}', ignoring '{}'",
                dirent.ino,
                existing.name_lossy(),
                dirent.name_lossy()
            );
            continue;
        }
        node_dict.insert(dirent.ino, dirent);
    }

    for dirent in &filesystem.dirents {
        // skip the losers of the duplicate-ino resolution above
        match node_dict.get(&dirent.ino) {
            Some(kept) if std::ptr::eq(*kept, dirent) => {}
            _ => continue,
        }
        if let Err(message) = materialize_dirent(dirent, &node_dict, &inode_map, target, filesystem)
        {
            error!("cannot extract '{}': {}", dirent.name_lossy(), message);
        }
    }

    Ok(())
}

/// Resolve the path of a dirent relative to the filesystem root by walking
/// parent inode numbers. The root is the implicit anchor: the walk stops at
/// the first pino with no dirent of its own.
fn resolve_path(
    dirent: &DirentNode,
    node_dict: &HashMap<u32, &DirentNode>,
) -> Result<PathBuf, String> {
    let mut components = vec![path_component(dirent)?];
    let mut pino = dirent.pino;

    for _ in 0..MAX_PATH_DEPTH {
        match node_dict.get(&pino) {
            Some(parent) => {
                components.push(path_component(parent)?);
                pino = parent.pino;
            }
            None => {
                let mut path = PathBuf::new();
                for component in components.iter().rev() {
                    path.push(component);
                }
                return Ok(path);
            }
        }
    }

    Err(format!(
        "parent chain of inode {} exceeds depth {}",
        dirent.ino, MAX_PATH_DEPTH
    ))
}

/// A dirent name as a host path component. Names are raw bytes on flash; the
/// host wants UTF-8, and nothing resembling a traversal is let through.
fn path_component<'a>(dirent: &'a DirentNode) -> Result<&'a str, String> {
    let name = std::str::from_utf8(&dirent.name)
        .map_err(|_| format!("name of inode {} is not valid UTF-8", dirent.ino))?;
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0')
    {
        return Err(format!("refusing unsafe path component '{}'", name));
    }
    Ok(name)
}

fn materialize_dirent(
    dirent: &DirentNode,
    node_dict: &HashMap<u32, &DirentNode>,
    inode_map: &HashMap<u32, Vec<&InodeNode>>,
    target: &Path,
    filesystem: &Jffs2Fs,
) -> Result<(), String> {
    if dirent.is_unlink() {
        debug!("'{}' is an unlink entry, nothing to write", dirent.name_lossy());
        return Ok(());
    }

    let inodes = inode_map
        .get(&dirent.ino)
        .map(|v| v.as_slice())
        .unwrap_or(&[]);
    let Some(first) = inodes.first() else {
        debug!(
            "no inode records for '{}' (ino {}), nothing to write",
            dirent.name_lossy(),
            dirent.ino
        );
        return Ok(());
    };

    if inodes.windows(2).any(|w| w[1].version < w[0].version) {
        warn!(
            "inode {} has versions out of scan order; overlay keeps scan order",
            dirent.ino
        );
    }

    let relative = resolve_path(dirent, node_dict)?;
    let path = target.join(&relative);

    match first.mode & S_IFMT {
        S_IFDIR => {
            fs::create_dir_all(&path).map_err(|e| format!("mkdir: {}", e))?;
            debug!("dir     {}", path.display());
        }
        S_IFLNK => {
            let link_target = std::str::from_utf8(&first.data)
                .map_err(|_| "symlink target is not valid UTF-8".to_string())?;
            if path
                .symlink_metadata()
                .map(|m| !m.file_type().is_symlink())
                .unwrap_or(false)
            {
                info!(
                    "'{}' exists and is not a symlink, leaving it alone",
                    path.display()
                );
                return Ok(());
            }
            ensure_parent(&path)?;
            symlink(link_target, &path).map_err(|e| format!("symlink: {}", e))?;
            debug!("symlink {} -> {}", path.display(), link_target);
        }
        S_IFREG => {
            write_regular_file(&path, inodes)?;
            debug!("file    {} ({} inode records)", path.display(), inodes.len());
        }
        S_IFCHR | S_IFBLK => {
            make_device_node(&path, first, filesystem)?;
            debug!("device  {}", path.display());
        }
        S_IFIFO => info!("skipping fifo '{}'", relative.display()),
        S_IFSOCK => info!("skipping socket '{}'", relative.display()),
        other => warn!(
            "unsupported file type 0o{:o} for '{}', skipping",
            other,
            relative.display()
        ),
    }

    Ok(())
}

fn ensure_parent(path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("mkdir {}: {}", parent.display(), e))?;
    }
    Ok(())
}

/// Overlay every inode version onto the file at its recorded offset, in scan
/// order, then apply the permission bits. The file keeps the length the
/// overlay produced; a disagreeing `isize` is only reported.
fn write_regular_file(path: &Path, inodes: &[&InodeNode]) -> Result<(), String> {
    ensure_parent(path)?;
    let mut file = File::create(path).map_err(|e| format!("create: {}", e))?;

    let mut written_end = 0u64;
    let mut latest = inodes[0];
    for &node in inodes {
        file.seek(SeekFrom::Start(node.offset as u64))
            .map_err(|e| format!("seek: {}", e))?;
        file.write_all(&node.data)
            .map_err(|e| format!("write: {}", e))?;
        written_end = written_end.max(node.offset as u64 + node.data.len() as u64);
        if node.version >= latest.version {
            latest = node;
        }
    }
    if written_end != latest.isize as u64 {
        debug!(
            "{}: overlay produced {} bytes, latest isize says {}; keeping as written",
            path.display(),
            written_end,
            latest.isize
        );
    }

    fs::set_permissions(path, fs::Permissions::from_mode(inodes[0].permissions()))
        .map_err(|e| format!("chmod: {}", e))?;
    Ok(())
}

fn make_device_node(
    path: &Path,
    inode: &InodeNode,
    filesystem: &Jffs2Fs,
) -> Result<(), String> {
    let Some((major, minor)) = inode.device_numbers(filesystem.endianness) else {
        return Err(format!(
            "cannot decode a device id from a {}-byte payload",
            inode.dsize
        ));
    };
    ensure_parent(path)?;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| "path contains an interior NUL".to_string())?;
    let kind = if inode.mode & S_IFMT == S_IFCHR {
        libc::S_IFCHR
    } else {
        libc::S_IFBLK
    };
    let dev = libc::makedev(major, minor);
    let rc = unsafe {
        libc::mknod(
            c_path.as_ptr(),
            kind | inode.permissions() as libc::mode_t,
            dev,
        )
    };
    if rc != 0 {
        return Err(format!(
            "mknod {}:{}: {}",
            major,
            minor,
            std::io::Error::last_os_error()
        ));
    }
    Ok(())
}
