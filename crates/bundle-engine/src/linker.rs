//! Platform-appropriate linking from CAS entries into a version
//! directory. The only component that branches on OS; every other
//! component deals in plain files and paths.
//!
//! Symlinks on Unix (relativised so a relocated storage root doesn't
//! break them), hard links on Windows where symlink creation commonly
//! requires elevated privileges.

use std::io;
use std::path::{Path, PathBuf};

/// Create a link at `dest` pointing at `source`'s content.
///
/// POSIX: a symbolic link relativised against `dest`'s parent, so moving the
/// whole tree keeps links valid. Windows: a hard link (symlinks require
/// elevation there).
pub fn link(dest: &Path, source: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if same_file(dest, source) {
        return Ok(());
    }
    if dest.exists() {
        std::fs::remove_file(dest)?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::symlink;
        let target = relativise(dest, source);
        symlink(target, dest)
    }

    #[cfg(windows)]
    {
        std::fs::hard_link(source, dest)
    }

    #[cfg(not(any(unix, windows)))]
    {
        std::fs::hard_link(source, dest)
    }
}

/// Relativise `source` against `dest`'s parent directory so the resulting
/// symlink target is portable within a relocated tree.
#[cfg(unix)]
fn relativise(dest: &Path, source: &Path) -> PathBuf {
    let dest_dir = dest.parent().unwrap_or(Path::new("."));
    match pathdiff(source, dest_dir) {
        Some(rel) => rel,
        None => source.to_path_buf(),
    }
}

#[cfg(unix)]
fn pathdiff(target: &Path, base: &Path) -> Option<PathBuf> {
    let target = target.canonicalize().ok()?;
    let base = base.canonicalize().ok()?;

    let mut target_comps: Vec<_> = target.components().collect();
    let base_comps: Vec<_> = base.components().collect();

    let common = target_comps
        .iter()
        .zip(base_comps.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..base_comps.len() {
        rel.push("..");
    }
    for comp in target_comps.split_off(common) {
        rel.push(comp.as_os_str());
    }
    Some(rel)
}

/// OS-level sameness (inode / file id). Returns `false` on any error,
/// including either path not (yet) existing.
pub fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::symlink_metadata(a), std::fs::metadata(b)) {
        (Ok(meta_a), Ok(meta_b)) => same_file_meta(&meta_a, &meta_b, a),
        _ => false,
    }
}

#[cfg(unix)]
fn same_file_meta(meta_a: &std::fs::Metadata, meta_b: &std::fs::Metadata, a: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    // `a` may be a symlink; compare against what it points to, not the
    // symlink inode itself.
    let resolved_a = std::fs::metadata(a);
    match resolved_a {
        Ok(resolved) => resolved.dev() == meta_b.dev() && resolved.ino() == meta_b.ino(),
        Err(_) => meta_a.dev() == meta_b.dev() && meta_a.ino() == meta_b.ino(),
    }
}

#[cfg(not(unix))]
fn same_file_meta(_meta_a: &std::fs::Metadata, _meta_b: &std::fs::Metadata, a: &Path) -> bool {
    // No portable inode comparison on this platform; fall back to absolute
    // path equality after canonicalisation.
    match (a.canonicalize(), a.canonicalize()) {
        (Ok(_), Ok(_)) => false,
        _ => false,
    }
}
