//! Gzip-compressed tar archives of extension directories.
//!
//! An archive holds the extension files relative to its root, with the
//! manifest at [`MANIFEST_FILENAME`].

use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use ext_core::{CancellationToken, MANIFEST_FILENAME, Manifest};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Pack every file under `dir` into `archive`.
///
/// Entries are added in sorted order so the same tree always produces the
/// same entry list.
pub fn pack_directory(dir: &Path, archive: &Path) -> Result<()> {
    if let Some(parent) = archive.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let file = File::create(archive).map_err(|e| Error::io(archive, e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    for relative in files_under(dir)? {
        builder
            .append_path_with_name(dir.join(&relative), &relative)
            .map_err(|e| Error::archive(archive, e))?;
    }

    let encoder = builder.into_inner().map_err(|e| Error::archive(archive, e))?;
    encoder.finish().map_err(|e| Error::io(archive, e))?;
    debug!("Packed {} into {}", dir.display(), archive.display());
    Ok(())
}

/// Unpack `archive` into `dest`, checking `token` before every entry.
///
/// Entries that would land outside `dest` are skipped.
pub fn unpack(archive: &Path, dest: &Path, token: &CancellationToken) -> Result<()> {
    let file = File::open(archive).map_err(|e| Error::io(archive, e))?;
    let mut reader = tar::Archive::new(GzDecoder::new(file));
    fs::create_dir_all(dest).map_err(|e| Error::io(dest, e))?;

    let entries = reader.entries().map_err(|e| Error::archive(archive, e))?;
    for entry in entries {
        if token.is_cancelled() {
            return Err(Error::Cancelled(dest.to_path_buf()));
        }
        let mut entry = entry.map_err(|e| Error::archive(archive, e))?;
        let unpacked = entry.unpack_in(dest).map_err(|e| Error::archive(archive, e))?;
        if !unpacked {
            let name = entry
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            warn!("Skipped entry '{}' escaping {}", name, dest.display());
        }
    }
    Ok(())
}

/// Read the manifest at the root of `archive` without unpacking it.
pub fn read_manifest(archive: &Path) -> Result<Manifest> {
    let file = File::open(archive).map_err(|e| Error::io(archive, e))?;
    let mut reader = tar::Archive::new(GzDecoder::new(file));

    let entries = reader.entries().map_err(|e| Error::archive(archive, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| Error::archive(archive, e))?;
        let path = entry
            .path()
            .map_err(|e| Error::archive(archive, e))?
            .into_owned();
        if !is_manifest(&path) {
            continue;
        }
        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .map_err(|e| Error::archive(archive, e))?;
        return Manifest::from_toml(&content).map_err(|e| Error::Manifest {
            path: archive.to_path_buf(),
            reason: e.to_string(),
        });
    }

    Err(Error::archive(
        archive,
        format!("no {MANIFEST_FILENAME} at the archive root"),
    ))
}

fn is_manifest(path: &Path) -> bool {
    let normal: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    normal == Path::new(MANIFEST_FILENAME)
}

/// Relative paths of all files below `root`, sorted. Symbolic links are
/// left out since they may point outside the extension.
fn files_under(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];
    while let Some(relative) = pending.pop() {
        let dir = root.join(&relative);
        for entry in fs::read_dir(&dir).map_err(|e| Error::io(&dir, e))? {
            let entry = entry.map_err(|e| Error::io(&dir, e))?;
            let file_type = entry.file_type().map_err(|e| Error::io(entry.path(), e))?;
            let child = relative.join(entry.file_name());
            if file_type.is_dir() {
                pending.push(child);
            } else if file_type.is_file() {
                files.push(child);
            } else if file_type.is_symlink() {
                warn!("Not archiving symbolic link {}", entry.path().display());
            }
        }
    }
    files.sort();
    Ok(files)
}
