//! Safe archive extraction.
//!
//! Every entry's destination is validated against the install directory
//! before anything is written: `..` traversal, absolute paths, drive
//! prefixes, symlinks pointing outside, and unexpected entry types all
//! abort the install with `unsafe-archive`.

use std::path::{Component as PathComponent, Path, PathBuf};

use tracing::debug;

use crate::error::{Result, SubGenError};

/// Extract a downloaded archive into `dest`, dispatching on the URL's
/// extension (the temp file itself has a random name).
pub fn extract_archive(archive: &Path, url: &str, dest: &Path) -> Result<()> {
    if url.ends_with(".zip") {
        extract_zip(archive, dest)
    } else if url.ends_with(".tar.gz") || url.ends_with(".tgz") {
        let file = std::fs::File::open(archive).map_err(|e| SubGenError::io(archive, e))?;
        extract_tar(tar::Archive::new(flate2::read::GzDecoder::new(file)), dest)
    } else if url.ends_with(".tar.xz") {
        let file = std::fs::File::open(archive).map_err(|e| SubGenError::io(archive, e))?;
        extract_tar(tar::Archive::new(xz2::read::XzDecoder::new(file)), dest)
    } else {
        Err(SubGenError::BadInput(format!(
            "unrecognized archive format: {}",
            url
        )))
    }
}

/// Normalize an archive entry name into a relative path under `dest`, or
/// reject it.
fn safe_entry_path(dest: &Path, entry_name: &str) -> Result<PathBuf> {
    let entry_path = Path::new(entry_name);
    let mut normalized = PathBuf::new();
    for component in entry_path.components() {
        match component {
            PathComponent::Normal(part) => normalized.push(part),
            // "./" segments are harmless noise.
            PathComponent::CurDir => {}
            PathComponent::ParentDir | PathComponent::RootDir | PathComponent::Prefix(_) => {
                return Err(SubGenError::UnsafeArchive {
                    entry: entry_name.to_string(),
                })
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(SubGenError::UnsafeArchive {
            entry: entry_name.to_string(),
        });
    }
    Ok(dest.join(normalized))
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive).map_err(|e| SubGenError::io(archive, e))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| SubGenError::Media(format!("unreadable zip archive: {}", e)))?;

    // Validate every entry before materializing any of them.
    let mut targets = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let entry = zip
            .by_index(i)
            .map_err(|e| SubGenError::Media(format!("unreadable zip entry: {}", e)))?;
        targets.push(safe_entry_path(dest, entry.name())?);
    }

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| SubGenError::Media(format!("unreadable zip entry: {}", e)))?;
        let target = &targets[i];
        if entry.is_dir() {
            std::fs::create_dir_all(target).map_err(|e| SubGenError::io(target, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SubGenError::io(parent, e))?;
        }
        let mut out = std::fs::File::create(target).map_err(|e| SubGenError::io(target, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| SubGenError::io(target, e))?;
    }
    debug!("extracted {} zip entries to {}", zip.len(), dest.display());
    Ok(())
}

fn extract_tar<R: std::io::Read>(mut archive: tar::Archive<R>, dest: &Path) -> Result<()> {
    let entries = archive
        .entries()
        .map_err(|e| SubGenError::Media(format!("unreadable tar archive: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| SubGenError::Media(format!("unreadable tar entry: {}", e)))?;
        let name = entry
            .path()
            .map_err(|e| SubGenError::Media(format!("unreadable tar entry name: {}", e)))?
            .to_string_lossy()
            .into_owned();
        let target = safe_entry_path(dest, &name)?;

        let entry_type = entry.header().entry_type();
        match entry_type {
            tar::EntryType::Directory => {
                std::fs::create_dir_all(&target).map_err(|e| SubGenError::io(&target, e))?;
            }
            tar::EntryType::Regular => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| SubGenError::io(parent, e))?;
                }
                let mut out =
                    std::fs::File::create(&target).map_err(|e| SubGenError::io(&target, e))?;
                std::io::copy(&mut entry, &mut out).map_err(|e| SubGenError::io(&target, e))?;
                #[cfg(unix)]
                if let Ok(mode) = entry.header().mode() {
                    use std::os::unix::fs::PermissionsExt;
                    let _ = std::fs::set_permissions(
                        &target,
                        std::fs::Permissions::from_mode(mode),
                    );
                }
            }
            tar::EntryType::Symlink | tar::EntryType::Link => {
                // A link target that leaves the install directory is an
                // escape vector; anything else we simply do not need.
                let link = entry
                    .link_name()
                    .ok()
                    .flatten()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let resolved = safe_entry_path(
                    target.parent().unwrap_or(dest),
                    &link,
                );
                if resolved.is_err() {
                    return Err(SubGenError::UnsafeArchive { entry: name });
                }
                #[cfg(unix)]
                {
                    let resolved_target = target
                        .parent()
                        .unwrap_or(dest)
                        .join(&link);
                    let _ = std::os::unix::fs::symlink(&resolved_target, &target);
                }
            }
            _ => {
                // Devices, FIFOs, and friends have no business in a
                // component archive.
                return Err(SubGenError::UnsafeArchive { entry: name });
            }
        }
    }
    Ok(())
}

/// Make every file matching the executable name runnable after extraction.
pub fn mark_executables(dir: &Path, executable: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with(executable) {
                let metadata = entry
                    .metadata()
                    .map_err(|e| SubGenError::Media(format!("stat failed: {}", e)))?;
                let mut permissions = metadata.permissions();
                permissions.set_mode(permissions.mode() | 0o755);
                std::fs::set_permissions(entry.path(), permissions)
                    .map_err(|e| SubGenError::io(entry.path(), e))?;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (dir, executable);
    }
    Ok(())
}
