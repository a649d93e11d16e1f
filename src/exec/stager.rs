//! Script package staging.
//!
//! A package is a tar (optionally gzip-compressed) whose root holds a `main`
//! entry point. Each invocation extracts into its own directory next to the
//! package, named by a nanosecond timestamp. Staging directories are never
//! reused and never removed here.

use flate2::read::GzDecoder;
use log::{debug, warn};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tar::{Archive, EntryType};
use thiserror::Error;

/// File name of the entry point inside a staged package
pub const ENTRY_POINT: &str = "main";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const USTAR_MAGIC: &[u8] = b"ustar";
const USTAR_OFFSET: usize = 257;
const HEADER_LEN: usize = 512;
const MAX_NAME_ATTEMPTS: u32 = 64;

#[derive(Error, Debug)]
pub enum StageError {
    /// Package missing, not a regular file, or not an archive; nothing was extracted
    #[error("{path}: {reason}")]
    Unrecognized { path: PathBuf, reason: String },

    /// Extraction ran but the entry point is absent
    #[error("script files must contain main file {source}")]
    MissingEntryPoint {
        staging_dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create staging directory under {parent}: {source}")]
    StagingDir {
        parent: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Recognized archive encodings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackageFormat {
    Tar,
    GzipTar,
}

/// A package extracted and ready to run
#[derive(Clone, Debug)]
pub struct StagedPackage {
    pub staging_dir: PathBuf,
    /// Absolute path of `<staging_dir>/main`
    pub entry_point: PathBuf,
    pub format: PackageFormat,
    /// Entries refused during extraction (traversal, links, devices)
    pub skipped_entries: usize,
}

/// Check presence and archive signature without side effects
pub fn detect_format(package: &Path) -> Result<PackageFormat, StageError> {
    let unrecognized = |reason: String| StageError::Unrecognized {
        path: package.to_path_buf(),
        reason,
    };

    let meta = fs::metadata(package).map_err(|e| unrecognized(e.to_string()))?;
    if !meta.is_file() {
        return Err(unrecognized("not a regular file".to_string()));
    }

    let mut header = Vec::with_capacity(HEADER_LEN);
    File::open(package)
        .and_then(|f| f.take(HEADER_LEN as u64).read_to_end(&mut header))
        .map_err(|e| unrecognized(e.to_string()))?;

    if header.starts_with(&GZIP_MAGIC) {
        return Ok(PackageFormat::GzipTar);
    }
    if header.len() >= USTAR_OFFSET + USTAR_MAGIC.len()
        && &header[USTAR_OFFSET..USTAR_OFFSET + USTAR_MAGIC.len()] == USTAR_MAGIC
    {
        return Ok(PackageFormat::Tar);
    }

    Err(unrecognized("not a tar or gzip tar archive".to_string()))
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

/// Create `<parent>/<nanos>` exclusively, re-sampling on collision
pub fn create_staging_dir(parent: &Path) -> Result<PathBuf, StageError> {
    let mut stamp = now_nanos();
    let mut last_err = None;

    for _ in 0..MAX_NAME_ATTEMPTS {
        let candidate = parent.join(stamp.to_string());
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                stamp = now_nanos().max(stamp + 1);
                last_err = Some(e);
            }
            Err(e) => {
                return Err(StageError::StagingDir {
                    parent: parent.to_path_buf(),
                    source: e,
                })
            }
        }
    }

    Err(StageError::StagingDir {
        parent: parent.to_path_buf(),
        source: last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::AlreadyExists, "name exhausted")),
    })
}

fn is_safe_entry_type(entry_type: EntryType) -> bool {
    matches!(
        entry_type,
        EntryType::Regular
            | EntryType::Continuous
            | EntryType::Directory
            | EntryType::GNULongName
            | EntryType::XHeader
            | EntryType::XGlobalHeader
    )
}

fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Unpack every acceptable entry; returns the number of refused entries.
/// Read errors stop extraction and are logged; the entry point check decides.
fn extract<R: Read>(archive: &mut Archive<R>, dest: &Path) -> usize {
    let mut skipped = 0usize;

    let entries = match archive.entries() {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to read package entries: {}", e);
            return skipped;
        }
    };

    for entry in entries {
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Package extraction stopped: {}", e);
                break;
            }
        };

        let path = match entry.path() {
            Ok(path) => path.into_owned(),
            Err(e) => {
                warn!("Skipping entry with unreadable path: {}", e);
                skipped += 1;
                continue;
            }
        };

        let entry_type = entry.header().entry_type();
        if !is_safe_entry_type(entry_type) || !is_contained(&path) {
            warn!(
                "Skipping package entry {} ({:?})",
                path.display(),
                entry_type
            );
            skipped += 1;
            continue;
        }

        match entry.unpack_in(dest) {
            Ok(true) => debug!("Unpacked {}", path.display()),
            Ok(false) => skipped += 1,
            Err(e) => {
                warn!("Failed to unpack {}: {}", path.display(), e);
                skipped += 1;
            }
        }
    }

    skipped
}

/// Validate, extract, and locate the entry point of `package`
pub fn stage_package(package: &Path) -> Result<StagedPackage, StageError> {
    let format = detect_format(package)?;

    // Absolute so the entry point resolves the same inside the target's mount
    // namespace. Only the directory is resolved: a symlinked package still
    // stages next to the link.
    let unrecognized = |reason: String| StageError::Unrecognized {
        path: package.to_path_buf(),
        reason,
    };
    let file_name = package
        .file_name()
        .ok_or_else(|| unrecognized("no file name".to_string()))?;
    let parent = match package.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let parent = fs::canonicalize(parent).map_err(|e| unrecognized(e.to_string()))?;
    let package = parent.join(file_name);
    let staging_dir = create_staging_dir(&parent)?;

    let skipped_entries = match File::open(&package) {
        Ok(file) => match format {
            PackageFormat::Tar => extract(&mut Archive::new(file), &staging_dir),
            PackageFormat::GzipTar => {
                extract(&mut Archive::new(GzDecoder::new(file)), &staging_dir)
            }
        },
        Err(e) => {
            warn!("Failed to open package {}: {}", package.display(), e);
            0
        }
    };

    let entry_point = staging_dir.join(ENTRY_POINT);
    match fs::symlink_metadata(&entry_point) {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            return Err(StageError::MissingEntryPoint {
                staging_dir,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{}: not a regular file", entry_point.display()),
                ),
            })
        }
        Err(e) => {
            return Err(StageError::MissingEntryPoint {
                staging_dir,
                source: io::Error::new(e.kind(), format!("stat {}: {}", entry_point.display(), e)),
            })
        }
    }

    Ok(StagedPackage {
        staging_dir,
        entry_point,
        format,
        skipped_entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_ustar();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(EntryType::Regular);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn write_package(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn stages_plain_tar_next_to_package() {
        let dir = TempDir::new().unwrap();
        let pkg = write_package(&dir, "pkg.tar", &tar_bytes(&[("main", b"#!/bin/sh\necho hi\n")]));

        let staged = stage_package(&pkg).unwrap();
        assert_eq!(staged.format, PackageFormat::Tar);
        assert_eq!(
            staged.staging_dir.parent(),
            Some(fs::canonicalize(dir.path()).unwrap().as_path())
        );
        assert!(staged.entry_point.is_absolute());
        assert_eq!(
            fs::read_to_string(&staged.entry_point).unwrap(),
            "#!/bin/sh\necho hi\n"
        );
    }

    #[test]
    fn symlinked_package_stages_next_to_link() {
        let store = TempDir::new().unwrap();
        let target = write_package(&store, "pkg.tar", &tar_bytes(&[("main", b"x")]));
        let links = TempDir::new().unwrap();
        let link = links.path().join("pkg.tar");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let staged = stage_package(&link).unwrap();
        assert_eq!(
            staged.staging_dir.parent(),
            Some(fs::canonicalize(links.path()).unwrap().as_path())
        );
        let store_entries: Vec<_> = fs::read_dir(store.path()).unwrap().collect();
        assert_eq!(store_entries.len(), 1);
    }

    #[test]
    fn stages_gzip_tar() {
        let dir = TempDir::new().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        std::io::Write::write_all(&mut encoder, &tar_bytes(&[("main", b"x")])).unwrap();
        let pkg = write_package(&dir, "pkg.tgz", &encoder.finish().unwrap());

        let staged = stage_package(&pkg).unwrap();
        assert_eq!(staged.format, PackageFormat::GzipTar);
        assert!(staged.entry_point.exists());
    }

    #[test]
    fn missing_main_reports_fs_error() {
        let dir = TempDir::new().unwrap();
        let pkg = write_package(&dir, "pkg.tar", &tar_bytes(&[("helper.sh", b"x")]));

        let err = stage_package(&pkg).unwrap_err();
        match &err {
            StageError::MissingEntryPoint { staging_dir, source } => {
                assert!(staging_dir.join("helper.sh").exists());
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("script files must contain main file"));
    }

    #[test]
    fn unrecognized_package_is_not_extracted() {
        let dir = TempDir::new().unwrap();
        let pkg = write_package(&dir, "pkg.tar", b"definitely not an archive");

        let err = stage_package(&pkg).unwrap_err();
        assert!(matches!(err, StageError::Unrecognized { .. }));
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "no staging directory may be created");
    }

    #[test]
    fn missing_package_is_unrecognized() {
        let err = detect_format(Path::new("/nonexistent/pkg.tar")).unwrap_err();
        assert!(matches!(err, StageError::Unrecognized { .. }));
    }

    #[test]
    fn directory_package_is_unrecognized() {
        let dir = TempDir::new().unwrap();
        assert!(detect_format(dir.path()).is_err());
    }

    #[test]
    fn symlinked_main_is_refused() {
        let dir = TempDir::new().unwrap();
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_ustar();
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        builder
            .append_link(&mut header, "main", "/etc/passwd")
            .unwrap();
        let pkg = write_package(&dir, "pkg.tar", &builder.into_inner().unwrap());

        let err = stage_package(&pkg).unwrap_err();
        assert!(matches!(err, StageError::MissingEntryPoint { .. }));
    }

    #[test]
    fn staging_dirs_are_never_reused() {
        let dir = TempDir::new().unwrap();
        let first = create_staging_dir(dir.path()).unwrap();
        let second = create_staging_dir(dir.path()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn traversal_paths_are_not_contained() {
        assert!(is_contained(Path::new("main")));
        assert!(is_contained(Path::new("./lib/util.sh")));
        assert!(!is_contained(Path::new("../main")));
        assert!(!is_contained(Path::new("/etc/main")));
    }
}
