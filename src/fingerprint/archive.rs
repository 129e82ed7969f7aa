//! Archive content hashing.
//!
//! An archive's fingerprint is a BLAKE3 hash over its *contents*, not its
//! bytes: entries are read, sorted by name, and each contributes its name,
//! decompressed size and the BLAKE3 hash of its decompressed data. Container
//! metadata (timestamps, compression level, entry order, the archive's own
//! filename) therefore never affects the result.
//!
//! Supported entry readers: ZIP, TAR, TAR.GZ/TGZ. A plain `.gz` file hashes
//! its decompressed stream. Other containers (`.7z`, `.rar`, `.bz2`, `.xz`,
//! `.zst`) fall back to hashing the raw file bytes.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;

use super::ExtractionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    Gz,
    Opaque,
}

impl ArchiveKind {
    fn detect(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.ends_with(".zip") {
            Self::Zip
        } else if name.ends_with(".tar") {
            Self::Tar
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Self::TarGz
        } else if name.ends_with(".gz") {
            Self::Gz
        } else {
            Self::Opaque
        }
    }
}

/// One normalized archive member.
struct Member {
    name: String,
    size: u64,
    hash: blake3::Hash,
}

/// Compute the normalized content hash of an archive.
///
/// # Errors
///
/// [`ExtractionError::Unreadable`] when the file cannot be opened,
/// [`ExtractionError::Unsupported`] when the container cannot be parsed.
pub fn archive_hash(path: &Path) -> Result<[u8; 32], ExtractionError> {
    let file = File::open(path).map_err(|e| ExtractionError::from_io(path, &e))?;
    let kind = ArchiveKind::detect(path);
    log::trace!("Hashing {} as {:?}", path.display(), kind);

    let hash = match kind {
        ArchiveKind::Zip => combine(zip_members(file, path)?),
        ArchiveKind::Tar => combine(tar_members(BufReader::new(file), path)?),
        ArchiveKind::TarGz => combine(tar_members(GzDecoder::new(BufReader::new(file)), path)?),
        ArchiveKind::Gz => {
            let (_, hash) = hash_stream(GzDecoder::new(BufReader::new(file)))
                .map_err(|e| content_error(path, &e))?;
            hash
        }
        ArchiveKind::Opaque => {
            drop(file);
            let mut hasher = blake3::Hasher::new();
            hasher
                .update_mmap_rayon(path)
                .map_err(|e| ExtractionError::from_io(path, &e))?;
            hasher.finalize()
        }
    };
    Ok(*hash.as_bytes())
}

/// Errors after the file was opened mean the container itself is bad,
/// unless the OS refused access.
fn content_error(path: &Path, error: &io::Error) -> ExtractionError {
    match error.kind() {
        io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound => {
            ExtractionError::unreadable(path, error)
        }
        _ => ExtractionError::unsupported(path, error),
    }
}

fn hash_stream<R: Read>(mut reader: R) -> io::Result<(u64, blake3::Hash)> {
    let mut hasher = blake3::Hasher::new();
    let size = io::copy(&mut reader, &mut hasher)?;
    Ok((size, hasher.finalize()))
}

fn zip_members(file: File, path: &Path) -> Result<Vec<Member>, ExtractionError> {
    let mut archive =
        zip::ZipArchive::new(BufReader::new(file)).map_err(|e| ExtractionError::unsupported(path, e))?;
    let mut members = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| ExtractionError::unsupported(path, e))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let (size, hash) = hash_stream(entry).map_err(|e| content_error(path, &e))?;
        members.push(Member { name, size, hash });
    }
    Ok(members)
}

fn tar_members<R: Read>(reader: R, path: &Path) -> Result<Vec<Member>, ExtractionError> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive.entries().map_err(|e| content_error(path, &e))?;
    let mut members = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| content_error(path, &e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map_err(|e| content_error(path, &e))?
            .to_string_lossy()
            .into_owned();
        let (size, hash) = hash_stream(entry).map_err(|e| content_error(path, &e))?;
        members.push(Member { name, size, hash });
    }
    Ok(members)
}

fn combine(mut members: Vec<Member>) -> blake3::Hash {
    members.sort_by(|a, b| a.name.cmp(&b.name).then(a.hash.as_bytes().cmp(b.hash.as_bytes())));
    let mut hasher = blake3::Hasher::new();
    for member in &members {
        hasher.update(member.name.as_bytes());
        hasher.update(&[0]);
        hasher.update(&member.size.to_le_bytes());
        hasher.update(member.hash.as_bytes());
    }
    hasher.finalize()
}
