//! Uniform read access to release archives
//!
//! GitHub release assets arrive as tarballs (optionally gzip/bzip2
//! compressed), zips, bare compressed streams, or raw binaries. This module
//! classifies files by magic bytes and exposes one read interface over the
//! tar and zip cases: list file members, look members up by prefix, suffix
//! or basename, read their permission bits, and extract them without ever
//! following a member outside the extraction root.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::{ArchiveError, Result};

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b, 0x08];
const BZIP2_MAGIC: &[u8] = &[0x42, 0x5a, 0x68];
const ZIP_MAGIC: &[u8] = &[0x50, 0x4b, 0x03, 0x04];

/// Bare single-stream compression formats (not archives)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressedKind {
    Gzip,
    Bzip2,
}

impl CompressedKind {
    /// Format name used in log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressedKind::Gzip => "gz",
            CompressedKind::Bzip2 => "bz2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TarCompression {
    None,
    Gzip,
    Bzip2,
}

/// Read interface shared by the two archive kinds
trait ArchiveReader {
    fn file_members(&self) -> Result<Vec<String>>;
    fn member_mode(&self, member: &str) -> Result<u32>;
    fn extract(&self, member: &str, dir: &Path) -> Result<()>;
    fn extract_all(&self, dir: &Path) -> Result<()>;
}

/// An archive opened for inspection and extraction
pub struct Archive {
    inner: Box<dyn ArchiveReader>,
}

impl Archive {
    /// Open an archive, dispatching on file magic
    ///
    /// Fails with [`ArchiveError::Unsupported`] when the file is neither a
    /// tar (plain or gzip/bzip2 compressed) nor a zip.
    pub fn open(path: &Path) -> Result<Self> {
        match classify(path)? {
            Some(Classified::Zip) => Ok(Self {
                inner: Box::new(ZipArchiveFile {
                    path: path.to_path_buf(),
                }),
            }),
            Some(Classified::Tar(compression)) => Ok(Self {
                inner: Box::new(TarArchiveFile {
                    path: path.to_path_buf(),
                    compression,
                }),
            }),
            None => Err(ArchiveError::Unsupported {
                path: path.display().to_string(),
            }
            .into()),
        }
    }

    /// Whether the file would open as an archive
    pub fn is_archive(path: &Path) -> bool {
        matches!(classify(path), Ok(Some(_)))
    }

    /// Names of regular-file entries (directories excluded)
    pub fn file_members(&self) -> Result<Vec<String>> {
        self.inner.file_members()
    }

    /// File members whose name starts with `prefix`
    pub fn names_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .file_members()?
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .collect())
    }

    /// File members whose name ends with `suffix`
    pub fn names_by_suffix(&self, suffix: &str) -> Result<Vec<String>> {
        Ok(self
            .file_members()?
            .into_iter()
            .filter(|name| name.ends_with(suffix))
            .collect())
    }

    /// File members whose basename equals `filename`
    ///
    /// Matches `dir/filename` members anywhere in the tree, plus a root
    /// entry named exactly `filename`.
    pub fn names_by_filename(&self, filename: &str) -> Result<Vec<String>> {
        let mut matches = self.names_by_suffix(&format!("/{}", filename))?;
        if self.file_members()?.iter().any(|name| name == filename) {
            matches.push(filename.to_string());
        }
        Ok(matches)
    }

    /// Unix mode bits of a member
    pub fn member_mode(&self, member: &str) -> Result<u32> {
        self.inner.member_mode(member)
    }

    /// Extract a single member under `dir`, preserving its relative path
    pub fn extract(&self, member: &str, dir: &Path) -> Result<()> {
        self.inner.extract(member, dir)
    }

    /// Extract the whole archive under `dir`
    pub fn extract_all(&self, dir: &Path) -> Result<()> {
        self.inner.extract_all(dir)
    }
}

enum Classified {
    Tar(TarCompression),
    Zip,
}

fn classify(path: &Path) -> Result<Option<Classified>> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 4];
    let read = file.read(&mut magic)?;
    let magic = &magic[..read];

    if magic.starts_with(ZIP_MAGIC) {
        return Ok(Some(Classified::Zip));
    }
    if magic.starts_with(GZIP_MAGIC) {
        file.seek(SeekFrom::Start(0))?;
        let decoder = flate2::read::GzDecoder::new(file);
        if looks_like_tar(decoder) {
            return Ok(Some(Classified::Tar(TarCompression::Gzip)));
        }
        return Ok(None);
    }
    if magic.starts_with(BZIP2_MAGIC) {
        file.seek(SeekFrom::Start(0))?;
        let decoder = bzip2::read::BzDecoder::new(file);
        if looks_like_tar(decoder) {
            return Ok(Some(Classified::Tar(TarCompression::Bzip2)));
        }
        return Ok(None);
    }

    file.seek(SeekFrom::Start(0))?;
    if looks_like_tar(file) {
        return Ok(Some(Classified::Tar(TarCompression::None)));
    }
    Ok(None)
}

/// Check the ustar magic in the first tar header block
fn looks_like_tar<R: Read>(mut reader: R) -> bool {
    let mut block = [0u8; 512];
    let mut filled = 0;
    while filled < block.len() {
        match reader.read(&mut block[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => return false,
        }
    }
    // "ustar" covers both the POSIX ("ustar\0") and GNU ("ustar ") flavors
    filled == block.len() && &block[257..262] == b"ustar"
}

/// Detect a bare compressed stream (not an archive) by magic
pub fn compressed_kind(path: &Path) -> Result<Option<CompressedKind>> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 4];
    let read = file.read(&mut magic)?;
    let magic = &magic[..read];

    if magic.starts_with(GZIP_MAGIC) {
        Ok(Some(CompressedKind::Gzip))
    } else if magic.starts_with(BZIP2_MAGIC) {
        Ok(Some(CompressedKind::Bzip2))
    } else {
        Ok(None)
    }
}

/// Decompress a bare gzip/bzip2 stream into `target`
pub fn decompress(kind: CompressedKind, path: &Path, target: &Path) -> Result<()> {
    let file = File::open(path)?;
    let mut output = File::create(target)?;
    match kind {
        CompressedKind::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(file);
            io::copy(&mut decoder, &mut output)?;
        }
        CompressedKind::Bzip2 => {
            let mut decoder = bzip2::read::BzDecoder::new(file);
            io::copy(&mut decoder, &mut output)?;
        }
    }
    Ok(())
}

struct TarArchiveFile {
    path: PathBuf,
    compression: TarCompression,
}

impl TarArchiveFile {
    fn reader(&self) -> Result<tar::Archive<Box<dyn Read>>> {
        let file = File::open(&self.path)?;
        let reader: Box<dyn Read> = match self.compression {
            TarCompression::None => Box::new(file),
            TarCompression::Gzip => Box::new(flate2::read::GzDecoder::new(file)),
            TarCompression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(file)),
        };
        Ok(tar::Archive::new(reader))
    }
}

impl ArchiveReader for TarArchiveFile {
    fn file_members(&self) -> Result<Vec<String>> {
        let mut archive = self.reader()?;
        let mut members = Vec::new();
        for entry in archive.entries().map_err(malformed)? {
            let entry = entry.map_err(malformed)?;
            if entry.header().entry_type().is_file() {
                let path = entry.path().map_err(malformed)?;
                members.push(path.to_string_lossy().into_owned());
            }
        }
        Ok(members)
    }

    fn member_mode(&self, member: &str) -> Result<u32> {
        let mut archive = self.reader()?;
        for entry in archive.entries().map_err(malformed)? {
            let entry = entry.map_err(malformed)?;
            let path = entry.path().map_err(malformed)?;
            if path.to_string_lossy() == member {
                return entry.header().mode().map_err(malformed);
            }
        }
        Err(ArchiveError::MissingMember {
            name: member.to_string(),
        }
        .into())
    }

    fn extract(&self, member: &str, dir: &Path) -> Result<()> {
        let mut archive = self.reader()?;
        for entry in archive.entries().map_err(malformed)? {
            let mut entry = entry.map_err(malformed)?;
            let path = entry.path().map_err(malformed)?;
            if path.to_string_lossy() == member {
                // unpack_in refuses entries that would land outside dir
                let unpacked = entry.unpack_in(dir).map_err(malformed)?;
                if !unpacked {
                    return Err(ArchiveError::UnsafeMember {
                        name: member.to_string(),
                    }
                    .into());
                }
                return Ok(());
            }
        }
        Err(ArchiveError::MissingMember {
            name: member.to_string(),
        }
        .into())
    }

    fn extract_all(&self, dir: &Path) -> Result<()> {
        let mut archive = self.reader()?;
        for entry in archive.entries().map_err(malformed)? {
            let mut entry = entry.map_err(malformed)?;
            let name = entry
                .path()
                .map_err(malformed)?
                .to_string_lossy()
                .into_owned();
            if !entry.unpack_in(dir).map_err(malformed)? {
                debug!("skipping unsafe archive member: {}", name);
            }
        }
        Ok(())
    }
}

struct ZipArchiveFile {
    path: PathBuf,
}

impl ZipArchiveFile {
    fn reader(&self) -> Result<zip::ZipArchive<File>> {
        let file = File::open(&self.path)?;
        zip::ZipArchive::new(file).map_err(|e| {
            ArchiveError::Malformed {
                message: e.to_string(),
            }
            .into()
        })
    }
}

impl ArchiveReader for ZipArchiveFile {
    fn file_members(&self) -> Result<Vec<String>> {
        let mut archive = self.reader()?;
        let mut members = Vec::new();
        for index in 0..archive.len() {
            let entry = archive.by_index(index).map_err(|e| ArchiveError::Malformed {
                message: e.to_string(),
            })?;
            if !entry.is_dir() {
                members.push(entry.name().to_string());
            }
        }
        Ok(members)
    }

    fn member_mode(&self, member: &str) -> Result<u32> {
        let mut archive = self.reader()?;
        let entry = archive
            .by_name(member)
            .map_err(|_| ArchiveError::MissingMember {
                name: member.to_string(),
            })?;
        // the high 16 bits of the external attributes hold the unix mode
        Ok(entry.unix_mode().unwrap_or(0))
    }

    fn extract(&self, member: &str, dir: &Path) -> Result<()> {
        let mut archive = self.reader()?;
        let mut entry = archive
            .by_name(member)
            .map_err(|_| ArchiveError::MissingMember {
                name: member.to_string(),
            })?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ArchiveError::UnsafeMember {
                name: member.to_string(),
            })?;
        let target = dir.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut output = File::create(&target)?;
        io::copy(&mut entry, &mut output)?;
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))?;
        }
        Ok(())
    }

    fn extract_all(&self, dir: &Path) -> Result<()> {
        let mut archive = self.reader()?;
        // ZipArchive::extract sanitizes member paths and restores unix modes
        archive.extract(dir).map_err(|e| {
            ArchiveError::Malformed {
                message: e.to_string(),
            }
            .into()
        })
    }
}

fn malformed(e: io::Error) -> crate::errors::NanolayerError {
    ArchiveError::Malformed {
        message: e.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_tar_gz(dir: &Path, entries: &[(&str, &[u8], u32)]) -> PathBuf {
        let path = dir.join("fixture.tar.gz");
        let file = File::create(&path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data, mode) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder.append_data(&mut header, *name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    fn write_zip(dir: &Path, entries: &[(&str, &[u8], u32)]) -> PathBuf {
        let path = dir.join("fixture.zip");
        let file = File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, data, mode) in entries {
            let options = zip::write::SimpleFileOptions::default().unix_permissions(*mode);
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_tar_gz_members_and_modes() {
        let tmp = TempDir::new().unwrap();
        let path = write_tar_gz(
            tmp.path(),
            &[
                ("tool/tool", b"#!/bin/sh\n", 0o755),
                ("tool/README.md", b"docs", 0o644),
            ],
        );

        let archive = Archive::open(&path).unwrap();
        let members = archive.file_members().unwrap();
        assert_eq!(members, vec!["tool/tool", "tool/README.md"]);
        assert_eq!(archive.member_mode("tool/tool").unwrap() & 0o111, 0o111);
        assert_eq!(archive.member_mode("tool/README.md").unwrap() & 0o111, 0);
    }

    #[test]
    fn test_zip_members_and_modes() {
        let tmp = TempDir::new().unwrap();
        let path = write_zip(
            tmp.path(),
            &[("kubectx", b"binary", 0o755), ("LICENSE", b"mit", 0o644)],
        );

        let archive = Archive::open(&path).unwrap();
        let members = archive.file_members().unwrap();
        assert_eq!(members, vec!["kubectx", "LICENSE"]);
        assert_eq!(archive.member_mode("kubectx").unwrap() & 0o111, 0o111);
    }

    #[test]
    fn test_names_by_filename() {
        let tmp = TempDir::new().unwrap();
        let path = write_tar_gz(
            tmp.path(),
            &[
                ("btop/bin/btop", b"bin", 0o755),
                ("btop/themes/btop.theme", b"theme", 0o644),
                ("btop", b"root entry", 0o755),
            ],
        );

        let archive = Archive::open(&path).unwrap();
        let matches = archive.names_by_filename("btop").unwrap();
        assert_eq!(matches, vec!["btop/bin/btop", "btop"]);
    }

    #[test]
    fn test_names_by_prefix_and_suffix() {
        let tmp = TempDir::new().unwrap();
        let path = write_zip(
            tmp.path(),
            &[
                ("pkg/bin/a", b"a", 0o755),
                ("pkg/share/doc.txt", b"d", 0o644),
            ],
        );

        let archive = Archive::open(&path).unwrap();
        assert_eq!(
            archive.names_by_prefix("pkg/bin").unwrap(),
            vec!["pkg/bin/a"]
        );
        assert_eq!(
            archive.names_by_suffix(".txt").unwrap(),
            vec!["pkg/share/doc.txt"]
        );
    }

    #[test]
    fn test_extract_member_preserves_relative_path() {
        let tmp = TempDir::new().unwrap();
        let path = write_tar_gz(tmp.path(), &[("dir/tool", b"payload", 0o755)]);
        let out = TempDir::new().unwrap();

        let archive = Archive::open(&path).unwrap();
        archive.extract("dir/tool", out.path()).unwrap();
        assert_eq!(
            std::fs::read(out.path().join("dir/tool")).unwrap(),
            b"payload"
        );
    }

    #[test]
    fn test_extract_all() {
        let tmp = TempDir::new().unwrap();
        let path = write_zip(
            tmp.path(),
            &[("a/one", b"1", 0o644), ("b/two", b"2", 0o644)],
        );
        let out = TempDir::new().unwrap();

        let archive = Archive::open(&path).unwrap();
        archive.extract_all(out.path()).unwrap();
        assert!(out.path().join("a/one").exists());
        assert!(out.path().join("b/two").exists());
    }

    #[test]
    fn test_raw_binary_is_not_an_archive() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("binary");
        std::fs::write(&path, b"\x7fELF some binary bytes").unwrap();

        assert!(!Archive::is_archive(&path));
        assert!(Archive::open(&path).is_err());
        assert_eq!(compressed_kind(&path).unwrap(), None);
    }

    #[test]
    fn test_gzip_of_non_tar_is_a_compressed_stream() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tool.gz");
        let file = File::create(&path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(b"just a binary, not a tarball").unwrap();
        encoder.finish().unwrap();

        assert!(!Archive::is_archive(&path));
        assert_eq!(
            compressed_kind(&path).unwrap(),
            Some(CompressedKind::Gzip)
        );

        let target = tmp.path().join("tool");
        decompress(CompressedKind::Gzip, &path, &target).unwrap();
        assert_eq!(
            std::fs::read(&target).unwrap(),
            b"just a binary, not a tarball"
        );
    }

    #[test]
    fn test_plain_tar_detected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fixture.tar");
        let file = File::create(&path).unwrap();
        let mut builder = tar::Builder::new(file);
        let mut header = tar::Header::new_gnu();
        header.set_size(4);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "file", &b"data"[..]).unwrap();
        builder.into_inner().unwrap();

        let archive = Archive::open(&path).unwrap();
        assert_eq!(archive.file_members().unwrap(), vec!["file"]);
    }

    #[test]
    fn test_tar_bz2_detected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fixture.tar.bz2");
        let file = File::create(&path).unwrap();
        let encoder = bzip2::write::BzEncoder::new(file, bzip2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(3);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, "tool", &b"bin"[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let archive = Archive::open(&path).unwrap();
        assert_eq!(archive.file_members().unwrap(), vec!["tool"]);
        assert_eq!(archive.member_mode("tool").unwrap() & 0o111, 0o111);
    }

    #[test]
    fn test_bzip2_of_non_tar_is_a_compressed_stream() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tool.bz2");
        let file = File::create(&path).unwrap();
        let mut encoder = bzip2::write::BzEncoder::new(file, bzip2::Compression::default());
        encoder.write_all(b"not a tarball").unwrap();
        encoder.finish().unwrap();

        assert!(!Archive::is_archive(&path));
        assert_eq!(
            compressed_kind(&path).unwrap(),
            Some(CompressedKind::Bzip2)
        );
    }

    #[test]
    fn test_missing_member_errors() {
        let tmp = TempDir::new().unwrap();
        let path = write_tar_gz(tmp.path(), &[("present", b"x", 0o644)]);

        let archive = Archive::open(&path).unwrap();
        assert!(archive.member_mode("absent").is_err());
        assert!(archive.extract("absent", tmp.path()).is_err());
    }
}
