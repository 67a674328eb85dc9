use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use xz2::read::XzDecoder;
use zstd::stream::read::Decoder as ZstdDecoder;

use crate::traits::Extractor;
use bm_core::Error;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    Gzip,
    Xz,
    Zstd,
    Plain,
}

fn sniff(path: &Path) -> Result<Compression, Error> {
    let mut magic = [0u8; 6];
    let mut file = File::open(path).map_err(|e| Error::fs("open", path, e))?;
    let n = file.read(&mut magic).map_err(|e| Error::fs("read", path, e))?;
    let magic = &magic[..n];

    Ok(if magic.starts_with(GZIP_MAGIC) {
        Compression::Gzip
    } else if magic.starts_with(XZ_MAGIC) {
        Compression::Xz
    } else if magic.starts_with(ZSTD_MAGIC) {
        Compression::Zstd
    } else {
        Compression::Plain
    })
}

/// Unpack a (possibly compressed) tarball into `dest`.
pub fn extract_tarball(archive: &Path, dest: &Path) -> Result<(), Error> {
    let compression = sniff(archive)?;
    let file = File::open(archive).map_err(|e| Error::fs("open", archive, e))?;
    let reader = BufReader::new(file);

    let reader: Box<dyn Read> = match compression {
        Compression::Gzip => Box::new(GzDecoder::new(reader)),
        Compression::Xz => Box::new(XzDecoder::new(reader)),
        Compression::Zstd => Box::new(ZstdDecoder::new(reader).map_err(|e| {
            Error::ExtractionFailure {
                message: format!("failed to start zstd decoder for {}: {e}", archive.display()),
            }
        })?),
        Compression::Plain => Box::new(reader),
    };

    let mut tar = Archive::new(reader);
    tar.set_preserve_permissions(true);
    tar.unpack(dest).map_err(|e| Error::ExtractionFailure {
        message: format!("failed to unpack {}: {e}", archive.display()),
    })
}

/// Extracts tarballs next to the archive, into `<archive>-extract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TarballExtractor;

impl TarballExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extraction_dir(archive: &Path) -> PathBuf {
        let mut name = archive
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push("-extract");
        archive.with_file_name(name)
    }
}

impl Extractor for TarballExtractor {
    fn extract(&self, archive: &Path) -> Result<PathBuf, Error> {
        let dest = Self::extraction_dir(archive);

        // Leftovers from an interrupted run
        if dest.exists() {
            fs::remove_dir_all(&dest).map_err(|e| Error::fs("remove", &dest, e))?;
        }
        fs::create_dir_all(&dest).map_err(|e| Error::fs("create", &dest, e))?;

        if let Err(e) = extract_tarball(archive, &dest) {
            let _ = fs::remove_dir_all(&dest);
            return Err(e);
        }

        tracing::debug!(archive = %archive.display(), dest = %dest.display(), "extracted");
        Ok(dest)
    }
}
