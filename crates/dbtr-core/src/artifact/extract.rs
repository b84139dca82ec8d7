//! Bundle extraction.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::{Error, Result};

/// Fallback name for the scratch copy of an unnamed bundle.
const DEFAULT_BUNDLE_NAME: &str = "bundle.zip";

fn map_zip_error(name: &str, e: ZipError) -> Error {
    match e {
        ZipError::Io(io) => Error::Io(io),
        other => Error::corrupt_archive(name, other),
    }
}

/// Errors while unpacking entries; undecodable entry data (bad checksum,
/// truncated stream) counts as corruption.
fn map_entry_error(name: &str, e: ZipError) -> Error {
    match e {
        ZipError::Io(io)
            if matches!(
                io.kind(),
                io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof
            ) =>
        {
            Error::corrupt_archive(name, io)
        }
        other => map_zip_error(name, other),
    }
}

/// Unpack a zip bundle into `destination`.
///
/// The stream is spooled to a scratch file named after `filename`, which is
/// deleted once all entries are written. Returns `destination`.
///
/// # Errors
/// - [`Error::CorruptArchive`] if the stream is not a valid zip archive, an
///   entry fails its checksum, or an entry would land outside `destination`.
/// - [`Error::Io`] on any read or write failure.
///
/// A `destination` created by this call is removed again if unpacking
/// fails.
pub fn extract(mut bundle: impl Read, filename: &str, destination: &Path) -> Result<PathBuf> {
    let scratch = tempfile::Builder::new().prefix("dbtr-bundle-").tempdir()?;
    let name = Path::new(filename)
        .file_name()
        .map(|n| n.to_owned())
        .unwrap_or_else(|| DEFAULT_BUNDLE_NAME.into());
    let zip_path = scratch.path().join(name);

    let written = {
        let mut file = File::create(&zip_path).map_err(|e| Error::io_at(&zip_path, e))?;
        let written = io::copy(&mut bundle, &mut file)?;
        file.flush()?;
        written
    };
    tracing::debug!("Spooled {} bytes of {} to {}", written, filename, zip_path.display());

    {
        let file = File::open(&zip_path).map_err(|e| Error::io_at(&zip_path, e))?;
        let mut archive = ZipArchive::new(file).map_err(|e| map_zip_error(filename, e))?;
        let created = !destination.exists();
        fs::create_dir_all(destination).map_err(|e| Error::io_at(destination, e))?;
        if let Err(e) = archive.extract(destination) {
            if created {
                let _ = fs::remove_dir_all(destination);
            }
            return Err(map_entry_error(filename, e));
        }
        tracing::debug!("Extracted {} entries from {}", archive.len(), filename);
    }

    fs::remove_file(&zip_path).map_err(|e| Error::io_at(&zip_path, e))?;
    Ok(destination.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use tempfile::TempDir;
    use zip::CompressionMethod;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, contents) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("Failed to start zip entry");
            writer
                .write_all(contents.as_bytes())
                .expect("Failed to write zip entry");
        }
        writer.finish().expect("Failed to finish zip").into_inner()
    }

    #[test]
    fn test_extract_nested_entries() {
        let temp = TempDir::new().unwrap();
        let bytes = build_zip(&[("dbt_project.yml", "name: demo"), ("models/a.sql", "select 1")]);

        let out = extract(Cursor::new(bytes), "project.zip", temp.path()).unwrap();

        assert_eq!(out, temp.path());
        assert_eq!(
            fs::read_to_string(temp.path().join("models/a.sql")).unwrap(),
            "select 1"
        );
        // The spooled archive does not end up in the destination.
        assert!(!temp.path().join("project.zip").exists());
    }

    #[test]
    fn test_extract_rejects_non_zip() {
        let temp = TempDir::new().unwrap();
        let result = extract(Cursor::new(b"definitely not a zip".to_vec()), "x.zip", temp.path());
        assert!(matches!(result, Err(Error::CorruptArchive { .. })));
    }

    #[test]
    fn test_extract_rejects_empty_stream() {
        let temp = TempDir::new().unwrap();
        let result = extract(io::empty(), "empty.zip", temp.path());
        assert!(matches!(result, Err(Error::CorruptArchive { .. })));
    }

    #[test]
    fn test_extract_uses_file_name_only() {
        let temp = TempDir::new().unwrap();
        let bytes = build_zip(&[("a.sql", "select 1")]);
        // A path-like upload name must not escape the scratch area.
        extract(Cursor::new(bytes), "../../evil/bundle.zip", temp.path()).unwrap();
        assert!(temp.path().join("a.sql").exists());
    }

    #[test]
    fn test_extract_rejects_bad_entry_checksum() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("unpacked");
        let body = b"select 1 as payload_under_test";

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        writer.start_file("models/a.sql", stored).unwrap();
        writer.write_all(body).unwrap();
        let mut bytes = writer.finish().unwrap().into_inner();

        // Flip one byte of the stored entry data; headers stay valid.
        let at = bytes
            .windows(body.len())
            .position(|w| w == body)
            .expect("entry data is stored verbatim");
        bytes[at] ^= 0xff;

        let result = extract(Cursor::new(bytes), "bad-crc.zip", &dest);

        assert!(matches!(result, Err(Error::CorruptArchive { ref name, .. }) if name == "bad-crc.zip"));
        assert!(!dest.exists());
    }
}
