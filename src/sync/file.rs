use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::AssetError;
use crate::immich::AssetStream;

/// Reduce a server-supplied file name to its final path component so it
/// cannot point outside the destination directory.
pub(crate) fn safe_file_name(name: &str) -> Option<&str> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("");
    match last {
        "" | "." | ".." => None,
        other => Some(other),
    }
}

/// Hidden temp file next to the destination, keyed by asset ID so two assets
/// sharing a file name never write the same `.part`.
pub(crate) fn part_path(dest_dir: &Path, asset_id: &str) -> PathBuf {
    let key: String = asset_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    dest_dir.join(format!(".{}.part", key))
}

/// Stream an asset into `part_path`, then rename it over `download_path`.
///
/// An existing file at `download_path` is replaced. On any failure the
/// `.part` file is removed and `download_path` is left untouched.
/// Returns the number of bytes written.
pub(crate) async fn write_stream(
    mut stream: AssetStream,
    download_path: &Path,
    part_path: &Path,
) -> Result<u64, AssetError> {
    let result = match copy_to_part(&mut stream, part_path).await {
        Ok(bytes) => fs::rename(part_path, download_path)
            .await
            .map(|()| bytes)
            .map_err(AssetError::from),
        Err(e) => Err(e),
    };

    if result.is_err() {
        let _ = fs::remove_file(part_path).await;
    }
    result
}

async fn copy_to_part(stream: &mut AssetStream, part_path: &Path) -> Result<u64, AssetError> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(part_path)
        .await?;

    let mut bytes_written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(bytes_written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::immich::RemoteError;
    use bytes::Bytes;
    use futures_util::stream;

    fn ok_stream(chunks: &[&'static [u8]]) -> AssetStream {
        let items: Vec<Result<Bytes, RemoteError>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(*c)))
            .collect();
        stream::iter(items).boxed()
    }

    fn broken_stream() -> AssetStream {
        let items: Vec<Result<Bytes, RemoteError>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(RemoteError::Status {
                status: 502,
                path: "/api/assets/a1/original".into(),
            }),
        ];
        stream::iter(items).boxed()
    }

    #[test]
    fn test_safe_file_name_plain() {
        assert_eq!(safe_file_name("IMG_0001.JPG"), Some("IMG_0001.JPG"));
    }

    #[test]
    fn test_safe_file_name_strips_directories() {
        assert_eq!(safe_file_name("../../etc/passwd"), Some("passwd"));
        assert_eq!(safe_file_name("C:\\Users\\me\\x.jpg"), Some("x.jpg"));
    }

    #[test]
    fn test_safe_file_name_rejects_empty_and_dots() {
        assert_eq!(safe_file_name(""), None);
        assert_eq!(safe_file_name(".."), None);
        assert_eq!(safe_file_name("photos/"), None);
    }

    #[test]
    fn test_part_path_keyed_by_asset_id() {
        let p = part_path(Path::new("/photos"), "a1b2-c3/../x");
        assert_eq!(p, PathBuf::from("/photos/.a1b2-c3x.part"));
    }

    #[tokio::test]
    async fn test_write_stream_writes_all_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x.jpg");
        let part = part_path(dir.path(), "a1");

        let written = write_stream(ok_stream(&[b"abc", b"def"]), &dest, &part)
            .await
            .unwrap();

        assert_eq!(written, 6);
        assert_eq!(std::fs::read(&dest).unwrap(), b"abcdef");
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn test_write_stream_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x.jpg");
        std::fs::write(&dest, b"old content that is longer").unwrap();

        write_stream(ok_stream(&[b"new"]), &dest, &part_path(dir.path(), "a2"))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_write_stream_failure_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x.jpg");
        let part = part_path(dir.path(), "a1");

        let result = write_stream(broken_stream(), &dest, &part).await;

        assert!(matches!(result, Err(AssetError::Remote(_))));
        assert!(!dest.exists());
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn test_write_stream_failure_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x.jpg");
        std::fs::write(&dest, b"previous").unwrap();

        let result = write_stream(broken_stream(), &dest, &part_path(dir.path(), "a1")).await;

        assert!(result.is_err());
        assert_eq!(std::fs::read(&dest).unwrap(), b"previous");
    }

    #[tokio::test]
    async fn test_write_stream_missing_directory_is_disk_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let result = write_stream(
            ok_stream(&[b"abc"]),
            &missing.join("x.jpg"),
            &part_path(&missing, "a1"),
        )
        .await;
        assert!(matches!(result, Err(AssetError::Disk(_))));
    }
}
