use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;

use crate::error::FetchError;

/// Extract a ZIP archive into `dest`, stripping the top-level directory.
///
/// Release archives wrap their contents in a single versioned directory; the
/// engine layout wants the files directly under the variant directory.
pub fn extract_zip(archive_path: &Path, dest: &Path) -> Result<(), FetchError> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
    std::fs::create_dir_all(dest)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let entry_path = match entry.enclosed_name() {
            Some(p) => p,
            None => continue,
        };

        let Some(rel_path) = strip_top(&entry_path) else {
            continue;
        };
        let dest_path = dest.join(rel_path);

        if entry.is_dir() {
            std::fs::create_dir_all(&dest_path)?;
        } else {
            if let Some(parent) = dest_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&dest_path)?;
            std::io::copy(&mut entry, &mut out)?;
        }
    }

    Ok(())
}

/// Extract a `.tar.gz` archive into `dest`, stripping the top-level directory.
pub fn extract_tar_gz_strip_top(archive_path: &Path, dest: &Path) -> Result<(), FetchError> {
    let file = File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    std::fs::create_dir_all(dest)?;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.to_path_buf();
        let Some(rel_path) = strip_top(&entry_path) else {
            continue;
        };
        let dest_path = dest.join(rel_path);
        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(dest_path)?;
    }

    Ok(())
}

/// Drop the first path component; `None` when nothing remains.
fn strip_top(path: &Path) -> Option<PathBuf> {
    let components: Vec<_> = path.components().collect();
    if components.len() <= 1 {
        return None;
    }
    Some(components[1..].iter().collect())
}
