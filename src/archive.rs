use std::io::{Cursor, Read};
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

use crate::backend::{gen_subname, SubtitleNamer};
use crate::error::Result;

/// Subtitle formats kept from an archive when no exts are configured
pub const ARCHIVE_SUBTITLE_EXTS: [&str; 5] = ["ass", "ssa", "srt", "sub", "vtt"];

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

pub fn is_archive(content: &[u8]) -> bool {
    content.starts_with(ZIP_MAGIC)
}

/// Unpack the subtitle entries of a zip archive and name each of them for
/// `video`. Directories and entries whose extension is not in `exts` are
/// dropped; names are derived from the entry's own file name so language
/// marks and the order marker follow the file inside the archive.
pub fn extract_subtitles(
    content: &[u8],
    video: &Path,
    namer: &SubtitleNamer,
    exts: &[String],
) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = ZipArchive::new(Cursor::new(content))?;
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }

        let Some(origin) = entry
            .enclosed_name()
            .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        else {
            debug!("Skipping archive entry with unsafe path: {}", entry.name());
            continue;
        };

        let ext = Path::new(&origin)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !exts
            .iter()
            .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext))
        {
            debug!("Skipping archive entry {}", origin);
            continue;
        }

        let name = gen_subname(&origin, video, None, None, &namer.order_marker(&origin));
        if files.iter().any(|(existing, _)| *existing == name) {
            debug!("Archive entry {} duplicates {}", origin, name);
            continue;
        }

        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        files.push((name, data));
    }

    Ok(files)
}
