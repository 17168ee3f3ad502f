use async_trait::async_trait;
use serde::Deserialize;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

use crate::error::{Result, SubFinderError};
use super::{
    dedup_languages, select_supported_exts, select_supported_languages, BackendContext, SearchBackend,
    SearchOptions, SubtitleDescriptor, SubtitleFile, SubtitleNamer, SubtitlePayload,
};

pub const SHORTNAME: &str = "shooter";
pub const API_URL: &str = "https://www.shooter.cn/api/subapi.php";

const SUPPORT_LANGUAGES: [&str; 3] = ["zh", "zh_chs", "en"];
const SUPPORT_EXTS: [&str; 3] = ["ass", "srt", "sub"];
const DEFAULT_LANGUAGES: [&str; 2] = ["zh", "en"];

const HASH_BLOCK_SIZE: u64 = 4096;

#[derive(Debug, Deserialize)]
struct ShooterItem {
    #[serde(rename = "Files", default)]
    files: Vec<ShooterFile>,
}

#[derive(Debug, Deserialize)]
struct ShooterFile {
    #[serde(rename = "Ext")]
    ext: String,
    #[serde(rename = "Link")]
    link: String,
}

/// Looks subtitles up by a hash of the video's content
pub struct ShooterBackend {
    client: reqwest::Client,
    api_url: String,
    namer: SubtitleNamer,
}

impl ShooterBackend {
    pub fn new(context: &BackendContext) -> Self {
        Self {
            client: context.client.clone(),
            api_url: context.api_url(SHORTNAME, API_URL),
            namer: context.namer.clone(),
        }
    }

    async fn query(&self, filehash: &str, pathinfo: &str, language: &str) -> Result<Vec<ShooterItem>> {
        let lang = shooter_language(language);
        let response = self
            .client
            .post(&self.api_url)
            .form(&[
                ("filehash", filehash),
                ("pathinfo", pathinfo),
                ("format", "json"),
                ("lang", lang),
            ])
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;

        Ok(parse_response(&body))
    }

    async fn fetch(&self, link: &str) -> Result<Vec<u8>> {
        let response = self.client.get(link).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SearchBackend for ShooterBackend {
    fn name(&self) -> &'static str {
        SHORTNAME
    }

    async fn search(&self, video: &Path, options: &SearchOptions) -> Result<Vec<SubtitleDescriptor>> {
        let languages = match &options.languages {
            Some(languages) => select_supported_languages(SHORTNAME, languages, &SUPPORT_LANGUAGES)?,
            None => DEFAULT_LANGUAGES.iter().map(|l| l.to_string()).collect(),
        };
        // zh and zh_chs are the same query
        let languages = dedup_languages(&languages, |l| shooter_language(l).to_string());
        let exts = match &options.exts {
            Some(exts) => select_supported_exts(SHORTNAME, exts, &SUPPORT_EXTS)?,
            None => SUPPORT_EXTS.iter().map(|e| e.to_string()).collect(),
        };

        let path = video.to_path_buf();
        let filehash = tokio::task::spawn_blocking(move || file_hash(&path))
            .await
            .map_err(|e| SubFinderError::backend(SHORTNAME, format!("hash task failed: {}", e)))??;
        let pathinfo = video
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();
        debug!("{}: filehash {}", pathinfo, filehash);

        let mut descriptors = Vec::new();
        for language in &languages {
            let items = self.query(&filehash, &pathinfo, language).await?;
            debug!("{}: {} results for {}", pathinfo, items.len(), language);

            let mut descriptor = SubtitleDescriptor {
                languages: vec![language.clone()],
                ..SubtitleDescriptor::default()
            };
            // results come best first; keep the first file of each ext
            for file in items.iter().flat_map(|item| item.files.iter()) {
                let ext = file.ext.trim_start_matches('.').to_lowercase();
                if !exts.contains(&ext) || descriptor.exts.contains(&ext) {
                    continue;
                }
                let content = self.fetch(&file.link).await?;
                let origin = format!("{}.{}.{}", stem_of(video), language, ext);
                descriptor.files.push(SubtitleFile {
                    name: self.namer.subtitle_name(
                        &origin,
                        video,
                        Some(language.as_str()),
                        Some(ext.as_str()),
                    ),
                    payload: SubtitlePayload::Bytes(content),
                });
                descriptor.link.get_or_insert_with(|| file.link.clone());
                descriptor.exts.push(ext);
            }

            if !descriptor.files.is_empty() {
                descriptors.push(descriptor);
            }
        }

        Ok(descriptors)
    }
}

/// The API answers with a JSON array, or with a single non-JSON byte when
/// it has nothing for the hash.
fn parse_response(body: &[u8]) -> Vec<ShooterItem> {
    match serde_json::from_slice(body) {
        Ok(items) => items,
        Err(e) => {
            debug!("No usable shooter response ({} bytes): {}", body.len(), e);
            Vec::new()
        }
    }
}

/// The API only tells Chinese from English
fn shooter_language(language: &str) -> &'static str {
    if language.starts_with("zh") {
        "Chn"
    } else {
        "eng"
    }
}

fn stem_of(video: &Path) -> String {
    video
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned()
}

/// MD5 of four 4 KiB blocks at 4096, 2/3, 1/3 and end-8192, joined by `;`.
pub fn file_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    if size < HASH_BLOCK_SIZE * 2 {
        return Err(SubFinderError::backend(
            SHORTNAME,
            format!("{} is too small to hash ({} bytes)", path.display(), size),
        ));
    }

    let offsets = [HASH_BLOCK_SIZE, size / 3 * 2, size / 3, size - HASH_BLOCK_SIZE * 2];
    let mut parts = Vec::with_capacity(offsets.len());
    for offset in offsets {
        file.seek(SeekFrom::Start(offset))?;
        let mut block = Vec::with_capacity(HASH_BLOCK_SIZE as usize);
        (&mut file).take(HASH_BLOCK_SIZE).read_to_end(&mut block)?;
        parts.push(format!("{:x}", md5::compute(&block)));
    }

    Ok(parts.join(";"))
}
