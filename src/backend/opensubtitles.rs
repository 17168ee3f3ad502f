use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

use crate::error::{Result, SubFinderError};
use super::{
    dedup_languages, select_supported_exts, BackendContext, SearchBackend, SearchOptions, SubtitleDescriptor,
    SubtitleFile, SubtitleNamer, SubtitlePayload, VideoInfo,
};

pub const SHORTNAME: &str = "opensubtitles";
pub const API_URL: &str = "https://api.opensubtitles.com/api/v1";

const SUPPORT_EXTS: [&str; 2] = ["srt", "vtt"];
const DEFAULT_LANGUAGES: [&str; 1] = ["en"];

const HASH_CHUNK_SIZE: u64 = 65536;
/// Every compared release field agrees
const EXACT_MATCH: usize = 6;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SubtitleData>,
}

#[derive(Debug, Deserialize)]
struct SubtitleData {
    attributes: SubtitleAttributes,
}

#[derive(Debug, Deserialize)]
struct SubtitleAttributes {
    language: Option<String>,
    #[serde(default)]
    download_count: u64,
    #[serde(default)]
    ratings: f64,
    #[serde(default)]
    moviehash_match: bool,
    release: Option<String>,
    #[serde(default)]
    files: Vec<FileInfo>,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    file_id: u64,
    file_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct DownloadRequest<'a> {
    file_id: u64,
    sub_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct DownloadResponse {
    link: String,
    file_name: Option<String>,
}

/// Searches the OpenSubtitles REST API by moviehash, then by title
pub struct OpenSubtitlesBackend {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    namer: SubtitleNamer,
}

impl OpenSubtitlesBackend {
    pub fn new(context: &BackendContext) -> Self {
        Self {
            client: context.client.clone(),
            api_url: context.api_url(SHORTNAME, API_URL).trim_end_matches('/').to_string(),
            api_key: context.opensubtitles_api_key.clone(),
            namer: context.namer.clone(),
        }
    }

    async fn find(&self, api_key: &str, params: &[(&str, String)]) -> Result<Vec<SubtitleData>> {
        let response = self
            .client
            .get(format!("{}/subtitles", self.api_url))
            .header("Api-Key", api_key)
            .header("Accept", "application/json")
            .query(params)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        let parsed: SearchResponse = serde_json::from_str(&body)
            .map_err(|e| SubFinderError::invalid_response(SHORTNAME, e.to_string()))?;

        Ok(parsed.data)
    }

    async fn request_download(&self, api_key: &str, file_id: u64, format: &str) -> Result<DownloadResponse> {
        let response = self
            .client
            .post(format!("{}/download", self.api_url))
            .header("Api-Key", api_key)
            .header("Accept", "application/json")
            .json(&DownloadRequest {
                file_id,
                sub_format: format,
            })
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;

        serde_json::from_str(&body)
            .map_err(|e| SubFinderError::invalid_response(SHORTNAME, e.to_string()))
    }
}

#[async_trait]
impl SearchBackend for OpenSubtitlesBackend {
    fn name(&self) -> &'static str {
        SHORTNAME
    }

    async fn search(&self, video: &Path, options: &SearchOptions) -> Result<Vec<SubtitleDescriptor>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SubFinderError::backend(SHORTNAME, "API key not configured"))?;

        let languages: Vec<String> = match &options.languages {
            Some(languages) => languages.clone(),
            None => DEFAULT_LANGUAGES.iter().map(|l| l.to_string()).collect(),
        };
        let ext = match &options.exts {
            Some(exts) => select_supported_exts(SHORTNAME, exts, &SUPPORT_EXTS)?.remove(0),
            None => SUPPORT_EXTS[0].to_string(),
        };
        let language_param = language_param(&languages);
        let videoname = video
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();

        let video_info = VideoInfo::parse(&videoname);

        let mut attempts: Vec<Vec<(&str, String)>> = Vec::new();
        match &options.keyword {
            Some(keyword) => {
                attempts.push(vec![("query", keyword.clone())]);
            }
            None => {
                let path = video.to_path_buf();
                match tokio::task::spawn_blocking(move || moviehash(&path)).await {
                    Ok(Ok(hash)) => attempts.push(vec![("moviehash", hash)]),
                    Ok(Err(e)) => debug!("{}: no moviehash: {}", videoname, e),
                    Err(e) => debug!("{}: hash task failed: {}", videoname, e),
                }
                let info = &video_info;
                let mut seen = Vec::new();
                for keyword in info.keywords() {
                    if seen.contains(&keyword) {
                        continue;
                    }
                    seen.push(keyword.clone());
                    let mut params = vec![("query", keyword)];
                    if info.season != 0 {
                        params.push(("season_number", info.season.to_string()));
                    }
                    if info.episode != 0 {
                        params.push(("episode_number", info.episode.to_string()));
                    }
                    attempts.push(params);
                }
            }
        }

        let mut results = Vec::new();
        for mut params in attempts {
            params.push(("languages", language_param.clone()));
            debug!("{}: searching with {:?}", videoname, params);
            results = self.find(api_key, &params).await?;
            if !results.is_empty() {
                break;
            }
        }

        let mut descriptors = Vec::new();
        for language in &dedup_languages(&languages, api_language) {
            let Some(best) = best_match(&results, &api_language(language), &video_info) else {
                debug!("{}: no matching {} release", videoname, language);
                continue;
            };
            let file = &best.attributes.files[0];

            let download = self.request_download(api_key, file.file_id, api_format(&ext)).await?;
            let origin = download
                .file_name
                .clone()
                .or_else(|| file.file_name.clone())
                .or_else(|| best.attributes.release.clone())
                .unwrap_or_else(|| format!("{}.{}.{}", videoname, language, ext));

            descriptors.push(SubtitleDescriptor {
                link: Some(download.link.clone()),
                languages: vec![language.clone()],
                exts: vec![ext.clone()],
                files: vec![SubtitleFile {
                    name: self.namer.subtitle_name(
                        &origin,
                        video,
                        Some(language.as_str()),
                        Some(ext.as_str()),
                    ),
                    payload: SubtitlePayload::Link(download.link),
                }],
            });
        }

        Ok(descriptors)
    }
}

/// Most trusted result in `language`: the release name agreeing furthest
/// with the video (moviehash hits agree fully), then the best rating, then
/// the most downloads. Releases that differ in season or episode are out.
fn best_match<'a>(
    results: &'a [SubtitleData],
    language: &str,
    video: &VideoInfo,
) -> Option<&'a SubtitleData> {
    results
        .iter()
        .filter(|r| {
            r.attributes
                .language
                .as_deref()
                .is_some_and(|l| l.eq_ignore_ascii_case(language))
        })
        .filter(|r| !r.attributes.files.is_empty())
        .filter_map(|r| {
            let depth = if r.attributes.moviehash_match {
                Some(EXACT_MATCH)
            } else {
                video.match_depth(&VideoInfo::parse(r.attributes.release.as_deref().unwrap_or_default()))
            };
            depth.map(|depth| (depth, r))
        })
        .max_by(|(a_depth, a), (b_depth, b)| {
            a_depth
                .cmp(b_depth)
                .then(a.attributes.ratings.total_cmp(&b.attributes.ratings))
                .then(a.attributes.download_count.cmp(&b.attributes.download_count))
        })
        .map(|(_, r)| r)
}

/// Language codes used by the API
fn api_language(language: &str) -> String {
    match language {
        "zh" | "zh_chs" | "zh_en" => "zh-cn".to_string(),
        "zh_cht" => "zh-tw".to_string(),
        other => other.replace('_', "-").to_lowercase(),
    }
}

/// Comma separated, sorted and deduplicated as the API expects
fn language_param(languages: &[String]) -> String {
    let mut codes: Vec<String> = languages.iter().map(|l| api_language(l)).collect();
    codes.sort();
    codes.dedup();
    codes.join(",")
}

fn api_format(ext: &str) -> &'static str {
    match ext {
        "vtt" => "webvtt",
        _ => "srt",
    }
}

/// OSDb hash: file size plus the wrapping sum of the first and last 64 KiB
/// read as little-endian u64 words, in hex.
pub fn moviehash(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    if size < HASH_CHUNK_SIZE * 2 {
        return Err(SubFinderError::backend(
            SHORTNAME,
            format!("{} is too small to hash ({} bytes)", path.display(), size),
        ));
    }

    let mut hash = size;
    let mut chunk = vec![0u8; HASH_CHUNK_SIZE as usize];
    for offset in [0, size - HASH_CHUNK_SIZE] {
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut chunk)?;
        for word in chunk.chunks_exact(8) {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(word);
            hash = hash.wrapping_add(u64::from_le_bytes(bytes));
        }
    }

    Ok(format!("{:016x}", hash))
}
