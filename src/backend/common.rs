use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::LazyLock;

use crate::error::{Result, SubFinderError};

/// Language marks found in subtitle filenames and the codes they stand for
pub const LANGUAGES_MAP: [(&str, &str); 7] = [
    ("简体", "zh_chs"),
    ("繁體", "zh_cht"),
    ("English", "en"),
    ("english", "en"),
    ("英文", "en"),
    ("双语", "zh_en"),
    ("中英", "zh_en"),
];

pub const DEFAULT_LANGUAGE_PRIORITY: [(&str, u32); 5] = [
    ("zh_en", 1),
    ("zh_chs", 2),
    ("zh", 3),
    ("zh_cht", 4),
    ("en", 5),
];

/// Kept below 10 so that `lang * 10 + ext` stays unambiguous
pub const DEFAULT_EXT_PRIORITY: [(&str, u32); 3] = [("ass", 1), ("ssa", 2), ("srt", 3)];

static RE_SEASON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[Ss](?P<season>\d+)\.?").expect("valid regex"));
static RE_SEASON_EPISODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[Ss](?P<season>\d+)\.?[Ee](?P<episode>\d+)").expect("valid regex")
});
static RE_RESOLUTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<resolution>720[Pp]|1080[Pp]|2160[Pp]|HR)").expect("valid regex")
});
static RE_SOURCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.(?P<source>BD|Blu[Rr]ay|BDrip|WEB-DL|HDrip|HDTVrip|HDTV|HD|DVDrip)\.")
        .expect("valid regex")
});
static RE_AUDIO_ENC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<audio_encoding>mp3|DD5\.1|DDP5\.1|AC3\.5\.1)").expect("valid regex")
});
static RE_VIDEO_ENC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<video_encoding>x264|H\.264|AVC1|H\.265)").expect("valid regex")
});
static RE_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// What a release name tells about the video
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoInfo {
    pub title: String,
    /// 0 when unknown
    pub season: u32,
    /// 0 when unknown
    pub episode: u32,
    pub resolution: String,
    pub source: String,
    pub audio_encoding: String,
    pub video_encoding: String,
}

impl VideoInfo {
    /// Parse a video name (file stem), e.g. `Show.S01E02.720p.WEB-DL.x264`.
    pub fn parse(videoname: &str) -> Self {
        let mut info = VideoInfo::default();
        let mut index = videoname.len();

        if let Some(caps) = RE_SEASON_EPISODE.captures(videoname) {
            info.season = caps["season"].parse().unwrap_or(0);
            info.episode = caps["episode"].parse().unwrap_or(0);
            index = caps.get(0).map_or(index, |m| m.start());
            info.title = videoname[..index].trim_matches('.').to_string();
        } else if let Some(caps) = RE_SEASON.captures(videoname) {
            info.season = caps["season"].parse().unwrap_or(0);
            index = caps.get(0).map_or(index, |m| m.start());
            info.title = videoname[..index].trim_matches('.').to_string();
        }

        let fields: [(&Regex, &str); 4] = [
            (&*RE_RESOLUTION, "resolution"),
            (&*RE_SOURCE, "source"),
            (&*RE_AUDIO_ENC, "audio_encoding"),
            (&*RE_VIDEO_ENC, "video_encoding"),
        ];
        for (re, field) in fields {
            let Some(caps) = re.captures(videoname) else {
                continue;
            };
            let value = caps[field].to_string();
            match field {
                "resolution" => info.resolution = value,
                "source" => info.source = value,
                "audio_encoding" => info.audio_encoding = value,
                _ => info.video_encoding = value,
            }
            let start = caps.get(0).map_or(index, |m| m.start());
            if info.title.is_empty() || start < index {
                index = start;
                info.title = videoname[..index].trim_matches('.').to_string();
            }
        }

        if info.title.is_empty() {
            info.title = match videoname.find('.') {
                Some(i) if i > 0 => videoname[..i].to_string(),
                _ => videoname.to_string(),
            };
        }

        info
    }

    /// Search keywords in the `Title.S01.E02` and `Title S01 E02` forms.
    pub fn keywords(&self) -> Vec<String> {
        [".", " "]
            .iter()
            .map(|sep| {
                let mut parts = vec![self.title.clone()];
                if self.season != 0 {
                    parts.push(format!("S{:02}", self.season));
                }
                if self.episode != 0 {
                    parts.push(format!("E{:02}", self.episode));
                }
                RE_SPACES.replace_all(&parts.join(sep), " ").into_owned()
            })
            .collect()
    }

    /// How far `other` agrees with this video, comparing season, episode,
    /// resolution, source, video encoding and audio encoding in that order
    /// and stopping at the first difference. `None` unless both season and
    /// episode agree.
    pub fn match_depth(&self, other: &VideoInfo) -> Option<usize> {
        let agreed = [
            self.season == other.season,
            self.episode == other.episode,
            self.resolution.eq_ignore_ascii_case(&other.resolution),
            self.source.eq_ignore_ascii_case(&other.source),
            self.video_encoding.eq_ignore_ascii_case(&other.video_encoding),
            self.audio_encoding.eq_ignore_ascii_case(&other.audio_encoding),
        ];
        let depth = agreed.iter().take_while(|agreed| **agreed).count();
        (depth >= 2).then_some(depth)
    }
}

/// Names subtitle files after their video and ranks them by language and
/// format preference.
#[derive(Debug, Clone)]
pub struct SubtitleNamer {
    language_priority: HashMap<String, u32>,
    ext_priority: HashMap<String, u32>,
    no_order_marker: bool,
}

impl SubtitleNamer {
    /// Configured languages/exts are ranked in the given order; without
    /// them the built-in rankings apply.
    pub fn new(languages: Option<&[String]>, exts: Option<&[String]>, no_order_marker: bool) -> Self {
        Self {
            language_priority: rank(languages, &DEFAULT_LANGUAGE_PRIORITY),
            ext_priority: rank(exts, &DEFAULT_EXT_PRIORITY),
            no_order_marker,
        }
    }

    /// `lang_prio * 10 + ext_prio`, lower is better
    pub fn priority(&self, subtitle_file: &str) -> u32 {
        let name = Path::new(subtitle_file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| subtitle_file.to_string());

        self.language_rank(&name) * 10 + self.ext_rank(&extension_of(&name))
    }

    /// `.NNNNN` marker that sorts better subtitles first, empty when disabled
    pub fn order_marker(&self, subtitle_file: &str) -> String {
        if self.no_order_marker {
            String::new()
        } else {
            format!(".{:05}", self.priority(subtitle_file))
        }
    }

    /// File name for a subtitle of `video`, derived from the provider's
    /// `origin_file` name. An explicit language or ext also decides the rank.
    pub fn subtitle_name(
        &self,
        origin_file: &str,
        video: &Path,
        language: Option<&str>,
        ext: Option<&str>,
    ) -> String {
        let prio = if self.no_order_marker {
            String::new()
        } else {
            let lang_prio = match language {
                Some(language) => self.language_prio(language, self.max_language_prio()),
                None => self.language_rank(origin_file),
            };
            let ext_prio = match ext {
                Some(ext) => self.ext_rank(ext.trim_start_matches('.')),
                None => self.ext_rank(&extension_of(origin_file)),
            };
            format!(".{:05}", lang_prio * 10 + ext_prio)
        };
        gen_subname(origin_file, video, language, ext, &prio)
    }

    fn language_rank(&self, name: &str) -> u32 {
        let max_lang = self.max_language_prio();
        let mut lang_prio = max_lang;
        let mut langs = BTreeSet::new();
        for (mark, code) in LANGUAGES_MAP {
            // a filename never starts with its language mark
            if found_after_start(name, mark) || found_after_start(name, code) {
                langs.insert(code);
                lang_prio = lang_prio.min(self.language_prio(code, max_lang));
            }
        }
        if langs.contains("en")
            && (langs.contains("zh") || langs.contains("zh_chs") || langs.contains("zh_cht"))
        {
            lang_prio = self.language_prio("zh_en", max_lang);
        }
        lang_prio
    }

    fn ext_rank(&self, ext: &str) -> u32 {
        let max_ext = self.ext_priority.values().copied().max().unwrap_or(1);
        self.ext_priority.get(ext).copied().unwrap_or(max_ext)
    }

    fn max_language_prio(&self) -> u32 {
        self.language_priority.values().copied().max().unwrap_or(1)
    }

    fn language_prio(&self, code: &str, fallback: u32) -> u32 {
        self.language_priority.get(code).copied().unwrap_or(fallback)
    }
}

fn rank(configured: Option<&[String]>, defaults: &[(&str, u32)]) -> HashMap<String, u32> {
    match configured {
        Some(values) if !values.is_empty() => values
            .iter()
            .enumerate()
            .map(|(i, v)| (v.trim_start_matches('.').to_string(), i as u32 + 1))
            .collect(),
        _ => defaults
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect(),
    }
}

fn found_after_start(haystack: &str, needle: &str) -> bool {
    haystack.rfind(needle).is_some_and(|i| i > 0)
}

fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `<video stem><prio><.language><.ext>`. Without an explicit language the
/// marks found in `origin_file` are joined with `&`; without an explicit ext
/// the origin's extension is used.
pub fn gen_subname(
    origin_file: &str,
    video: &Path,
    language: Option<&str>,
    ext: Option<&str>,
    prio: &str,
) -> String {
    let language = match language.filter(|l| !l.is_empty()) {
        Some(language) => language.to_string(),
        None => LANGUAGES_MAP
            .iter()
            .filter(|(mark, _)| origin_file.find(mark).is_some_and(|i| i > 0))
            .map(|(mark, _)| *mark)
            .collect::<Vec<_>>()
            .join("&"),
    };
    let language = if language.is_empty() || language.starts_with('.') {
        language
    } else {
        format!(".{}", language)
    };

    let ext = match ext.filter(|e| !e.is_empty()) {
        Some(ext) => ext.to_string(),
        None => extension_of(origin_file),
    };
    let ext = if ext.is_empty() || ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    };

    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    format!("{}{}{}{}", stem, prio, language, ext)
}

/// Keep the first of several languages that a provider knows by the same
/// code, preserving request order.
pub fn dedup_languages<F>(languages: &[String], code: F) -> Vec<String>
where
    F: Fn(&str) -> String,
{
    let mut seen = BTreeSet::new();
    languages
        .iter()
        .filter(|language| seen.insert(code(language.as_str())))
        .cloned()
        .collect()
}

/// Keep the requested values the backend supports, in request order.
/// Fails when none is supported.
pub fn select_supported_languages(
    backend: &str,
    requested: &[String],
    supported: &[&str],
) -> Result<Vec<String>> {
    let selected = intersect(requested, supported);
    if selected.is_empty() {
        return Err(SubFinderError::UnsupportedLanguage {
            backend: backend.to_string(),
            language: requested.join(","),
        });
    }
    Ok(selected)
}

pub fn select_supported_exts(
    backend: &str,
    requested: &[String],
    supported: &[&str],
) -> Result<Vec<String>> {
    let selected = intersect(requested, supported);
    if selected.is_empty() {
        return Err(SubFinderError::UnsupportedExt {
            backend: backend.to_string(),
            ext: requested.join(","),
        });
    }
    Ok(selected)
}

fn intersect(requested: &[String], supported: &[&str]) -> Vec<String> {
    requested
        .iter()
        .map(|v| v.trim_start_matches('.').to_string())
        .filter(|v| supported.contains(&v.as_str()))
        .collect()
}
