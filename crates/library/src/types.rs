//! Core document types for the VirtualDJ database.

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::xml::Element;

/// File extensions treated as audio.
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "m4a", "aac", "flac", "wav", "aiff", "aif", "ogg", "opus", "wma", "alac",
];

/// File extensions known to be non-audio clutter.
pub const NON_AUDIO_EXTENSIONS: &[&str] = &[
    "zip", "rar", "7z", "tar", "gz", "mp4", "mkv", "avi", "mov", "wmv", "jpg", "jpeg", "png",
    "gif", "bmp", "pdf", "doc", "docx", "txt", "exe", "dmg", "pkg", "app", "db", "xml", "json",
    "nfo",
];

/// Lowercase extension of a database path, without the dot.
///
/// Works for both Windows and POSIX separators.
pub fn path_extension(file_path: &str) -> String {
    let name = file_path.rsplit(['/', '\\']).next().unwrap_or(file_path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx + 1..].to_lowercase(),
        _ => String::new(),
    }
}

/// Check if a database path has an audio extension.
pub fn is_audio_path(file_path: &str) -> bool {
    AUDIO_EXTENSIONS.contains(&path_extension(file_path).as_str())
}

/// Check if a database path has a known non-audio extension.
pub fn is_non_audio_path(file_path: &str) -> bool {
    NON_AUDIO_EXTENSIONS.contains(&path_extension(file_path).as_str())
}

/// Kind of point-of-interest marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoiType {
    Cue,
    Beatgrid,
    Loop,
    Remix,
    Automix,
}

impl PoiType {
    /// Parse the `Type` attribute of a `Poi` element.
    pub fn from_attr(value: &str) -> Option<Self> {
        match value {
            "cue" => Some(Self::Cue),
            "beatgrid" => Some(Self::Beatgrid),
            "loop" => Some(Self::Loop),
            "remix" => Some(Self::Remix),
            "automix" => Some(Self::Automix),
            _ => None,
        }
    }

    /// Get the attribute value for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cue => "cue",
            Self::Beatgrid => "beatgrid",
            Self::Loop => "loop",
            Self::Remix => "remix",
            Self::Automix => "automix",
        }
    }
}

/// Point of interest: cue point, loop, beatgrid anchor, etc.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Poi {
    pub poi_type: PoiType,
    /// Position in seconds.
    pub pos: f64,
    pub name: Option<String>,
    /// Cue number (1-8 for hot cues).
    pub num: Option<i32>,
    /// Loop length in seconds.
    pub size: Option<f64>,
    pub point: Option<f64>,
    /// Local BPM at this position.
    pub bpm: Option<f64>,
    #[serde(skip)]
    pub extra: Vec<(String, String)>,
}

impl Poi {
    /// Create a marker at the given position.
    pub fn new(poi_type: PoiType, pos: f64) -> Self {
        Self {
            poi_type,
            pos,
            name: None,
            num: None,
            size: None,
            point: None,
            bpm: None,
            extra: Vec::new(),
        }
    }

    /// Create a numbered cue point.
    pub fn cue(num: i32, pos: f64) -> Self {
        Self {
            num: Some(num),
            ..Self::new(PoiType::Cue, pos)
        }
    }

    /// Create a loop marker of `size` seconds.
    pub fn looped(pos: f64, size: f64) -> Self {
        Self {
            size: Some(size),
            ..Self::new(PoiType::Loop, pos)
        }
    }
}

/// Energy rating (1-10) stored in the `Grouping` field.
///
/// A decoded tag remembers its stored text (`"07"`, `"energy 7"`) and
/// encodes back to it; tags built with [`new`](Self::new) or
/// [`labeled`](Self::labeled) use the canonical form. Equality only looks
/// at the level and the label.
#[derive(Debug, Clone, Serialize)]
pub struct EnergyTag {
    level: u8,
    labeled: bool,
    #[serde(skip)]
    stored: Option<String>,
}

impl PartialEq for EnergyTag {
    fn eq(&self, other: &Self) -> bool {
        self.level == other.level && self.labeled == other.labeled
    }
}

impl Eq for EnergyTag {}

impl std::hash::Hash for EnergyTag {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.level.hash(state);
        self.labeled.hash(state);
    }
}

impl EnergyTag {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    /// Energy written as a bare number (`"7"`).
    pub fn new(level: u8) -> Option<Self> {
        Self::in_range(level).then_some(Self {
            level,
            labeled: false,
            stored: None,
        })
    }

    /// Energy written with the legacy label (`"Energy 7"`).
    pub fn labeled(level: u8) -> Option<Self> {
        Self::in_range(level).then_some(Self {
            level,
            labeled: true,
            stored: None,
        })
    }

    fn in_range(level: u8) -> bool {
        (Self::MIN..=Self::MAX).contains(&level)
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn is_labeled(&self) -> bool {
        self.labeled
    }

    /// Parse `"N"` or `"Energy N"` (label is case-insensitive).
    pub fn decode(text: &str) -> Option<Self> {
        let mut words = text.split_whitespace();
        let mut tag = match (words.next(), words.next(), words.next()) {
            (Some(n), None, None) if n.bytes().all(|b| b.is_ascii_digit()) => {
                Self::new(n.parse().ok()?)
            }
            (Some(label), Some(n), None) if label.eq_ignore_ascii_case("energy") => {
                Self::labeled(n.parse().ok()?)
            }
            _ => None,
        }?;
        if tag.canonical() != text {
            tag.stored = Some(text.to_string());
        }
        Some(tag)
    }

    fn canonical(&self) -> String {
        if self.labeled {
            format!("Energy {}", self.level)
        } else {
            self.level.to_string()
        }
    }

    /// Encode to the legacy `Grouping` text.
    pub fn encode(&self) -> String {
        match &self.stored {
            Some(text) => text.clone(),
            None => self.canonical(),
        }
    }
}

/// Typed content of the `Grouping` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Grouping {
    Energy(EnergyTag),
    Text(String),
}

impl Grouping {
    pub fn decode(text: &str) -> Self {
        match EnergyTag::decode(text) {
            Some(tag) => Self::Energy(tag),
            None => Self::Text(text.to_string()),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Energy(tag) => tag.encode(),
            Self::Text(text) => text.clone(),
        }
    }

    pub fn energy_level(&self) -> Option<u8> {
        match self {
            Self::Energy(tag) => Some(tag.level()),
            Self::Text(_) => None,
        }
    }
}

/// Space-separated tokens of the `User2` field.
///
/// Mood analysis writes lowercase hashtags (`#happy`), while users keep
/// their own style tags (`#ClearBeat`) alongside.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct UserTags(Vec<String>);

impl UserTags {
    pub fn decode(text: &str) -> Self {
        Self(text.split_whitespace().map(str::to_string).collect())
    }

    pub fn encode(&self) -> String {
        self.0.join(" ")
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    fn mood_of(token: &str) -> Option<&str> {
        let tag = token.strip_prefix('#')?;
        let has_lower = tag.chars().any(char::is_lowercase);
        let has_upper = tag.chars().any(char::is_uppercase);
        (has_lower && !has_upper).then_some(tag)
    }

    /// Mood hashtags, without the leading `#`, in stored order.
    pub fn moods(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(|t| Self::mood_of(t))
    }

    /// The most recently added mood.
    pub fn mood(&self) -> Option<&str> {
        self.moods().last()
    }

    /// Replace every mood hashtag, keeping other tokens in place.
    pub fn with_moods<S: AsRef<str>>(&self, moods: &[S]) -> Self {
        let mut tokens: Vec<String> = self
            .0
            .iter()
            .filter(|t| Self::mood_of(t).is_none())
            .cloned()
            .collect();
        for mood in moods {
            let tag = format!("#{}", mood.as_ref().to_lowercase());
            if !tokens.contains(&tag) {
                tokens.push(tag);
            }
        }
        Self(tokens)
    }
}

/// Song metadata tags (`<Tags>`).
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Tags {
    pub author: Option<String>,
    pub title: Option<String>,
    pub genre: Option<String>,
    pub album: Option<String>,
    pub track_number: Option<u32>,
    pub year: Option<i32>,
    pub composer: Option<String>,
    pub grouping: Option<Grouping>,
    pub remix: Option<String>,
    pub label: Option<String>,
    pub comment: Option<String>,
    /// User-set BPM.
    pub bpm: Option<f64>,
    /// User-set key.
    pub key: Option<String>,
    pub color: Option<String>,
    /// 0-5 stars.
    pub rating: Option<u8>,
    pub flag: Option<i64>,
    pub user2: Option<UserTags>,
    #[serde(skip)]
    pub extra: Vec<(String, String)>,
}

impl Tags {
    pub fn energy_level(&self) -> Option<u8> {
        self.grouping.as_ref().and_then(Grouping::energy_level)
    }

    pub fn mood(&self) -> Option<&str> {
        self.user2.as_ref().and_then(UserTags::mood)
    }
}

/// Technical information about the file (`<Infos>`).
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Infos {
    /// Duration in seconds.
    pub song_length: Option<f64>,
    /// Unix timestamp.
    pub first_seen: Option<i64>,
    /// Unix timestamp.
    pub last_played: Option<i64>,
    pub play_count: Option<u32>,
    /// Bitrate in kbps.
    pub bitrate: Option<u32>,
    pub cover: Option<String>,
    #[serde(skip)]
    pub extra: Vec<(String, String)>,
}

/// Analysis results written by VirtualDJ (`<Scan>`).
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Scan {
    /// Seconds per beat (0.5 means 120 BPM).
    pub bpm: Option<f64>,
    pub key: Option<String>,
    /// Gain adjustment.
    pub volume: Option<f64>,
    pub flag: Option<i64>,
    #[serde(skip)]
    pub extra: Vec<(String, String)>,
}

impl Scan {
    /// Convert the stored beat period to beats per minute.
    pub fn actual_bpm(&self) -> Option<f64> {
        self.bpm.filter(|spb| *spb > 0.0).map(|spb| 60.0 / spb)
    }
}

/// Link to a related song (stems, remixes).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Link {
    pub source: String,
    #[serde(skip)]
    pub extra: Vec<(String, String)>,
}

/// Kind of a `<Song>` child element, used to write children back in the
/// order they were read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    Tags,
    Infos,
    Scan,
    Poi,
    Link,
    Unknown,
}

/// A song entry in the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Song {
    pub file_path: String,
    pub file_size: Option<u64>,
    pub tags: Option<Tags>,
    pub infos: Option<Infos>,
    pub scan: Option<Scan>,
    pub pois: Vec<Poi>,
    pub links: Vec<Link>,
    /// Attributes of `<Song>` not covered by the fields above.
    #[serde(skip)]
    pub extra: Vec<(String, String)>,
    /// Child elements this model does not interpret, kept for round-trips.
    #[serde(skip)]
    pub unknown_children: Vec<Element>,
    /// Order of the child elements as read; empty for new songs.
    #[serde(skip)]
    pub child_order: Vec<ChildKind>,
}

impl Song {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            file_size: None,
            tags: None,
            infos: None,
            scan: None,
            pois: Vec::new(),
            links: Vec::new(),
            extra: Vec::new(),
            unknown_children: Vec::new(),
            child_order: Vec::new(),
        }
    }

    /// Lowercase extension, without the dot.
    pub fn extension(&self) -> String {
        path_extension(&self.file_path)
    }

    /// `C:\...` or `D:/...` style path.
    pub fn is_windows_path(&self) -> bool {
        let bytes = self.file_path.as_bytes();
        bytes.len() > 1 && bytes[1] == b':'
    }

    /// Streaming entry such as `netsearch://...`.
    pub fn is_netsearch(&self) -> bool {
        self.file_path.contains("://") && !self.file_path.starts_with("file://")
    }

    /// Local path that can be checked on this machine.
    pub fn is_local(&self) -> bool {
        !self.is_windows_path() && !self.is_netsearch()
    }

    /// Get a display string for the song (Artist - Title).
    pub fn display_name(&self) -> String {
        if let Some(tags) = &self.tags {
            match (&tags.author, &tags.title) {
                (Some(author), Some(title)) => return format!("{} - {}", author, title),
                (None, Some(title)) => return title.clone(),
                _ => {}
            }
        }
        let name = self
            .file_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.file_path);
        Path::new(name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string())
    }

    pub fn energy(&self) -> Option<u8> {
        self.tags.as_ref().and_then(Tags::energy_level)
    }

    pub fn mood(&self) -> Option<&str> {
        self.tags.as_ref().and_then(Tags::mood)
    }

    pub fn actual_bpm(&self) -> Option<f64> {
        self.scan.as_ref().and_then(Scan::actual_bpm)
    }

    pub fn cue_points(&self) -> impl Iterator<Item = &Poi> {
        self.pois.iter().filter(|p| p.poi_type == PoiType::Cue)
    }

    pub fn loops(&self) -> impl Iterator<Item = &Poi> {
        self.pois.iter().filter(|p| p.poi_type == PoiType::Loop)
    }

    pub fn beatgrid(&self) -> Option<&Poi> {
        self.pois.iter().find(|p| p.poi_type == PoiType::Beatgrid)
    }
}

impl fmt::Display for Song {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// A VirtualDJ playlist (`<MyList>`), read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Playlist {
    pub name: String,
    pub file_paths: Vec<String>,
}

/// Aggregate counts over a database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    pub total_songs: usize,
    pub local_files: usize,
    pub windows_paths: usize,
    pub windows_c_paths: usize,
    pub windows_d_paths: usize,
    pub windows_e_paths: usize,
    /// Local paths under `/Users/`.
    pub mac_home_paths: usize,
    /// Local paths on the `/Volumes/MyNVMe` drive.
    pub mynvme_paths: usize,
    pub netsearch: usize,
    pub with_energy: usize,
    pub with_cue_points: usize,
    pub audio_files: usize,
    pub non_audio_files: usize,
    /// Only populated when existence checks were requested.
    pub missing_files: usize,
}

/// Counts from [`VdjDatabase::merge_from`](crate::VdjDatabase::merge_from).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Songs only the other database had.
    pub added: usize,
    /// Existing songs that took energy or BPM from the other database.
    pub updated: usize,
    pub skipped: usize,
}
