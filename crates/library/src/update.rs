//! Partial updates for song sub-records.
//!
//! Every field is a [`Patch`]: leave it alone, set it, or clear it. Updates
//! can also be built from raw XML attribute names, which is how column
//! edits coming from a table view are forwarded.

use std::str::FromStr;

use crate::error::{DatabaseError, Result};
use crate::types::{EnergyTag, Grouping, Infos, Scan, Tags, UserTags};

/// Change to a single optional field.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Patch<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T> Patch<T> {
    /// `Some` sets the field, `None` clears it.
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(value) => Self::Set(value),
            None => Self::Clear,
        }
    }

    pub fn is_keep(&self) -> bool {
        matches!(self, Self::Keep)
    }

    pub fn apply(self, field: &mut Option<T>) {
        match self {
            Self::Keep => {}
            Self::Set(value) => *field = Some(value),
            Self::Clear => *field = None,
        }
    }
}

/// Apply `patch` to `field`. A set or cleared field also drops any raw
/// value of the same attribute kept from the file.
fn apply_field<T>(
    patch: Patch<T>,
    field: &mut Option<T>,
    extra: &mut Vec<(String, String)>,
    name: &str,
) {
    if !patch.is_keep() {
        extra.retain(|(key, _)| key != name);
    }
    patch.apply(field);
}

fn parse_value<T: FromStr>(field: &str, value: Option<&str>) -> Result<Patch<T>> {
    match value {
        None => Ok(Patch::Clear),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Patch::Set)
            .map_err(|_| DatabaseError::InvalidValue {
                field: field.to_string(),
                value: raw.to_string(),
            }),
    }
}

fn text_value(value: Option<&str>) -> Patch<String> {
    Patch::from_option(value.map(str::to_string))
}

/// Partial update of a song's `Tags`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TagsUpdate {
    pub author: Patch<String>,
    pub title: Patch<String>,
    pub genre: Patch<String>,
    pub album: Patch<String>,
    pub track_number: Patch<u32>,
    pub year: Patch<i32>,
    pub composer: Patch<String>,
    pub grouping: Patch<Grouping>,
    pub remix: Patch<String>,
    pub label: Patch<String>,
    pub comment: Patch<String>,
    pub bpm: Patch<f64>,
    pub key: Patch<String>,
    pub color: Patch<String>,
    pub rating: Patch<u8>,
    pub flag: Patch<i64>,
    pub user2: Patch<UserTags>,
}

impl TagsUpdate {
    /// Set the energy level, keeping every other field.
    pub fn energy(tag: EnergyTag) -> Self {
        Self {
            grouping: Patch::Set(Grouping::Energy(tag)),
            ..Default::default()
        }
    }

    /// Set a field by its XML attribute name. `None` clears it.
    pub fn set_attribute(&mut self, name: &str, value: Option<&str>) -> Result<&mut Self> {
        match name {
            "Author" => self.author = text_value(value),
            "Title" => self.title = text_value(value),
            "Genre" => self.genre = text_value(value),
            "Album" => self.album = text_value(value),
            "TrackNumber" => self.track_number = parse_value(name, value)?,
            "Year" => self.year = parse_value(name, value)?,
            "Composer" => self.composer = text_value(value),
            "Grouping" => self.grouping = Patch::from_option(value.map(Grouping::decode)),
            "Remix" => self.remix = text_value(value),
            "Label" => self.label = text_value(value),
            "Comment" => self.comment = text_value(value),
            "Bpm" => self.bpm = parse_value(name, value)?,
            "Key" => self.key = text_value(value),
            "Color" => self.color = text_value(value),
            "Rating" => {
                let rating: Patch<u8> = parse_value(name, value)?;
                if let Patch::Set(stars) = rating {
                    if stars > 5 {
                        return Err(DatabaseError::InvalidValue {
                            field: name.to_string(),
                            value: stars.to_string(),
                        });
                    }
                }
                self.rating = rating;
            }
            "Flag" => self.flag = parse_value(name, value)?,
            "User2" => self.user2 = Patch::from_option(value.map(UserTags::decode)),
            _ => return Err(DatabaseError::UnknownField(name.to_string())),
        }
        Ok(self)
    }

    /// Build an update from `(attribute, value)` pairs.
    pub fn from_attributes<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        let mut update = Self::default();
        for (name, value) in pairs {
            update.set_attribute(name, value)?;
        }
        Ok(update)
    }

    pub(crate) fn apply(self, tags: &mut Tags) {
        apply_field(self.author, &mut tags.author, &mut tags.extra, "Author");
        apply_field(self.title, &mut tags.title, &mut tags.extra, "Title");
        apply_field(self.genre, &mut tags.genre, &mut tags.extra, "Genre");
        apply_field(self.album, &mut tags.album, &mut tags.extra, "Album");
        apply_field(self.track_number, &mut tags.track_number, &mut tags.extra, "TrackNumber");
        apply_field(self.year, &mut tags.year, &mut tags.extra, "Year");
        apply_field(self.composer, &mut tags.composer, &mut tags.extra, "Composer");
        apply_field(self.grouping, &mut tags.grouping, &mut tags.extra, "Grouping");
        apply_field(self.remix, &mut tags.remix, &mut tags.extra, "Remix");
        apply_field(self.label, &mut tags.label, &mut tags.extra, "Label");
        apply_field(self.comment, &mut tags.comment, &mut tags.extra, "Comment");
        apply_field(self.bpm, &mut tags.bpm, &mut tags.extra, "Bpm");
        apply_field(self.key, &mut tags.key, &mut tags.extra, "Key");
        apply_field(self.color, &mut tags.color, &mut tags.extra, "Color");
        apply_field(self.rating, &mut tags.rating, &mut tags.extra, "Rating");
        apply_field(self.flag, &mut tags.flag, &mut tags.extra, "Flag");
        apply_field(self.user2, &mut tags.user2, &mut tags.extra, "User2");
    }
}

/// Partial update of a song's `Infos`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InfosUpdate {
    pub song_length: Patch<f64>,
    pub first_seen: Patch<i64>,
    pub last_played: Patch<i64>,
    pub play_count: Patch<u32>,
    pub bitrate: Patch<u32>,
    pub cover: Patch<String>,
}

impl InfosUpdate {
    pub fn set_attribute(&mut self, name: &str, value: Option<&str>) -> Result<&mut Self> {
        match name {
            "SongLength" => self.song_length = parse_value(name, value)?,
            "FirstSeen" => self.first_seen = parse_value(name, value)?,
            "LastPlay" => self.last_played = parse_value(name, value)?,
            "PlayCount" => self.play_count = parse_value(name, value)?,
            "Bitrate" => self.bitrate = parse_value(name, value)?,
            "Cover" => self.cover = text_value(value),
            _ => return Err(DatabaseError::UnknownField(name.to_string())),
        }
        Ok(self)
    }

    pub(crate) fn apply(self, infos: &mut Infos) {
        apply_field(self.song_length, &mut infos.song_length, &mut infos.extra, "SongLength");
        apply_field(self.first_seen, &mut infos.first_seen, &mut infos.extra, "FirstSeen");
        apply_field(self.last_played, &mut infos.last_played, &mut infos.extra, "LastPlay");
        apply_field(self.play_count, &mut infos.play_count, &mut infos.extra, "PlayCount");
        apply_field(self.bitrate, &mut infos.bitrate, &mut infos.extra, "Bitrate");
        apply_field(self.cover, &mut infos.cover, &mut infos.extra, "Cover");
    }
}

/// Partial update of a song's `Scan`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanUpdate {
    pub bpm: Patch<f64>,
    pub key: Patch<String>,
    pub volume: Patch<f64>,
    pub flag: Patch<i64>,
}

impl ScanUpdate {
    pub fn set_attribute(&mut self, name: &str, value: Option<&str>) -> Result<&mut Self> {
        match name {
            "Bpm" => self.bpm = parse_value(name, value)?,
            "Key" => self.key = text_value(value),
            "Volume" => self.volume = parse_value(name, value)?,
            "Flag" => self.flag = parse_value(name, value)?,
            _ => return Err(DatabaseError::UnknownField(name.to_string())),
        }
        Ok(self)
    }

    pub(crate) fn apply(self, scan: &mut Scan) {
        apply_field(self.bpm, &mut scan.bpm, &mut scan.extra, "Bpm");
        apply_field(self.key, &mut scan.key, &mut scan.extra, "Key");
        apply_field(self.volume, &mut scan.volume, &mut scan.extra, "Volume");
        apply_field(self.flag, &mut scan.flag, &mut scan.extra, "Flag");
    }
}
