//! Mapping between `<Song>` elements and the typed document model.

use std::fmt::Display;
use std::str::FromStr;

use crate::types::{ChildKind, Grouping, Infos, Link, Poi, PoiType, Scan, Song, Tags, UserTags};
use crate::xml::Element;

pub(crate) const SONG: &str = "Song";
pub(crate) const PLAYLIST: &str = "MyList";

/// Attributes of one element, consumed field by field.
///
/// Whatever is not taken (or fails to parse) ends up in `extra` so that
/// it is written back unchanged.
struct Attrs(Vec<(String, String)>);

impl Attrs {
    fn of(element: &Element) -> Self {
        Self(element.attributes.clone())
    }

    fn take(&mut self, key: &str) -> Option<String> {
        let idx = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(idx).1)
    }

    fn parse<T: FromStr>(&mut self, key: &str) -> Option<T> {
        let idx = self.0.iter().position(|(k, _)| k == key)?;
        match self.0[idx].1.trim().parse() {
            Ok(value) => {
                self.0.remove(idx);
                Some(value)
            }
            Err(_) => {
                log::debug!("Keeping unparseable {}={:?} verbatim", key, self.0[idx].1);
                None
            }
        }
    }

    fn into_extra(self) -> Vec<(String, String)> {
        self.0
    }
}

/// Builds an attribute list, skipping absent fields.
#[derive(Default)]
struct AttrList(Vec<(String, String)>);

impl AttrList {
    fn text(&mut self, key: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value {
            self.0.push((key.to_string(), value.to_string()));
        }
        self
    }

    fn value<T: Display>(&mut self, key: &str, value: Option<T>) -> &mut Self {
        if let Some(value) = value {
            self.0.push((key.to_string(), value.to_string()));
        }
        self
    }

    /// Append preserved attributes that no typed field already wrote.
    fn finish(&mut self, extra: &[(String, String)]) -> Vec<(String, String)> {
        let mut attributes = std::mem::take(&mut self.0);
        for (key, value) in extra {
            if !attributes.iter().any(|(k, _)| k == key) {
                attributes.push((key.clone(), value.clone()));
            }
        }
        attributes
    }
}

fn parse_tags(element: &Element) -> Tags {
    let mut attrs = Attrs::of(element);
    Tags {
        author: attrs.take("Author"),
        title: attrs.take("Title"),
        genre: attrs.take("Genre"),
        album: attrs.take("Album"),
        track_number: attrs.parse("TrackNumber"),
        year: attrs.parse("Year"),
        composer: attrs.take("Composer"),
        grouping: attrs.take("Grouping").map(|g| Grouping::decode(&g)),
        remix: attrs.take("Remix"),
        label: attrs.take("Label"),
        comment: attrs.take("Comment"),
        bpm: attrs.parse("Bpm"),
        key: attrs.take("Key"),
        color: attrs.take("Color"),
        rating: attrs.parse("Rating"),
        flag: attrs.parse("Flag"),
        user2: attrs.take("User2").map(|u| UserTags::decode(&u)),
        extra: attrs.into_extra(),
    }
}

fn write_tags(tags: &Tags) -> Element {
    let mut element = Element::new("Tags");
    element.attributes = AttrList::default()
        .text("Author", tags.author.as_deref())
        .text("Title", tags.title.as_deref())
        .text("Genre", tags.genre.as_deref())
        .text("Album", tags.album.as_deref())
        .value("TrackNumber", tags.track_number)
        .value("Year", tags.year)
        .text("Composer", tags.composer.as_deref())
        .value("Grouping", tags.grouping.as_ref().map(Grouping::encode))
        .text("Remix", tags.remix.as_deref())
        .text("Label", tags.label.as_deref())
        .text("Comment", tags.comment.as_deref())
        .value("Bpm", tags.bpm)
        .text("Key", tags.key.as_deref())
        .text("Color", tags.color.as_deref())
        .value("Rating", tags.rating)
        .value("Flag", tags.flag)
        .value("User2", tags.user2.as_ref().map(UserTags::encode))
        .finish(&tags.extra);
    element
}

fn parse_infos(element: &Element) -> Infos {
    let mut attrs = Attrs::of(element);
    Infos {
        song_length: attrs.parse("SongLength"),
        first_seen: attrs.parse("FirstSeen"),
        last_played: attrs.parse("LastPlay"),
        play_count: attrs.parse("PlayCount"),
        bitrate: attrs.parse("Bitrate"),
        cover: attrs.take("Cover"),
        extra: attrs.into_extra(),
    }
}

fn write_infos(infos: &Infos) -> Element {
    let mut element = Element::new("Infos");
    element.attributes = AttrList::default()
        .value("SongLength", infos.song_length)
        .value("FirstSeen", infos.first_seen)
        .value("LastPlay", infos.last_played)
        .value("PlayCount", infos.play_count)
        .value("Bitrate", infos.bitrate)
        .text("Cover", infos.cover.as_deref())
        .finish(&infos.extra);
    element
}

fn parse_scan(element: &Element) -> Scan {
    let mut attrs = Attrs::of(element);
    Scan {
        bpm: attrs.parse("Bpm"),
        key: attrs.take("Key"),
        volume: attrs.parse("Volume"),
        flag: attrs.parse("Flag"),
        extra: attrs.into_extra(),
    }
}

fn write_scan(scan: &Scan) -> Element {
    let mut element = Element::new("Scan");
    element.attributes = AttrList::default()
        .value("Bpm", scan.bpm)
        .text("Key", scan.key.as_deref())
        .value("Volume", scan.volume)
        .value("Flag", scan.flag)
        .finish(&scan.extra);
    element
}

fn parse_poi(element: &Element) -> Option<Poi> {
    let mut attrs = Attrs::of(element);
    let poi_type = attrs.take("Type").as_deref().and_then(PoiType::from_attr)?;
    Some(Poi {
        poi_type,
        pos: attrs.parse("Pos").unwrap_or(0.0),
        name: attrs.take("Name"),
        num: attrs.parse("Num"),
        size: attrs.parse("Size"),
        point: attrs.parse("Point"),
        bpm: attrs.parse("Bpm"),
        extra: attrs.into_extra(),
    })
}

fn write_poi(poi: &Poi) -> Element {
    let mut element = Element::new("Poi");
    element.attributes = AttrList::default()
        .text("Name", poi.name.as_deref())
        .value("Pos", Some(poi.pos))
        .value("Num", poi.num)
        .value("Size", poi.size)
        .value("Point", poi.point)
        .value("Bpm", poi.bpm)
        .text("Type", Some(poi.poi_type.as_str()))
        .finish(&poi.extra);
    element
}

fn parse_link(element: &Element) -> Option<Link> {
    let mut attrs = Attrs::of(element);
    let source = attrs.take("Source")?;
    Some(Link {
        source,
        extra: attrs.into_extra(),
    })
}

fn write_link(link: &Link) -> Element {
    let mut element = Element::new("Link");
    element.attributes = AttrList::default()
        .text("Source", Some(link.source.as_str()))
        .finish(&link.extra);
    element
}

/// Build a song from a `<Song>` element. Returns `None` without a `FilePath`.
pub(crate) fn parse_song(element: &Element) -> Option<Song> {
    let mut attrs = Attrs::of(element);
    let file_path = attrs.take("FilePath").filter(|p| !p.is_empty())?;
    let mut song = Song::new(file_path);
    song.file_size = attrs.parse("FileSize");
    song.extra = attrs.into_extra();

    for child in element.child_elements() {
        let kind = match child.name.as_str() {
            "Tags" if song.tags.is_none() => {
                song.tags = Some(parse_tags(child));
                ChildKind::Tags
            }
            "Infos" if song.infos.is_none() => {
                song.infos = Some(parse_infos(child));
                ChildKind::Infos
            }
            "Scan" if song.scan.is_none() => {
                song.scan = Some(parse_scan(child));
                ChildKind::Scan
            }
            "Poi" => match parse_poi(child) {
                Some(poi) => {
                    song.pois.push(poi);
                    ChildKind::Poi
                }
                None => {
                    log::debug!(
                        "Keeping POI with unknown type {:?} on {} verbatim",
                        child.attr("Type"),
                        song.file_path
                    );
                    song.unknown_children.push(child.clone());
                    ChildKind::Unknown
                }
            },
            "Link" => match parse_link(child) {
                Some(link) => {
                    song.links.push(link);
                    ChildKind::Link
                }
                None => {
                    song.unknown_children.push(child.clone());
                    ChildKind::Unknown
                }
            },
            _ => {
                song.unknown_children.push(child.clone());
                ChildKind::Unknown
            }
        };
        song.child_order.push(kind);
    }
    Some(song)
}

/// Position after the last child of one of `kinds`, or the start.
fn slot_after(order: &[ChildKind], kinds: &[ChildKind]) -> usize {
    order
        .iter()
        .rposition(|kind| kinds.contains(kind))
        .map_or(0, |idx| idx + 1)
}

fn count_of(order: &[ChildKind], kind: ChildKind) -> usize {
    order.iter().filter(|k| **k == kind).count()
}

/// Child order to write: the order as read, with children added since
/// placed where VirtualDJ puts them (Tags, Infos, Scan, Pois, Links).
fn child_layout(song: &Song) -> Vec<ChildKind> {
    let mut order = song.child_order.clone();

    let records = [
        (ChildKind::Tags, song.tags.is_some(), &[][..]),
        (ChildKind::Infos, song.infos.is_some(), &[ChildKind::Tags][..]),
        (
            ChildKind::Scan,
            song.scan.is_some(),
            &[ChildKind::Tags, ChildKind::Infos][..],
        ),
    ];
    for (kind, present, before) in records {
        if present && !order.contains(&kind) {
            let at = slot_after(&order, before);
            order.insert(at, kind);
        }
    }

    let lists = [
        (
            ChildKind::Poi,
            song.pois.len(),
            &[ChildKind::Tags, ChildKind::Infos, ChildKind::Scan, ChildKind::Poi][..],
        ),
        (
            ChildKind::Link,
            song.links.len(),
            &[
                ChildKind::Tags,
                ChildKind::Infos,
                ChildKind::Scan,
                ChildKind::Poi,
                ChildKind::Link,
            ][..],
        ),
    ];
    for (kind, len, before) in lists {
        let missing = len.saturating_sub(count_of(&order, kind));
        let at = slot_after(&order, before);
        order.splice(at..at, std::iter::repeat(kind).take(missing));
    }

    let missing = song
        .unknown_children
        .len()
        .saturating_sub(count_of(&order, ChildKind::Unknown));
    order.extend(std::iter::repeat(ChildKind::Unknown).take(missing));
    order
}

/// Rebuild the `<Song>` element for a song.
pub(crate) fn write_song(song: &Song) -> Element {
    let mut element = Element::new(SONG);
    element.attributes = AttrList::default()
        .text("FilePath", Some(song.file_path.as_str()))
        .value("FileSize", song.file_size)
        .finish(&song.extra);

    let mut pois = song.pois.iter();
    let mut links = song.links.iter();
    let mut unknown = song.unknown_children.iter();
    let mut written = Vec::new();
    for kind in child_layout(song) {
        // Each record is written once even if the order repeats it.
        if matches!(kind, ChildKind::Tags | ChildKind::Infos | ChildKind::Scan) {
            if written.contains(&kind) {
                continue;
            }
            written.push(kind);
        }
        let child = match kind {
            ChildKind::Tags => song.tags.as_ref().map(write_tags),
            ChildKind::Infos => song.infos.as_ref().map(write_infos),
            ChildKind::Scan => song.scan.as_ref().map(write_scan),
            ChildKind::Poi => pois.next().map(write_poi),
            ChildKind::Link => links.next().map(write_link),
            ChildKind::Unknown => unknown.next().cloned(),
        };
        if let Some(child) = child {
            element.push_element(child);
        }
    }
    element
}
