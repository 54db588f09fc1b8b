//! In-memory VirtualDJ database with atomic persistence.
//!
//! The typed song model is authoritative while the database is open. The
//! XML tree is rebuilt from it only when saving, so lookups and edits never
//! touch the tree.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use vdjm_core::atomic::write_atomic;

use crate::codec::{self, PLAYLIST, SONG};
use crate::error::{DatabaseError, Result};
use crate::types::{
    is_audio_path, DatabaseStats, Infos, MergeStats, Playlist, Poi, Scan, Song, Tags,
};
use crate::update::{InfosUpdate, Patch, ScanUpdate, TagsUpdate};
use crate::xml::{self, Element, Node};

const ROOT_NAME: &str = "VirtualDJ_Database";

/// Top-level child of the root element, in document order.
#[derive(Debug, Clone)]
enum RootEntry {
    /// Index into `Document::songs`.
    Song(usize),
    /// Anything else (playlists, unreadable songs), kept verbatim.
    Other(Element),
}

#[derive(Debug, Clone)]
struct Document {
    root_name: String,
    root_attributes: Vec<(String, String)>,
    layout: Vec<RootEntry>,
    /// Slots; removed songs leave `None` behind.
    songs: Vec<Option<Song>>,
    index: HashMap<String, usize>,
}

impl Document {
    fn empty() -> Self {
        Self {
            root_name: ROOT_NAME.to_string(),
            root_attributes: vec![("Version".to_string(), "8".to_string())],
            layout: Vec::new(),
            songs: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn from_root(root: Element) -> Self {
        let mut document = Self {
            root_name: root.name,
            root_attributes: root.attributes,
            layout: Vec::new(),
            songs: Vec::new(),
            index: HashMap::new(),
        };

        for node in root.children {
            let Node::Element(element) = node else {
                continue;
            };
            if element.name != SONG {
                document.layout.push(RootEntry::Other(element));
                continue;
            }
            match codec::parse_song(&element) {
                // The first entry for a path wins.
                Some(song) if document.index.contains_key(&song.file_path) => {
                    log::warn!("Dropping duplicate song entry: {}", song.file_path);
                }
                Some(song) => {
                    document.push_song(song);
                }
                None => {
                    log::warn!("Song element without FilePath kept as-is");
                    document.layout.push(RootEntry::Other(element));
                }
            }
        }
        document
    }

    fn push_song(&mut self, song: Song) -> &Song {
        let slot = self.songs.len();
        self.index.insert(song.file_path.clone(), slot);
        self.layout.push(RootEntry::Song(slot));
        self.songs.push(None);
        self.songs[slot].insert(song)
    }

    fn song(&self, path: &str) -> Option<&Song> {
        let slot = *self.index.get(path)?;
        self.songs.get(slot).and_then(Option::as_ref)
    }

    fn song_mut(&mut self, path: &str) -> Option<&mut Song> {
        let slot = *self.index.get(path)?;
        self.songs.get_mut(slot).and_then(Option::as_mut)
    }

    fn to_root(&self) -> Element {
        let mut root = Element::new(self.root_name.clone());
        root.attributes = self.root_attributes.clone();
        for entry in &self.layout {
            match entry {
                RootEntry::Song(slot) => {
                    if let Some(Some(song)) = self.songs.get(*slot) {
                        root.push_element(codec::write_song(song));
                    }
                }
                RootEntry::Other(element) => root.push_element(element.clone()),
            }
        }
        root
    }
}

fn collect_song_paths(element: &Element, out: &mut Vec<String>) {
    for child in element.child_elements() {
        if child.name == SONG {
            if let Some(path) = child.attr("FilePath").filter(|p| !p.is_empty()) {
                out.push(path.to_string());
            }
        }
        collect_song_paths(child, out);
    }
}

/// A VirtualDJ `database.xml` file.
///
/// Every operation other than [`new`](Self::new), [`load`](Self::load) and
/// [`is_loaded`](Self::is_loaded) fails with [`DatabaseError::NotLoaded`]
/// until the database has been loaded.
pub struct VdjDatabase {
    path: PathBuf,
    document: Option<Document>,
}

impl VdjDatabase {
    /// Create an unloaded database bound to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: None,
        }
    }

    /// Create a loaded, empty database that will be written to `path`.
    pub fn create_empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: Some(Document::empty()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.document.is_some()
    }

    fn document(&self) -> Result<&Document> {
        self.document.as_ref().ok_or(DatabaseError::NotLoaded)
    }

    fn document_mut(&mut self) -> Result<&mut Document> {
        self.document.as_mut().ok_or(DatabaseError::NotLoaded)
    }

    /// Parse the database file and build the path index.
    pub fn load(&mut self) -> Result<()> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DatabaseError::NotFound(self.path.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        let root = xml::parse(&bytes).map_err(|e| DatabaseError::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        let document = Document::from_root(root);

        log::info!(
            "Loaded {} songs from {}",
            document.index.len(),
            self.path.display()
        );
        self.document = Some(document);
        Ok(())
    }

    /// Discard in-memory changes and load the file again.
    pub fn reload(&mut self) -> Result<()> {
        self.document()?;
        self.load()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.document()?.index.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&self, file_path: &str) -> Result<bool> {
        Ok(self.document()?.index.contains_key(file_path))
    }

    /// Songs in document order.
    pub fn iter_songs(&self) -> Result<impl Iterator<Item = &Song> + '_> {
        Ok(self.document()?.songs.iter().flatten())
    }

    pub fn get_song(&self, file_path: &str) -> Result<Option<&Song>> {
        Ok(self.document()?.song(file_path))
    }

    /// Add a new song. Fails with [`DatabaseError::DuplicatePath`] if the
    /// path is already present.
    pub fn add_song(&mut self, file_path: &str, file_size: Option<u64>) -> Result<&Song> {
        let document = self.document_mut()?;
        if document.index.contains_key(file_path) {
            return Err(DatabaseError::DuplicatePath(file_path.to_string()));
        }
        let mut song = Song::new(file_path);
        song.file_size = file_size;
        log::debug!("Added song {}", file_path);
        Ok(document.push_song(song))
    }

    /// Remove a song. Returns `false` if the path is not present.
    pub fn remove_song(&mut self, file_path: &str) -> Result<bool> {
        let document = self.document_mut()?;
        let Some(slot) = document.index.remove(file_path) else {
            return Ok(false);
        };
        if let Some(entry) = document.songs.get_mut(slot) {
            *entry = None;
        }
        log::debug!("Removed song {}", file_path);
        Ok(true)
    }

    /// Apply a partial tag update, creating `Tags` if needed.
    pub fn update_song_tags(&mut self, file_path: &str, update: TagsUpdate) -> Result<bool> {
        let Some(song) = self.document_mut()?.song_mut(file_path) else {
            return Ok(false);
        };
        update.apply(song.tags.get_or_insert_with(Tags::default));
        Ok(true)
    }

    /// Apply a partial update to `Infos`, creating it if needed.
    pub fn update_song_infos(&mut self, file_path: &str, update: InfosUpdate) -> Result<bool> {
        let Some(song) = self.document_mut()?.song_mut(file_path) else {
            return Ok(false);
        };
        update.apply(song.infos.get_or_insert_with(Infos::default));
        Ok(true)
    }

    /// Apply a partial update to `Scan`, creating it if needed.
    pub fn update_song_scan(&mut self, file_path: &str, update: ScanUpdate) -> Result<bool> {
        let Some(song) = self.document_mut()?.song_mut(file_path) else {
            return Ok(false);
        };
        update.apply(song.scan.get_or_insert_with(Scan::default));
        Ok(true)
    }

    /// Replace all points of interest of a song.
    pub fn set_song_pois(&mut self, file_path: &str, pois: Vec<Poi>) -> Result<bool> {
        let Some(song) = self.document_mut()?.song_mut(file_path) else {
            return Ok(false);
        };
        song.pois = pois;
        Ok(true)
    }

    /// Rename a song's path, keeping everything else.
    ///
    /// Returns `false` if `old_path` is not present and fails with
    /// [`DatabaseError::DuplicatePath`] if `new_path` is already taken.
    pub fn remap_path(&mut self, old_path: &str, new_path: &str) -> Result<bool> {
        let document = self.document_mut()?;
        if !document.index.contains_key(old_path) {
            return Ok(false);
        }
        if old_path == new_path {
            return Ok(true);
        }
        if document.index.contains_key(new_path) {
            return Err(DatabaseError::DuplicatePath(new_path.to_string()));
        }

        if let Some(slot) = document.index.remove(old_path) {
            if let Some(Some(song)) = document.songs.get_mut(slot) {
                song.file_path = new_path.to_string();
            }
            document.index.insert(new_path.to_string(), slot);
        }
        log::debug!("Remapped {} -> {}", old_path, new_path);
        Ok(true)
    }

    /// Merge songs from another loaded database.
    ///
    /// Songs missing here are copied whole. With `prefer_other`, an existing
    /// song also takes the other side's `Grouping`/`Comment` when it has no
    /// tags or no energy yet, and its `Scan` BPM/key when it has no BPM.
    pub fn merge_from(&mut self, other: &VdjDatabase, prefer_other: bool) -> Result<MergeStats> {
        let incoming = other.document()?;
        let document = self.document_mut()?;
        let mut stats = MergeStats::default();

        for song in incoming.songs.iter().flatten() {
            if !document.index.contains_key(&song.file_path) {
                document.push_song(song.clone());
                stats.added += 1;
                continue;
            }
            if !prefer_other {
                stats.skipped += 1;
                continue;
            }
            let Some(existing) = document.song_mut(&song.file_path) else {
                continue;
            };

            let mut updated = false;
            if let Some(tags) = &song.tags {
                let needs_energy = tags.energy_level().is_some() && existing.energy().is_none();
                if existing.tags.is_none() || needs_energy {
                    let update = TagsUpdate {
                        grouping: Patch::from_option(tags.grouping.clone()),
                        comment: Patch::from_option(tags.comment.clone()),
                        ..Default::default()
                    };
                    update.apply(existing.tags.get_or_insert_with(Tags::default));
                    updated = true;
                }
            }
            if let Some(scan) = song.scan.as_ref().filter(|s| s.bpm.is_some_and(|b| b != 0.0)) {
                let has_bpm = existing
                    .scan
                    .as_ref()
                    .is_some_and(|s| s.bpm.is_some_and(|b| b != 0.0));
                if !has_bpm {
                    let update = ScanUpdate {
                        bpm: Patch::from_option(scan.bpm),
                        key: Patch::from_option(scan.key.clone()),
                        ..Default::default()
                    };
                    update.apply(existing.scan.get_or_insert_with(Scan::default));
                    updated = true;
                }
            }

            if updated {
                stats.updated += 1;
            } else {
                stats.skipped += 1;
            }
        }

        log::info!(
            "Merged from {}: {} added, {} updated, {} skipped",
            other.path.display(),
            stats.added,
            stats.updated,
            stats.skipped
        );
        Ok(stats)
    }

    /// Playlists stored alongside the songs.
    pub fn playlists(&self) -> Result<Vec<Playlist>> {
        let document = self.document()?;
        let playlists = document
            .layout
            .iter()
            .filter_map(|entry| match entry {
                RootEntry::Other(element) if element.name == PLAYLIST => Some(element),
                _ => None,
            })
            .filter_map(|element| {
                let name = element.attr("Name").filter(|n| !n.is_empty())?;
                let mut file_paths = Vec::new();
                collect_song_paths(element, &mut file_paths);
                Some(Playlist {
                    name: name.to_string(),
                    file_paths,
                })
            })
            .collect();
        Ok(playlists)
    }

    /// Count songs by location, type and metadata.
    ///
    /// With `check_existence`, local paths are also checked on disk.
    pub fn get_stats(&self, check_existence: bool) -> Result<DatabaseStats> {
        let mut stats = DatabaseStats::default();

        for song in self.iter_songs()? {
            stats.total_songs += 1;

            if song.is_netsearch() {
                stats.netsearch += 1;
            } else if song.is_windows_path() {
                stats.windows_paths += 1;
                match song.file_path.bytes().next().map(|b| b.to_ascii_uppercase()) {
                    Some(b'C') => stats.windows_c_paths += 1,
                    Some(b'D') => stats.windows_d_paths += 1,
                    Some(b'E') => stats.windows_e_paths += 1,
                    _ => {}
                }
            } else {
                stats.local_files += 1;
                if song.file_path.starts_with("/Users/") {
                    stats.mac_home_paths += 1;
                } else if song.file_path.starts_with("/Volumes/MyNVMe") {
                    stats.mynvme_paths += 1;
                }
            }

            if is_audio_path(&song.file_path) {
                stats.audio_files += 1;
            } else if !song.is_netsearch() {
                stats.non_audio_files += 1;
            }

            if song.energy().is_some() {
                stats.with_energy += 1;
            }
            if song.cue_points().next().is_some() {
                stats.with_cue_points += 1;
            }

            if check_existence && song.is_local() && !Path::new(&song.file_path).exists() {
                stats.missing_files += 1;
            }
        }

        Ok(stats)
    }

    /// Serialize the database to VirtualDJ's XML layout.
    pub fn to_xml(&self) -> Result<String> {
        Ok(xml::to_string(&self.document()?.to_root()))
    }

    /// Write the database back to its own path.
    pub fn save(&self) -> Result<()> {
        self.save_as(&self.path)
    }

    /// Write the database to `target` atomically.
    pub fn save_as(&self, target: &Path) -> Result<()> {
        let content = self.to_xml()?;
        write_atomic(target, content.as_bytes())?;
        log::info!(
            "Saved {} songs to {}",
            self.document()?.index.len(),
            target.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::types::{EnergyTag, PoiType};
    use crate::update::Patch;

    const SAMPLE: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\r\n\
<VirtualDJ_Database Version=\"2024\">\r\n\
 <Song FilePath=\"/Music/a.mp3\" FileSize=\"100\">\r\n\
  <Tags Author=\"A\" Title=\"One\" Grouping=\"Energy 7\" />\r\n\
  <Poi Pos=\"1.5\" Num=\"1\" Type=\"cue\" />\r\n\
 </Song>\r\n\
 <Song FilePath=\"D:\\Music\\b.mp3\" />\r\n\
 <Song FilePath=\"netsearch://dz123\" />\r\n\
 <Song FilePath=\"/Music/cover.jpg\" />\r\n\
 <MyList Name=\"Warmup\">\r\n\
  <Song FilePath=\"/Music/a.mp3\" />\r\n\
 </MyList>\r\n\
</VirtualDJ_Database>\r\n";

    fn loaded(dir: &TempDir) -> VdjDatabase {
        let path = dir.path().join("database.xml");
        fs::write(&path, SAMPLE).unwrap();
        let mut db = VdjDatabase::new(&path);
        db.load().unwrap();
        db
    }

    #[test]
    fn test_not_loaded() {
        let mut db = VdjDatabase::new("/nowhere/database.xml");
        assert!(!db.is_loaded());
        assert!(matches!(db.len(), Err(DatabaseError::NotLoaded)));
        assert!(matches!(db.get_song("/x"), Err(DatabaseError::NotLoaded)));
        assert!(matches!(
            db.update_song_tags("/x", TagsUpdate::default()),
            Err(DatabaseError::NotLoaded)
        ));
        assert!(matches!(db.save(), Err(DatabaseError::NotLoaded)));
        assert!(matches!(db.load(), Err(DatabaseError::NotFound(_))));
    }

    #[test]
    fn test_load_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("database.xml");
        fs::write(&path, "<VirtualDJ_Database><Song></VirtualDJ_Database>").unwrap();
        let mut db = VdjDatabase::new(&path);
        assert!(matches!(db.load(), Err(DatabaseError::Parse { .. })));
        assert!(!db.is_loaded());
    }

    #[test]
    fn test_load_and_lookup() {
        let dir = TempDir::new().unwrap();
        let db = loaded(&dir);

        assert_eq!(db.len().unwrap(), 4);
        let song = db.get_song("/Music/a.mp3").unwrap().unwrap();
        assert_eq!(song.energy(), Some(7));
        assert_eq!(song.file_size, Some(100));
        assert!(db.get_song("/Music/missing.mp3").unwrap().is_none());

        let order: Vec<&str> = db
            .iter_songs()
            .unwrap()
            .map(|s| s.file_path.as_str())
            .collect();
        assert_eq!(order[0], "/Music/a.mp3");
        assert_eq!(order[3], "/Music/cover.jpg");
    }

    #[test]
    fn test_playlists() {
        let dir = TempDir::new().unwrap();
        let db = loaded(&dir);
        let playlists = db.playlists().unwrap();
        assert_eq!(playlists.len(), 1);
        assert_eq!(playlists[0].name, "Warmup");
        assert_eq!(playlists[0].file_paths, vec!["/Music/a.mp3".to_string()]);
    }

    #[test]
    fn test_add_remove() {
        let dir = TempDir::new().unwrap();
        let mut db = loaded(&dir);

        db.add_song("/Music/new.flac", Some(42)).unwrap();
        assert!(db.contains("/Music/new.flac").unwrap());
        assert!(matches!(
            db.add_song("/Music/new.flac", None),
            Err(DatabaseError::DuplicatePath(_))
        ));

        assert!(db.remove_song("/Music/new.flac").unwrap());
        assert!(!db.remove_song("/Music/new.flac").unwrap());
        assert!(db.get_song("/Music/new.flac").unwrap().is_none());
        assert_eq!(db.len().unwrap(), 4);
    }

    #[test]
    fn test_update_creates_sub_records() {
        let dir = TempDir::new().unwrap();
        let mut db = loaded(&dir);

        let update = TagsUpdate {
            rating: Patch::Set(5),
            ..TagsUpdate::energy(EnergyTag::new(3).unwrap())
        };
        assert!(db.update_song_tags("/Music/cover.jpg", update).unwrap());
        assert!(!db
            .update_song_tags("/Music/missing.mp3", TagsUpdate::default())
            .unwrap());

        let song = db.get_song("/Music/cover.jpg").unwrap().unwrap();
        let tags = song.tags.as_ref().unwrap();
        assert_eq!(tags.rating, Some(5));
        assert_eq!(song.energy(), Some(3));

        let mut scan = ScanUpdate::default();
        scan.set_attribute("Bpm", Some("0.5")).unwrap();
        assert!(db.update_song_scan("/Music/cover.jpg", scan).unwrap());
        let mut infos = InfosUpdate::default();
        infos.set_attribute("PlayCount", Some("4")).unwrap();
        assert!(db.update_song_infos("/Music/cover.jpg", infos).unwrap());

        let song = db.get_song("/Music/cover.jpg").unwrap().unwrap();
        assert!((song.actual_bpm().unwrap() - 120.0).abs() < 1e-9);
        assert_eq!(song.infos.as_ref().unwrap().play_count, Some(4));
    }

    #[test]
    fn test_set_pois() {
        let dir = TempDir::new().unwrap();
        let mut db = loaded(&dir);
        let pois = vec![Poi::cue(1, 0.0), Poi::looped(32.0, 8.0)];
        assert!(db.set_song_pois("/Music/a.mp3", pois).unwrap());
        let song = db.get_song("/Music/a.mp3").unwrap().unwrap();
        assert_eq!(song.loops().count(), 1);
        assert_eq!(song.pois[0].poi_type, PoiType::Cue);
    }

    #[test]
    fn test_remap_path() {
        let dir = TempDir::new().unwrap();
        let mut db = loaded(&dir);

        assert!(db.remap_path("D:\\Music\\b.mp3", "/Volumes/Music/b.mp3").unwrap());
        assert!(db.get_song("D:\\Music\\b.mp3").unwrap().is_none());
        assert_eq!(
            db.get_song("/Volumes/Music/b.mp3").unwrap().unwrap().file_path,
            "/Volumes/Music/b.mp3"
        );
        assert!(!db.remap_path("/nope.mp3", "/other.mp3").unwrap());
        assert!(matches!(
            db.remap_path("/Music/a.mp3", "/Volumes/Music/b.mp3"),
            Err(DatabaseError::DuplicatePath(_))
        ));
        assert_eq!(db.len().unwrap(), 4);
    }

    #[test]
    fn test_stats() {
        let dir = TempDir::new().unwrap();
        let db = loaded(&dir);
        let stats = db.get_stats(true).unwrap();

        assert_eq!(stats.total_songs, 4);
        assert_eq!(stats.local_files, 2);
        assert_eq!(stats.windows_paths, 1);
        assert_eq!(stats.netsearch, 1);
        assert_eq!(stats.audio_files, 2);
        assert_eq!(stats.non_audio_files, 1);
        assert_eq!(stats.with_energy, 1);
        assert_eq!(stats.with_cue_points, 1);
        assert_eq!(stats.missing_files, 2);
        assert_eq!(stats.windows_d_paths, 1);
        assert_eq!(stats.windows_c_paths, 0);
        assert_eq!(stats.mac_home_paths, 0);

        assert_eq!(db.get_stats(false).unwrap().missing_files, 0);
    }

    #[test]
    fn test_stats_location_breakdown() {
        let dir = TempDir::new().unwrap();
        let mut db = VdjDatabase::create_empty(dir.path().join("database.xml"));
        for path in [
            "C:\\Music\\a.mp3",
            "c:/Music/b.mp3",
            "D:\\c.mp3",
            "E:\\d.mp3",
            "F:\\e.mp3",
            "/Users/me/Music/f.mp3",
            "/Volumes/MyNVMe/Music/g.mp3",
            "/Volumes/Other/h.mp3",
        ] {
            db.add_song(path, None).unwrap();
        }

        let stats = db.get_stats(false).unwrap();
        assert_eq!(stats.windows_paths, 5);
        assert_eq!(stats.windows_c_paths, 2);
        assert_eq!(stats.windows_d_paths, 1);
        assert_eq!(stats.windows_e_paths, 1);
        assert_eq!(stats.local_files, 3);
        assert_eq!(stats.mac_home_paths, 1);
        assert_eq!(stats.mynvme_paths, 1);
    }

    #[test]
    fn test_duplicate_entries_collapse_to_first() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("database.xml");
        fs::write(
            &path,
            "<VirtualDJ_Database>\r\n <Song FilePath=\"/a.mp3\" FileSize=\"1\" />\r\n \
             <Song FilePath=\"/a.mp3\" FileSize=\"2\" />\r\n</VirtualDJ_Database>",
        )
        .unwrap();
        let mut db = VdjDatabase::new(&path);
        db.load().unwrap();
        assert_eq!(db.len().unwrap(), 1);
        assert_eq!(db.get_song("/a.mp3").unwrap().unwrap().file_size, Some(1));

        assert!(db.remove_song("/a.mp3").unwrap());
        db.save().unwrap();
        db.reload().unwrap();
        assert!(!db.contains("/a.mp3").unwrap());
        assert!(!fs::read_to_string(&path).unwrap().contains("/a.mp3"));
    }

    #[test]
    fn test_merge_from() {
        let dir = TempDir::new().unwrap();
        let mut db = loaded(&dir);
        db.add_song("/Music/plain.mp3", None).unwrap();

        let mut other = VdjDatabase::create_empty(dir.path().join("other.xml"));
        other.add_song("/Music/a.mp3", None).unwrap();
        other.add_song("/Music/plain.mp3", None).unwrap();
        other.add_song("/Music/fresh.mp3", Some(9)).unwrap();
        other
            .update_song_tags("/Music/a.mp3", TagsUpdate::energy(EnergyTag::new(2).unwrap()))
            .unwrap();
        let tags = TagsUpdate {
            comment: Patch::Set("from other".to_string()),
            ..TagsUpdate::energy(EnergyTag::new(5).unwrap())
        };
        other.update_song_tags("/Music/plain.mp3", tags).unwrap();
        let mut scan = ScanUpdate::default();
        scan.set_attribute("Bpm", Some("0.5")).unwrap();
        scan.set_attribute("Key", Some("Am")).unwrap();
        other.update_song_scan("/Music/plain.mp3", scan).unwrap();

        let mut keep_ours = loaded(&dir);
        keep_ours.add_song("/Music/plain.mp3", None).unwrap();
        let stats = keep_ours.merge_from(&other, false).unwrap();
        assert_eq!(
            stats,
            MergeStats {
                added: 1,
                updated: 0,
                skipped: 2
            }
        );
        assert_eq!(keep_ours.get_song("/Music/plain.mp3").unwrap().unwrap().energy(), None);

        let stats = db.merge_from(&other, true).unwrap();
        assert_eq!(
            stats,
            MergeStats {
                added: 1,
                updated: 1,
                skipped: 1
            }
        );
        // Energy already present here is not overwritten.
        assert_eq!(db.get_song("/Music/a.mp3").unwrap().unwrap().energy(), Some(7));

        let plain = db.get_song("/Music/plain.mp3").unwrap().unwrap();
        assert_eq!(plain.energy(), Some(5));
        assert_eq!(
            plain.tags.as_ref().unwrap().comment.as_deref(),
            Some("from other")
        );
        assert!((plain.actual_bpm().unwrap() - 120.0).abs() < 1e-9);
        assert_eq!(plain.scan.as_ref().unwrap().key.as_deref(), Some("Am"));

        let fresh = db.get_song("/Music/fresh.mp3").unwrap().unwrap();
        assert_eq!(fresh.file_size, Some(9));

        let unloaded = VdjDatabase::new(dir.path().join("none.xml"));
        assert!(matches!(
            db.merge_from(&unloaded, true),
            Err(DatabaseError::NotLoaded)
        ));
    }

    #[test]
    fn test_save_layout() {
        let dir = TempDir::new().unwrap();
        let db = loaded(&dir);
        db.save().unwrap();

        let written = fs::read_to_string(db.path()).unwrap();
        assert!(written.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\r\n"));
        assert!(written.contains("\r\n <Song FilePath=\"/Music/a.mp3\" FileSize=\"100\">\r\n"));
        assert!(!written.replace("\r\n", "").contains('\n'));
        assert!(written.contains("<MyList Name=\"Warmup\">"));
    }

    #[test]
    fn test_reload_discards_changes() {
        let dir = TempDir::new().unwrap();
        let mut db = loaded(&dir);
        db.remove_song("/Music/a.mp3").unwrap();
        db.reload().unwrap();
        assert!(db.contains("/Music/a.mp3").unwrap());
    }

    #[test]
    fn test_create_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("new.xml");
        let mut db = VdjDatabase::create_empty(&path);
        db.add_song("/Music/x.mp3", None).unwrap();
        db.save().unwrap();

        let mut reopened = VdjDatabase::new(&path);
        reopened.load().unwrap();
        assert_eq!(reopened.len().unwrap(), 1);
    }
}
