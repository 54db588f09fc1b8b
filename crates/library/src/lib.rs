//! VirtualDJ database library
//!
//! Reading, editing and atomically saving VirtualDJ `database.xml` files.
//!
//! # Features
//!
//! - Typed song model (tags, infos, scan, cue points) over the XML document
//! - Energy and mood tags decoded from their legacy text encodings
//! - Unknown attributes and elements preserved through a save
//! - Timestamped backups, Windows path remapping and directory import
//! - Validation, duplicate detection and merging of databases

mod codec;
pub mod backup;
pub mod database;
pub mod duplicates;
pub mod error;
pub mod import;
pub mod remap;
pub mod types;
pub mod update;
pub mod validator;
pub mod xml;

// Re-export main types
pub use backup::BackupManager;
pub use database::VdjDatabase;
pub use duplicates::{find_all_duplicates, DuplicateGroup, DuplicateReport};
pub use error::{DatabaseError, Result};
pub use import::{import_files, scan_directory, ImportSummary};
pub use remap::{PathRemapper, RemapEntry, RemapSummary};
pub use types::{
    ChildKind, DatabaseStats, EnergyTag, Grouping, Infos, Link, MergeStats, Playlist, Poi,
    PoiType, Scan, Song, Tags, UserTags,
};
pub use update::{InfosUpdate, Patch, ScanUpdate, TagsUpdate};
pub use validator::{validate, EntryCategory, ValidationReport};
