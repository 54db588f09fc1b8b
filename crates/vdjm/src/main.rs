use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use vdjm_core::{
    AnalysisCache, CheckpointStore, ConfigManager, MeasurementCache, Settings, TaskType,
};
use vdjm_library::validator::{find_missing_files, find_non_audio_entries, remove_entries};
use vdjm_library::{
    find_all_duplicates, import_files, scan_directory, validate, BackupManager, EnergyTag, Patch,
    PathRemapper, Song, TagsUpdate, VdjDatabase,
};

/// Paths listed before "... and N more".
const LIST_LIMIT: usize = 20;

/// Maintenance tool for VirtualDJ databases.
#[derive(Parser, Debug)]
#[command(name = "vdjm")]
#[command(about = "VirtualDJ database manager")]
struct Args {
    /// Configuration file (default: ~/.vdj_manager/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the configured one
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show database statistics
    Stats {
        /// Check whether local files exist
        #[arg(long)]
        check_files: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Read or edit song tags
    #[command(subcommand)]
    Tag(TagCommand),

    /// Rewrite Windows paths using prefix mappings
    Remap {
        /// Only list detected Windows prefixes
        #[arg(long)]
        detect: bool,

        /// Extra mapping source prefix (e.g. "D:/Music/")
        #[arg(long, requires = "to")]
        from: Option<String>,

        /// Extra mapping target prefix (e.g. "/Volumes/Music/")
        #[arg(long, requires = "from")]
        to: Option<String>,

        /// Print the plan without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Remap even when the target file does not exist
        #[arg(long)]
        include_missing: bool,
    },

    /// Check file existence and entry types
    Validate {
        /// List missing and non-audio files and the extension breakdown
        #[arg(short, long)]
        verbose: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove invalid entries from the database
    Clean {
        /// Remove non-audio entries (zip, mp4, etc.)
        #[arg(long)]
        non_audio: bool,

        /// Remove entries whose file is missing
        #[arg(long)]
        missing: bool,

        /// Show what would be removed without removing
        #[arg(long)]
        dry_run: bool,
    },

    /// Find duplicate entries
    Duplicates {
        /// Also find exact duplicates by file hash (slow)
        #[arg(long)]
        by_hash: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Merge songs from another database file
    Merge {
        other: PathBuf,

        /// Never change songs already in this database
        #[arg(long)]
        keep_ours: bool,

        /// Report the merge without saving
        #[arg(long)]
        dry_run: bool,
    },

    /// Add audio files from a directory
    Import {
        directory: PathBuf,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Manage database backups
    #[command(subcommand)]
    Backup(BackupCommand),

    /// Manage batch task checkpoints
    #[command(subcommand)]
    Checkpoints(CheckpointCommand),

    /// Manage the measurement and analysis caches
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
enum TagCommand {
    /// Show one song
    Show { file: String },

    /// Set the energy level (1-10)
    Energy {
        file: String,
        #[arg(value_parser = clap::value_parser!(u8).range(1..=10))]
        level: u8,
    },

    /// Replace the mood hashtags
    Mood {
        file: String,
        #[arg(required = true)]
        moods: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum BackupCommand {
    /// Back up the database now
    Create {
        #[arg(long)]
        label: Option<String>,
    },
    /// List backups, newest first
    List,
    /// Restore a backup over the database (latest if none is given)
    Restore { backup: Option<PathBuf> },
    /// Delete old backups
    Cleanup {
        /// Number of backups to keep (default: configured backup_keep)
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[derive(Subcommand, Debug)]
enum CheckpointCommand {
    /// List all checkpoints
    List {
        /// Only tasks of this type (normalize, measure, analyze_energy, analyze_mood)
        #[arg(long, value_parser = parse_task_type)]
        task_type: Option<TaskType>,
    },
    /// List paused or interrupted tasks
    Resumable,
    /// Delete finished checkpoints older than the given age
    Cleanup {
        #[arg(long)]
        max_age_days: Option<u32>,
    },
    /// Delete one checkpoint
    Delete { task_id: String },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Entry counts and file sizes
    Stats,
    /// Remove every entry
    Clear,
    /// Remove the entries of one file
    Invalidate { file: String },
    /// Remove entries whose file changed or disappeared
    Purge,
}

fn parse_task_type(value: &str) -> Result<TaskType, String> {
    TaskType::parse(value).ok_or_else(|| format!("unknown task type: {}", value))
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = ConfigManager::new(args.config);
    let settings = config.load()?;
    let database_path = args
        .database
        .unwrap_or_else(|| settings.database_path.clone());
    log::debug!(
        "Using database {} and config {}",
        database_path.display(),
        config.config_path().display()
    );

    match args.command {
        Command::Stats { check_files, json } => stats(&database_path, check_files, json),
        Command::Tag(command) => tag(&settings, &database_path, command),
        Command::Remap {
            detect,
            from,
            to,
            dry_run,
            include_missing,
        } => {
            let mut remapper = PathRemapper::with_mappings(&settings.path_mappings);
            if let (Some(from), Some(to)) = (from, to) {
                remapper.add_mapping(&from, to);
            }
            remap(
                &settings,
                &database_path,
                &remapper,
                detect,
                dry_run,
                include_missing,
            )
        }
        Command::Validate { verbose, json } => validate_database(&database_path, verbose, json),
        Command::Clean {
            non_audio,
            missing,
            dry_run,
        } => clean(&settings, &database_path, non_audio, missing, dry_run),
        Command::Duplicates { by_hash, json } => duplicates(&database_path, by_hash, json),
        Command::Merge {
            other,
            keep_ours,
            dry_run,
        } => merge(&settings, &database_path, &other, !keep_ours, dry_run),
        Command::Import {
            directory,
            recursive,
        } => import(&settings, &database_path, &directory, recursive),
        Command::Backup(command) => backup(&settings, &database_path, command),
        Command::Checkpoints(command) => checkpoints(&settings, command),
        Command::Cache(command) => cache(&settings, command),
    }
}

fn open_database(path: &Path) -> Result<VdjDatabase, anyhow::Error> {
    let mut db = VdjDatabase::new(path);
    db.load()
        .with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(db)
}

/// Back up the file on disk, then write the in-memory database over it.
fn save_with_backup(
    settings: &Settings,
    db: &VdjDatabase,
    label: &str,
) -> Result<(), anyhow::Error> {
    let backups = BackupManager::new(&settings.backup_dir);
    backups.create_backup(db.path(), Some(label))?;
    db.save()?;
    backups.cleanup_old_backups(settings.backup_keep)?;
    Ok(())
}

fn stats(database_path: &Path, check_files: bool, json: bool) -> Result<(), anyhow::Error> {
    let db = open_database(database_path)?;
    let stats = db.get_stats(check_files)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Database: {}", database_path.display());
    println!("Songs:          {}", stats.total_songs);
    println!("  local:        {}", stats.local_files);
    println!("    /Users:     {}", stats.mac_home_paths);
    println!("    MyNVMe:     {}", stats.mynvme_paths);
    println!("  windows:      {}", stats.windows_paths);
    println!("    C:          {}", stats.windows_c_paths);
    println!("    D:          {}", stats.windows_d_paths);
    println!("    E:          {}", stats.windows_e_paths);
    println!("  netsearch:    {}", stats.netsearch);
    println!("Audio files:    {}", stats.audio_files);
    println!("Non-audio:      {}", stats.non_audio_files);
    println!("With energy:    {}", stats.with_energy);
    println!("With cues:      {}", stats.with_cue_points);
    if check_files {
        println!("Missing files:  {}", stats.missing_files);
    }
    println!("Playlists:      {}", db.playlists()?.len());
    Ok(())
}

fn print_paths<S: AsRef<str>>(paths: &[S]) {
    for path in paths.iter().take(LIST_LIMIT) {
        println!("  {}", path.as_ref());
    }
    if paths.len() > LIST_LIMIT {
        println!("  ... and {} more", paths.len() - LIST_LIMIT);
    }
}

fn validate_database(database_path: &Path, verbose: bool, json: bool) -> Result<(), anyhow::Error> {
    let db = open_database(database_path)?;
    let report = validate(db.iter_songs()?);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Validation report for {}", database_path.display());
    println!("Total entries:          {}", report.total);
    println!("Audio files (valid):    {}", report.audio_valid);
    println!("Audio files (missing):  {}", report.audio_missing);
    println!("Non-audio entries:      {}", report.non_audio);
    println!("Unknown extensions:     {}", report.unknown);
    println!("Windows paths:          {}", report.windows_paths);
    println!("Netsearch entries:      {}", report.netsearch);

    if verbose && !report.extensions.is_empty() {
        println!("\nExtensions:");
        for (extension, count) in report.extensions.iter().take(15) {
            println!("  {:<8} {}", extension, count);
        }
    }
    if !report.windows_drives.is_empty() {
        println!("\nWindows drives:");
        for (drive, count) in &report.windows_drives {
            println!("  {}:/ - {} entries", drive, count);
        }
    }
    if verbose && !report.missing_files.is_empty() {
        println!("\nMissing files ({}):", report.missing_files.len());
        print_paths(&report.missing_files);
    }
    if verbose && !report.non_audio_files.is_empty() {
        println!("\nNon-audio files ({}):", report.non_audio_files.len());
        print_paths(&report.non_audio_files);
    }
    Ok(())
}

fn clean(
    settings: &Settings,
    database_path: &Path,
    non_audio: bool,
    missing: bool,
    dry_run: bool,
) -> Result<(), anyhow::Error> {
    if !non_audio && !missing {
        bail!("Specify --non-audio and/or --missing to clean");
    }
    let mut db = open_database(database_path)?;

    let mut to_remove: Vec<String> = Vec::new();
    if non_audio {
        let found = find_non_audio_entries(db.iter_songs()?);
        println!("Found {} non-audio entries", found.len());
        to_remove.extend(found.into_iter().map(|s| s.file_path.clone()));
    }
    if missing {
        let found = find_missing_files(db.iter_songs()?);
        println!("Found {} entries with missing files", found.len());
        for song in found {
            if !to_remove.contains(&song.file_path) {
                to_remove.push(song.file_path.clone());
            }
        }
    }

    if to_remove.is_empty() {
        println!("Nothing to clean");
        return Ok(());
    }
    if dry_run {
        println!("Would remove {} entries:", to_remove.len());
        print_paths(&to_remove);
        return Ok(());
    }

    let removed = remove_entries(&mut db, &to_remove)?;
    save_with_backup(settings, &db, "pre_clean")?;
    println!("Removed {} entries", removed);
    Ok(())
}

fn duplicates(database_path: &Path, by_hash: bool, json: bool) -> Result<(), anyhow::Error> {
    let db = open_database(database_path)?;
    let songs: Vec<&Song> = db.iter_songs()?.collect();
    let report = find_all_duplicates(&songs, by_hash);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("By artist+title: {} groups", report.by_metadata.len());
    println!("By filename:     {} groups", report.by_filename.len());
    if by_hash {
        println!("Exact duplicates: {} files", report.exact_duplicates());
    }

    if !report.by_metadata.is_empty() {
        println!("\nBy artist + title:");
        for group in report.by_metadata.iter().take(10) {
            println!("  {}", group.key.replacen('|', " - ", 1));
            for path in &group.file_paths {
                println!("    {}", path);
            }
        }
    }
    if by_hash && !report.by_hash.is_empty() {
        println!("\nIdentical files:");
        for group in &report.by_hash {
            println!("  {}", group.join(", "));
        }
    }
    Ok(())
}

fn merge(
    settings: &Settings,
    database_path: &Path,
    other_path: &Path,
    prefer_other: bool,
    dry_run: bool,
) -> Result<(), anyhow::Error> {
    let mut db = open_database(database_path)?;
    let other = open_database(other_path)?;

    let stats = db.merge_from(&other, prefer_other)?;
    println!(
        "Added {}, updated {}, skipped {}",
        stats.added, stats.updated, stats.skipped
    );

    if dry_run {
        println!("Dry run, nothing saved");
    } else if stats.added + stats.updated > 0 {
        save_with_backup(settings, &db, "pre_merge")?;
    }
    Ok(())
}

fn tag(settings: &Settings, database_path: &Path, command: TagCommand) -> Result<(), anyhow::Error> {
    let mut db = open_database(database_path)?;

    let (file, update) = match command {
        TagCommand::Show { file } => {
            let song = db
                .get_song(&file)?
                .ok_or_else(|| anyhow!("Song not found: {}", file))?;
            println!("{}", song.display_name());
            println!("  path:   {}", song.file_path);
            if let Some(energy) = song.energy() {
                println!("  energy: {}", energy);
            }
            if let Some(mood) = song.mood() {
                println!("  mood:   {}", mood);
            }
            if let Some(bpm) = song.actual_bpm() {
                println!("  bpm:    {:.1}", bpm);
            }
            println!("  cues:   {}", song.cue_points().count());
            return Ok(());
        }
        TagCommand::Energy { file, level } => {
            let energy = EnergyTag::labeled(level)
                .ok_or_else(|| anyhow!("Energy must be between 1 and 10"))?;
            (file, TagsUpdate::energy(energy))
        }
        TagCommand::Mood { file, moods } => {
            let current = db
                .get_song(&file)?
                .and_then(|song| song.tags.as_ref())
                .and_then(|tags| tags.user2.clone())
                .unwrap_or_default();
            let update = TagsUpdate {
                user2: Patch::Set(current.with_moods(&moods)),
                ..Default::default()
            };
            (file, update)
        }
    };

    if !db.update_song_tags(&file, update)? {
        bail!("Song not found: {}", file);
    }
    save_with_backup(settings, &db, "pre_tag")?;
    println!("Updated {}", file);
    Ok(())
}

fn remap(
    settings: &Settings,
    database_path: &Path,
    remapper: &PathRemapper,
    detect: bool,
    dry_run: bool,
    include_missing: bool,
) -> Result<(), anyhow::Error> {
    let mut db = open_database(database_path)?;

    if detect {
        let prefixes = PathRemapper::detect_windows_prefixes(db.iter_songs()?);
        let unmapped = remapper.unmapped_prefixes(db.iter_songs()?);
        for (prefix, paths) in &prefixes {
            let status = if unmapped.contains(prefix) {
                "unmapped"
            } else {
                "mapped"
            };
            println!("{:<30} {:>6}  {}", prefix, paths.len(), status);
        }
        return Ok(());
    }

    if remapper.mappings().is_empty() {
        bail!("No path mappings configured; pass --from and --to");
    }

    let plan = remapper.plan(db.iter_songs()?, true);
    if dry_run {
        for entry in &plan {
            let status = if entry.exists { "exists" } else { "missing" };
            println!("{}\n  -> {} ({})", entry.old_path, entry.new_path, status);
        }
        println!("{} path(s) would be remapped", plan.len());
        return Ok(());
    }

    let summary = remapper.apply(&mut db, &plan, !include_missing)?;
    if summary.remapped > 0 {
        save_with_backup(settings, &db, "pre_remap")?;
    }
    println!(
        "Remapped {} path(s) ({} skipped, {} failed)",
        summary.remapped, summary.skipped, summary.failed
    );
    Ok(())
}

fn import(
    settings: &Settings,
    database_path: &Path,
    directory: &Path,
    recursive: bool,
) -> Result<(), anyhow::Error> {
    let mut db = open_database(database_path)?;
    let files = scan_directory(directory, recursive);
    let summary = import_files(&mut db, &files)?;

    if summary.added > 0 {
        save_with_backup(settings, &db, "pre_import")?;
    }
    println!(
        "Added {} file(s) ({} already present, {} failed)",
        summary.added, summary.skipped, summary.failed
    );
    Ok(())
}

fn backup(
    settings: &Settings,
    database_path: &Path,
    command: BackupCommand,
) -> Result<(), anyhow::Error> {
    let backups = BackupManager::new(&settings.backup_dir);

    match command {
        BackupCommand::Create { label } => {
            let path = backups.create_backup(database_path, label.as_deref())?;
            println!("Created {}", path.display());
        }
        BackupCommand::List => {
            let list = backups.list_backups()?;
            for path in &list {
                let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
                println!("{:>12}  {}", size, path.display());
            }
            println!(
                "{} backup(s), {} bytes total",
                list.len(),
                backups.total_size()?
            );
        }
        BackupCommand::Restore { backup } => {
            let backup = match backup {
                Some(backup) => backup,
                None => backups
                    .latest_backup()?
                    .ok_or_else(|| anyhow!("No backups in {}", settings.backup_dir.display()))?,
            };
            if let Some(safety) = backups.restore_backup(&backup, database_path)? {
                println!("Previous database saved as {}", safety.display());
            }
            println!("Restored {}", backup.display());
        }
        BackupCommand::Cleanup { keep } => {
            let removed = backups.cleanup_old_backups(keep.unwrap_or(settings.backup_keep))?;
            println!("Removed {} backup(s)", removed);
        }
    }
    Ok(())
}

fn checkpoints(settings: &Settings, command: CheckpointCommand) -> Result<(), anyhow::Error> {
    let store = CheckpointStore::new(&settings.checkpoint_dir);

    let print = |states: Vec<vdjm_core::TaskState>| {
        for state in &states {
            println!(
                "{}  {:<14} {:<10} {:>5.1}%  {} pending, {} failed",
                state.task_id,
                state.task_type.as_str(),
                state.status.as_str(),
                state.progress_percent(),
                state.pending_paths.len(),
                state.failed_paths.len()
            );
        }
        println!("{} checkpoint(s)", states.len());
    };

    match command {
        CheckpointCommand::List { task_type } => print(
            store
                .list_checkpoints()
                .into_iter()
                .filter(|state| task_type.map_or(true, |t| state.task_type == t))
                .collect(),
        ),
        CheckpointCommand::Resumable => print(store.list_resumable()),
        CheckpointCommand::Cleanup { max_age_days } => {
            let removed = store
                .cleanup_completed(max_age_days.unwrap_or(settings.checkpoint_max_age_days));
            println!("Removed {} checkpoint(s)", removed);
        }
        CheckpointCommand::Delete { task_id } => {
            if !store.delete(&task_id) {
                bail!("No checkpoint named {}", task_id);
            }
            println!("Deleted {}", task_id);
        }
    }
    Ok(())
}

fn cache(settings: &Settings, command: CacheCommand) -> Result<(), anyhow::Error> {
    let measurements = MeasurementCache::open(&settings.cache_path)?;
    let analysis = AnalysisCache::open(&settings.analysis_cache_path)?;

    match command {
        CacheCommand::Stats => {
            let m = measurements.stats()?;
            let a = analysis.stats()?;
            println!("Measurements: {} entries, {} bytes", m.count, m.size_bytes);
            println!("Analysis:     {} entries, {} bytes", a.count, a.size_bytes);
        }
        CacheCommand::Clear => {
            let removed = measurements.clear()? + analysis.clear()?;
            println!("Removed {} entries", removed);
        }
        CacheCommand::Invalidate { file } => {
            let removed = measurements.invalidate(&file)? + analysis.invalidate(&file)?;
            println!("Removed {} entries for {}", removed, file);
        }
        CacheCommand::Purge => {
            let removed = measurements.purge_stale()? + analysis.purge_stale()?;
            println!("Removed {} stale entries", removed);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_task_type_is_checked_when_parsing() {
        let args = Args::try_parse_from(["vdjm", "checkpoints", "list", "--task-type", "measure"])
            .unwrap();
        match args.command {
            Command::Checkpoints(CheckpointCommand::List { task_type }) => {
                assert_eq!(task_type, Some(TaskType::Measure));
            }
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(
            Args::try_parse_from(["vdjm", "checkpoints", "list", "--task-type", "mesure"]).is_err()
        );
        assert!(parse_task_type("analyze_energy").is_ok());
    }
}
