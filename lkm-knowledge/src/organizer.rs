//! On-disk layout of the knowledge repository: folders, file naming,
//! backups, housekeeping and exports.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use lkm_core::{Category, ImageData, KnowledgeItem};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::errors::{KnowledgeError, KnowledgeResult};
use crate::repository::{KnowledgeRepository, REPOSITORY_DB, REPOSITORY_JSON};

const IMAGE_EXTENSIONS: [&str; 6] = [".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp"];
const MAX_FILENAME_LEN: usize = 200;
const BACKUP_TREES: [&str; 3] = ["docs", "excels", "infographics"];
const TOP_LEVEL_DIRS: [&str; 6] = ["docs", "excels", "infographics", "backups", "temp", "exports"];

static INVALID_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("invalid chars regex"));
static UNSAFE_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s\-.]").expect("unsafe chars regex"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Make `name` safe on every common filesystem.
pub fn sanitize_filename(name: &str) -> String {
    let replaced = INVALID_CHARS_RE.replace_all(name, "_");
    let kept = UNSAFE_CHARS_RE.replace_all(&replaced, "");
    let joined = WHITESPACE_RE.replace_all(&kept, "_");
    let mut clean = joined.trim_matches(|c| c == '.' || c == '_').to_string();

    if clean.chars().count() > MAX_FILENAME_LEN {
        clean = match clean.rsplit_once('.') {
            Some((stem, ext)) => format!("{}.{ext}", take_chars(stem, 190)),
            None => take_chars(&clean, 190),
        };
    }
    if clean.is_empty() {
        return "untitled".to_string();
    }
    clean
}

fn take_chars(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}

fn category_dir_name(category: Category) -> String {
    sanitize_filename(category.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Report,
    Summary,
    Backup,
    Export,
}

impl FileKind {
    fn prefix(self) -> &'static str {
        match self {
            FileKind::Report => "knowledge_report",
            FileKind::Summary => "summary",
            FileKind::Backup => "backup",
            FileKind::Export => "export",
        }
    }
}

/// `{prefix}_v{version}_{YYYYmmdd_HHMMSS}{ext}`.
pub fn generate_filename(
    kind: FileKind,
    version: u32,
    timestamp: DateTime<Utc>,
    extension: &str,
) -> String {
    sanitize_filename(&format!(
        "{}_v{version}_{}{extension}",
        kind.prefix(),
        timestamp.format("%Y%m%d_%H%M%S")
    ))
}

fn image_extension(image: &ImageData) -> &'static str {
    let from_path = |path: &str| {
        let lower = path.to_lowercase();
        IMAGE_EXTENSIONS
            .into_iter()
            .find(|ext| lower.ends_with(ext))
    };
    from_path(&image.filename)
        .or_else(|| {
            url::Url::parse(&image.url)
                .ok()
                .and_then(|u| from_path(u.path()))
        })
        .unwrap_or(".jpg")
}

/// `{yyyymmdd}_{category≤20}_{topic≤30}_{id8}{ext}`.
pub fn generate_infographic_filename(image: &ImageData, item: &KnowledgeItem) -> String {
    let date = item.extraction_date.format("%Y%m%d");
    let category = take_chars(&category_dir_name(item.category), 20);
    let topic = take_chars(&sanitize_filename(&item.topic), 30);
    let short_id = take_chars(&item.id, 8);
    let extension = image_extension(image);

    let filename = sanitize_filename(&format!("{date}_{category}_{topic}_{short_id}{extension}"));
    if filename.chars().count() > MAX_FILENAME_LEN {
        return format!("{}_{short_id}{extension}", take_chars(&filename, 190));
    }
    filename
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Full,
    DataOnly,
}

impl BackupKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::DataOnly => "data_only",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(BackupKind::Full),
            "data_only" => Ok(BackupKind::DataOnly),
            other => Err(format!("unknown backup type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub backup_type: BackupKind,
    pub created: DateTime<Utc>,
    pub item_count: usize,
    pub repository_version: String,
    pub files_included: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub manifest: BackupManifest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub title: String,
    pub category: String,
    pub topic: String,
    pub source: String,
    pub date: DateTime<Utc>,
}

impl IndexEntry {
    fn from_item(item: &KnowledgeItem) -> Self {
        Self {
            id: item.id.clone(),
            title: item.post_title.clone(),
            category: item.category.as_str().to_string(),
            topic: item.topic.clone(),
            source: item.source_link.clone(),
            date: item.extraction_date,
        }
    }
}

#[derive(Debug, Serialize)]
struct DirectoryIndex<'a> {
    key: &'a str,
    item_count: usize,
    items: &'a [IndexEntry],
    generated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupStats {
    pub temp_files_removed: usize,
    pub old_backups_removed: usize,
    pub space_freed_mb: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DirectoryStats {
    pub size_mb: f64,
    pub file_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageStats {
    pub base_path: PathBuf,
    pub total_size_mb: f64,
    pub directories: BTreeMap<String, DirectoryStats>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureValidation {
    pub valid: bool,
    pub issues: Vec<String>,
    pub directories_checked: usize,
    pub files_checked: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Markdown,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => ".json",
            ExportFormat::Csv => ".csv",
            ExportFormat::Markdown => ".md",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            other => Err(format!("unknown export format: {other}")),
        }
    }
}

/// Owns the folder layout under the repository root.
#[derive(Debug, Clone)]
pub struct FileOrganizer {
    base: PathBuf,
}

impl FileOrganizer {
    /// Create the folder structure under `base` if missing.
    pub fn new(base: impl Into<PathBuf>) -> KnowledgeResult<Self> {
        let organizer = Self { base: base.into() };
        organizer.create_folder_structure()?;
        info!(path = %organizer.base.display(), "File organizer initialized");
        Ok(organizer)
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    pub fn docs_path(&self) -> PathBuf {
        self.base.join("docs")
    }

    pub fn infographics_path(&self) -> PathBuf {
        self.base.join("infographics")
    }

    pub fn backups_path(&self) -> PathBuf {
        self.base.join("backups")
    }

    pub fn temp_path(&self) -> PathBuf {
        self.base.join("temp")
    }

    pub fn exports_path(&self) -> PathBuf {
        self.base.join("exports")
    }

    pub fn create_folder_structure(&self) -> KnowledgeResult<()> {
        let mut directories: Vec<PathBuf> = TOP_LEVEL_DIRS.iter().map(|d| self.base.join(d)).collect();
        directories.extend([
            self.base.join("docs/summaries"),
            self.base.join("docs/full_reports"),
            self.base.join("excels/archives"),
            self.base.join("infographics/by_date"),
        ]);
        directories.extend(
            Category::ALL
                .into_iter()
                .map(|c| self.infographics_path().join("by_category").join(category_dir_name(c))),
        );

        for directory in &directories {
            fs::create_dir_all(directory)
                .map_err(|e| KnowledgeError::storage(directory, "create_dir", e))?;
        }
        debug!(count = directories.len(), "Folder structure ready");
        Ok(())
    }

    /// Where an infographic for `item` belongs.
    pub fn infographic_path(&self, image: &ImageData, item: &KnowledgeItem, by_category: bool) -> PathBuf {
        let filename = generate_infographic_filename(image, item);
        if by_category {
            self.infographics_path()
                .join("by_category")
                .join(category_dir_name(item.category))
                .join(filename)
        } else {
            self.infographics_path().join(filename)
        }
    }

    /// Copy an already downloaded image into its organized location and
    /// point `image.local_path` at the copy. `None` when there is no local file.
    pub fn save_infographic(
        &self,
        image: &mut ImageData,
        item: &KnowledgeItem,
        by_category: bool,
    ) -> KnowledgeResult<Option<PathBuf>> {
        let Some(source) = image.local_path.as_deref().map(PathBuf::from) else {
            return Ok(None);
        };
        if !source.exists() {
            warn!(path = %source.display(), "Infographic source missing");
            return Ok(None);
        }
        let target = self.infographic_path(image, item, by_category);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&source, &target).map_err(|e| KnowledgeError::storage(&target, "copy", e))?;
        image.local_path = Some(target.display().to_string());
        info!(path = %target.display(), "Infographic saved");
        Ok(Some(target))
    }

    /// Group items by extraction month and write `infographics/by_date/<YYYY-MM>/index.json`.
    pub fn organize_infographics_by_date(
        &self,
        repository: &KnowledgeRepository,
    ) -> KnowledgeResult<BTreeMap<String, Vec<IndexEntry>>> {
        let mut groups: BTreeMap<String, Vec<IndexEntry>> = BTreeMap::new();
        for item in &repository.items {
            groups
                .entry(item.extraction_date.format("%Y-%m").to_string())
                .or_default()
                .push(IndexEntry::from_item(item));
        }
        let root = self.infographics_path().join("by_date");
        for (key, entries) in &groups {
            self.write_index(&root.join(key), key, entries)?;
        }
        info!(periods = groups.len(), "Files organized by date");
        Ok(groups)
    }

    /// Group items by category and write `infographics/by_category/<category>/index.json`.
    pub fn organize_infographics_by_category(
        &self,
        repository: &KnowledgeRepository,
    ) -> KnowledgeResult<BTreeMap<String, Vec<IndexEntry>>> {
        let mut groups: BTreeMap<String, Vec<IndexEntry>> = BTreeMap::new();
        for item in &repository.items {
            groups
                .entry(item.category.as_str().to_string())
                .or_default()
                .push(IndexEntry::from_item(item));
        }
        let root = self.infographics_path().join("by_category");
        for (key, entries) in &groups {
            self.write_index(&root.join(sanitize_filename(key)), key, entries)?;
        }
        info!(categories = groups.len(), "Files organized by category");
        Ok(groups)
    }

    fn write_index(&self, dir: &Path, key: &str, items: &[IndexEntry]) -> KnowledgeResult<()> {
        fs::create_dir_all(dir).map_err(|e| KnowledgeError::storage(dir, "create_dir", e))?;
        let index = DirectoryIndex {
            key,
            item_count: items.len(),
            items,
            generated: Utc::now(),
        };
        let path = dir.join("index.json");
        fs::write(&path, serde_json::to_string_pretty(&index)?)
            .map_err(|e| KnowledgeError::storage(&path, "write_index", e))?;
        Ok(())
    }

    /// Snapshot the repository into `backups/backup_{type}_{ts}/`.
    pub fn create_backup(
        &self,
        repository: &KnowledgeRepository,
        kind: BackupKind,
    ) -> KnowledgeResult<PathBuf> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let mut backup_dir = self.backups_path().join(format!("backup_{kind}_{stamp}"));
        let mut suffix = 1;
        while backup_dir.exists() {
            backup_dir = self
                .backups_path()
                .join(format!("backup_{kind}_{stamp}_{suffix}"));
            suffix += 1;
        }
        fs::create_dir_all(&backup_dir)
            .map_err(|e| KnowledgeError::storage(&backup_dir, "create_backup", e))?;

        if kind == BackupKind::Full {
            for tree in BACKUP_TREES {
                let source = self.base.join(tree);
                if source.exists() {
                    copy_tree(&source, &backup_dir.join(tree))?;
                }
            }
        }
        fs::write(backup_dir.join("repository.json"), repository.to_json()?)?;

        let files_included = relative_files(&backup_dir);
        let manifest = BackupManifest {
            backup_type: kind,
            created: Utc::now(),
            item_count: repository.items.len(),
            repository_version: repository.version.clone(),
            files_included,
        };
        fs::write(
            backup_dir.join("manifest.json"),
            serde_json::to_string_pretty(&manifest)?,
        )?;

        info!(path = %backup_dir.display(), kind = %kind, "Backup created");
        Ok(backup_dir)
    }

    /// Read `repository.json` from a backup and put its file trees back.
    pub fn restore_backup(&self, backup_dir: &Path) -> KnowledgeResult<KnowledgeRepository> {
        if !backup_dir.is_dir() {
            return Err(KnowledgeError::BackupNotFound(backup_dir.to_path_buf()));
        }
        if let Ok(raw) = fs::read_to_string(backup_dir.join("manifest.json"))
            && let Ok(manifest) = serde_json::from_str::<BackupManifest>(&raw)
        {
            info!(kind = %manifest.backup_type, created = %manifest.created, "Restoring backup");
        }

        let repo_file = backup_dir.join("repository.json");
        let json = fs::read_to_string(&repo_file)
            .map_err(|e| KnowledgeError::storage(&repo_file, "restore_backup", e))?;
        let repository = KnowledgeRepository::from_json(&json)?;

        for tree in BACKUP_TREES {
            let source = backup_dir.join(tree);
            if source.is_dir() {
                let target = self.base.join(tree);
                if target.exists() {
                    fs::remove_dir_all(&target)?;
                }
                copy_tree(&source, &target)?;
            }
        }
        info!(items = repository.items.len(), "Repository restored from backup");
        Ok(repository)
    }

    /// Backups with a readable manifest, newest first.
    pub fn list_backups(&self) -> KnowledgeResult<Vec<BackupInfo>> {
        let mut backups = Vec::new();
        for entry in fs::read_dir(self.backups_path())? {
            let path = entry?.path();
            let Ok(raw) = fs::read_to_string(path.join("manifest.json")) else {
                continue;
            };
            match serde_json::from_str::<BackupManifest>(&raw) {
                Ok(manifest) => backups.push(BackupInfo { path, manifest }),
                Err(e) => warn!(path = %path.display(), error = %e, "Unreadable backup manifest"),
            }
        }
        backups.sort_by(|a, b| b.manifest.created.cmp(&a.manifest.created));
        Ok(backups)
    }

    /// Remove temp files older than `days` and backups older than twice that.
    pub fn cleanup_old_files(&self, days: u64) -> KnowledgeResult<CleanupStats> {
        let now = SystemTime::now();
        let temp_cutoff = now - Duration::from_secs(days * 86_400);
        let backup_cutoff = now - Duration::from_secs(days * 2 * 86_400);
        let mut stats = CleanupStats::default();
        let mut freed: u64 = 0;

        for entry in WalkDir::new(self.temp_path()).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let metadata = entry.metadata().map_err(std::io::Error::from)?;
            if metadata.modified()? < temp_cutoff {
                fs::remove_file(entry.path())?;
                stats.temp_files_removed += 1;
                freed += metadata.len();
            }
        }

        for entry in fs::read_dir(self.backups_path())? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if metadata.is_dir() && metadata.modified()? < backup_cutoff {
                let size = tree_size(&entry.path()).0;
                fs::remove_dir_all(entry.path())?;
                stats.old_backups_removed += 1;
                freed += size;
            }
        }

        stats.space_freed_mb = bytes_to_mb(freed);
        info!(
            temp_files = stats.temp_files_removed,
            backups = stats.old_backups_removed,
            "Cleanup completed"
        );
        Ok(stats)
    }

    pub fn get_storage_stats(&self) -> StorageStats {
        let mut directories = BTreeMap::new();
        let mut total = 0;
        for name in ["docs", "excels", "infographics", "backups", "exports"] {
            let dir = self.base.join(name);
            if !dir.exists() {
                continue;
            }
            let (bytes, files) = tree_size(&dir);
            total += bytes;
            directories.insert(
                name.to_string(),
                DirectoryStats {
                    size_mb: bytes_to_mb(bytes),
                    file_count: files,
                },
            );
        }
        StorageStats {
            base_path: self.base.clone(),
            total_size_mb: bytes_to_mb(total),
            directories,
            last_updated: Utc::now(),
        }
    }

    /// Required folders exist and are writable; files outside the known
    /// folders are reported as orphans.
    pub fn validate_structure(&self) -> StructureValidation {
        let mut issues = Vec::new();
        let mut valid = true;
        let required: Vec<PathBuf> = std::iter::once(self.base.clone())
            .chain(["docs", "excels", "infographics", "backups"].map(|d| self.base.join(d)))
            .collect();

        for dir in &required {
            if !dir.exists() {
                valid = false;
                issues.push(format!("Missing directory: {}", dir.display()));
            } else if !dir.is_dir() {
                valid = false;
                issues.push(format!("Path is not a directory: {}", dir.display()));
            } else {
                let marker = dir.join(".write_check");
                if let Err(e) = fs::write(&marker, b"").and_then(|_| fs::remove_file(&marker)) {
                    valid = false;
                    issues.push(format!("No write permission: {} - {e}", dir.display()));
                }
            }
        }

        let mut files_checked = 0;
        for entry in WalkDir::new(&self.base).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            files_checked += 1;
            let Ok(relative) = entry.path().strip_prefix(&self.base) else {
                continue;
            };
            let top = relative
                .components()
                .next()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .unwrap_or_default();
            let is_repository_file =
                top.starts_with(REPOSITORY_JSON) || top.starts_with(REPOSITORY_DB);
            let in_known_dir = relative.components().count() > 1 && TOP_LEVEL_DIRS.contains(&top.as_str());
            if !is_repository_file && !in_known_dir {
                issues.push(format!("Orphaned file: {}", relative.display()));
            }
        }

        info!(valid, issues = issues.len(), "File structure validation");
        StructureValidation {
            valid,
            issues,
            directories_checked: required.len(),
            files_checked,
            timestamp: Utc::now(),
        }
    }

    /// Write the repository to `exports/` in the given format.
    pub fn export(
        &self,
        repository: &KnowledgeRepository,
        format: ExportFormat,
    ) -> KnowledgeResult<PathBuf> {
        let now = Utc::now();
        let path = self
            .exports_path()
            .join(generate_filename(FileKind::Export, 1, now, format.extension()));
        let body = match format {
            ExportFormat::Json => repository.to_json()?,
            ExportFormat::Csv => render_csv(&repository.items),
            ExportFormat::Markdown => render_markdown(repository, now),
        };
        fs::create_dir_all(self.exports_path())?;
        fs::write(&path, body).map_err(|e| KnowledgeError::storage(&path, "export", e))?;
        info!(path = %path.display(), items = repository.items.len(), "Repository exported");
        Ok(path)
    }
}

fn copy_tree(source: &Path, target: &Path) -> KnowledgeResult<()> {
    for entry in WalkDir::new(source).into_iter().filter_map(|e| e.ok()) {
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}

fn relative_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.display().to_string())
        })
        .collect();
    files.sort();
    files
}

/// Total bytes and file count below `root`.
fn tree_size(root: &Path) -> (u64, usize) {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .fold((0, 0), |(bytes, files), m| (bytes + m.len(), files + 1))
}

fn bytes_to_mb(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}

const CSV_HEADER: [&str; 10] = [
    "id",
    "topic",
    "post_title",
    "category",
    "key_knowledge_content",
    "infographic_summary",
    "source_link",
    "notes_applications",
    "course_references",
    "extraction_date",
];

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// One row per item; course references are joined with `; `.
pub fn render_csv(items: &[KnowledgeItem]) -> String {
    let mut out = CSV_HEADER.join(",");
    out.push('\n');
    for item in items {
        let row = [
            item.id.clone(),
            item.topic.clone(),
            item.post_title.clone(),
            item.category.as_str().to_string(),
            item.key_knowledge_content.clone(),
            item.infographic_summary.clone(),
            item.source_link.clone(),
            item.notes_applications.clone(),
            item.course_references.join("; "),
            item.extraction_date.to_rfc3339(),
        ];
        out.push_str(&row.iter().map(|v| csv_field(v)).collect::<Vec<_>>().join(","));
        out.push('\n');
    }
    out
}

/// Summary section followed by one section per category.
pub fn render_markdown(repository: &KnowledgeRepository, generated_at: DateTime<Utc>) -> String {
    let mut out = String::from("# Knowledge Repository Report\n\n");
    out.push_str(&format!(
        "Generated: {}\n\n",
        generated_at.format("%Y-%m-%d %H:%M UTC")
    ));

    out.push_str("## Summary\n\n");
    out.push_str(&format!("- Total items: {}\n", repository.items.len()));
    if let (Some(earliest), Some(latest)) = (
        repository.metadata.date_range.earliest,
        repository.metadata.date_range.latest,
    ) {
        out.push_str(&format!(
            "- Date range: {} to {}\n",
            earliest.format("%Y-%m-%d"),
            latest.format("%Y-%m-%d")
        ));
    }
    for (category, count) in &repository.metadata.categories {
        out.push_str(&format!("- {category}: {count}\n"));
    }

    for category in Category::ALL {
        let items: Vec<&KnowledgeItem> = repository
            .items
            .iter()
            .filter(|i| i.category == category)
            .collect();
        if items.is_empty() {
            continue;
        }
        out.push_str(&format!("\n## {category} ({})\n", items.len()));
        for item in items {
            out.push_str(&format!("\n### {}\n\n", item.post_title));
            out.push_str(&format!("- **Topic:** {}\n", item.topic));
            out.push_str(&format!("- **Source:** {}\n", item.source_link));
            out.push_str(&format!(
                "- **Extracted:** {}\n\n",
                item.extraction_date.format("%Y-%m-%d")
            ));
            out.push_str(&format!("{}\n", item.key_knowledge_content));
            if !item.infographic_summary.trim().is_empty() {
                out.push_str(&format!("\n**Infographic:** {}\n", item.infographic_summary));
            }
            if !item.notes_applications.trim().is_empty() {
                out.push_str(&format!("\n**Applications:** {}\n", item.notes_applications));
            }
            if !item.course_references.is_empty() {
                out.push_str("\n**Courses:**\n");
                for course in &item.course_references {
                    out.push_str(&format!("- {course}\n"));
                }
            }
        }
    }
    out
}
