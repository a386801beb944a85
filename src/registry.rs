//! Patch registry: scans the patch directory and matches clients to payloads

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::checksum::{file_digest, PatchHash};
use crate::logger::TransferLogger;

/// One loadable payload, immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchInfo {
    /// Lower-cased 4-letter locale
    pub locale: String,
    /// Client build this patch is for; 0 means any build of the locale
    pub build: u32,
    pub path: PathBuf,
    pub file_size: u64,
    pub hash: PatchHash,
}

impl PatchInfo {
    pub fn is_fallback(&self) -> bool {
        self.build == 0
    }
}

/// Split `<4-letter-locale><digits>.<ext>` into (lower-cased locale, build).
///
/// Locale and extension compare case-insensitively.
pub fn parse_patch_filename(name: &str, extension: &str) -> Option<(String, u32)> {
    let (stem, ext) = name.rsplit_once('.')?;
    if !ext.eq_ignore_ascii_case(extension) {
        return None;
    }
    if stem.len() < 5 || !stem.is_char_boundary(4) {
        return None;
    }
    let (locale, digits) = stem.split_at(4);
    if !locale.bytes().all(|b| b.is_ascii_alphabetic()) {
        return None;
    }
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let build = digits.parse().ok()?;
    Some((locale.to_ascii_lowercase(), build))
}

pub struct PatchRegistry {
    enabled: AtomicBool,
    directory: PathBuf,
    extension: String,
    patches: RwLock<Arc<Vec<Arc<PatchInfo>>>>,
    logger: Arc<dyn TransferLogger>,
}

impl PatchRegistry {
    pub fn new(
        enabled: bool,
        directory: impl Into<PathBuf>,
        extension: impl Into<String>,
        logger: Arc<dyn TransferLogger>,
    ) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            directory: directory.into(),
            extension: extension.into(),
            patches: RwLock::new(Arc::new(Vec::new())),
            logger,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Rescan the directory and swap in the new snapshot. Returns the count loaded.
    pub fn load(&self) -> usize {
        let loaded = scan_directory(&self.directory, &self.extension, self.logger.as_ref());
        let count = loaded.len();
        *self.patches.write() = Arc::new(loaded);
        info!("Loaded {} patch(es)", count);
        count
    }

    /// Current snapshot; cheap to clone and unaffected by later reloads
    pub fn snapshot(&self) -> Arc<Vec<Arc<PatchInfo>>> {
        Arc::clone(&self.patches.read())
    }

    pub fn len(&self) -> usize {
        self.patches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exact (build, locale) match, else the first build-0 fallback of the locale
    pub fn find_patch_for_client(&self, build: u32, locale: &str) -> Option<Arc<PatchInfo>> {
        if !self.is_enabled() {
            return None;
        }
        let patches = self.snapshot();
        if patches.is_empty() {
            return None;
        }
        let wanted = locale.to_ascii_lowercase();

        let mut fallback = None;
        for patch in patches.iter() {
            if patch.locale != wanted {
                continue;
            }
            if patch.build == build {
                debug!("Found exact patch match for build {} locale {}", build, locale);
                return Some(Arc::clone(patch));
            }
            if patch.is_fallback() && fallback.is_none() {
                fallback = Some(Arc::clone(patch));
            }
        }

        if fallback.is_some() {
            debug!("Using fallback patch for locale {}", locale);
        }
        fallback
    }
}

fn scan_directory(dir: &Path, extension: &str, logger: &dyn TransferLogger) -> Vec<Arc<PatchInfo>> {
    if !dir.exists() {
        warn!("Patch directory '{}' does not exist, creating it...", dir.display());
        if let Err(e) = std::fs::create_dir_all(dir) {
            error!("Failed to create patch directory '{}': {}", dir.display(), e);
        }
        return Vec::new();
    }

    info!("Loading patches from '{}'...", dir.display());

    let mut patches = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().to_string();
        let Some((locale, build)) = parse_patch_filename(&filename, extension) else {
            debug!("Skipping non-patch file: {}", filename);
            continue;
        };
        let file_size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                error!("Failed to stat patch {}: {}", filename, e);
                continue;
            }
        };
        let hash = match file_digest(entry.path()) {
            Ok(h) => h,
            Err(e) => {
                error!("Failed to calculate MD5 for patch {}: {}", filename, e);
                continue;
            }
        };

        let patch = PatchInfo {
            locale,
            build,
            path: entry.path().to_path_buf(),
            file_size,
            hash,
        };
        info!(
            "  Loaded patch: {} (Build: {}, Locale: {}, Size: {} bytes)",
            filename, patch.build, patch.locale, patch.file_size
        );
        logger.patch_loaded(&patch);
        patches.push(Arc::new(patch));
    }
    patches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NoopLogger;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, len: usize) {
        let data: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
        fs::write(dir.join(name), data).unwrap();
    }

    fn registry(dir: &Path) -> PatchRegistry {
        PatchRegistry::new(true, dir, "mpq", Arc::new(NoopLogger))
    }

    #[test]
    fn test_parse_patch_filename() {
        assert_eq!(parse_patch_filename("enGB12340.mpq", "mpq"), Some(("engb".into(), 12340)));
        assert_eq!(parse_patch_filename("FRFR0.MPQ", "mpq"), Some(("frfr".into(), 0)));
        assert_eq!(parse_patch_filename("enGB.mpq", "mpq"), None);
        assert_eq!(parse_patch_filename("enG12340.mpq", "mpq"), None);
        assert_eq!(parse_patch_filename("enGB12340.zip", "mpq"), None);
        assert_eq!(parse_patch_filename("enGB12a40.mpq", "mpq"), None);
        assert_eq!(parse_patch_filename("enGB12340.mpq.bak", "mpq"), None);
        assert_eq!(parse_patch_filename("enGB99999999999.mpq", "mpq"), None);
        assert_eq!(parse_patch_filename("éé12.mpq", "mpq"), None);
    }

    #[test]
    fn test_missing_directory_is_created_empty() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("ClientPatches");
        let reg = registry(&dir);
        assert_eq!(reg.load(), 0);
        assert!(dir.is_dir());
        assert!(reg.find_patch_for_client(1, "enGB").is_none());
    }

    #[test]
    fn test_load_skips_unmatched_and_hashes_files() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "enGB12340.mpq", 1000);
        write(tmp.path(), "readme.txt", 10);
        fs::create_dir(tmp.path().join("frFR1.mpq")).unwrap();

        let reg = registry(tmp.path());
        assert_eq!(reg.load(), 1);

        for patch in reg.snapshot().iter() {
            let bytes = fs::read(&patch.path).unwrap();
            assert_eq!(patch.hash, md5::compute(&bytes).0);
            assert_eq!(patch.file_size, bytes.len() as u64);
        }
    }

    #[test]
    fn test_exact_match_and_no_cross_build() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "enGB12340.mpq", 1000);
        let reg = registry(tmp.path());
        reg.load();

        let hit = reg.find_patch_for_client(12340, "enGB").unwrap();
        assert_eq!(hit.build, 12340);
        assert_eq!(hit.file_size, 1000);
        assert!(reg.find_patch_for_client(12341, "enGB").is_none());
    }

    #[test]
    fn test_fallback_for_locale() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "enGB12340.mpq", 1000);
        write(tmp.path(), "frFR0.mpq", 500);
        let reg = registry(tmp.path());
        reg.load();

        let hit = reg.find_patch_for_client(99, "frFR").unwrap();
        assert!(hit.is_fallback());
        assert_eq!(hit.file_size, 500);
        // never crosses locales
        assert!(reg.find_patch_for_client(99, "deDE").is_none());
        assert!(reg.find_patch_for_client(99, "enGB").is_none());
    }

    #[test]
    fn test_exact_beats_fallback() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "frFR0.mpq", 500);
        write(tmp.path(), "frFR8606.mpq", 700);
        let reg = registry(tmp.path());
        reg.load();

        assert_eq!(reg.find_patch_for_client(8606, "FRFR").unwrap().file_size, 700);
        assert_eq!(reg.find_patch_for_client(8607, "frfr").unwrap().file_size, 500);
    }

    #[test]
    fn test_disabled_registry_matches_nothing() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "enGB12340.mpq", 100);
        let reg = registry(tmp.path());
        reg.load();
        reg.set_enabled(false);
        assert!(reg.find_patch_for_client(12340, "enGB").is_none());
    }

    #[test]
    fn test_reload_replaces_snapshot() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "enGB12340.mpq", 100);
        let reg = registry(tmp.path());
        reg.load();
        let before = reg.snapshot();

        fs::remove_file(tmp.path().join("enGB12340.mpq")).unwrap();
        write(tmp.path(), "deDE0.mpq", 50);
        assert_eq!(reg.load(), 1);

        // old snapshot is untouched
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].locale, "engb");
        assert!(reg.find_patch_for_client(12340, "enGB").is_none());
        assert!(reg.find_patch_for_client(5, "deDE").is_some());
    }
}
