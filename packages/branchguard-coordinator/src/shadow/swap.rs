//! Filesystem primitives behind the switch critical section.
//!
//! Everything here is blocking and runs on tokio's blocking pool. The
//! manager decides *when* to swap; this module only knows *how*.

use branchguard_storage::SwitchStrategy;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Size and shape of an index directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirStats {
    pub exists: bool,
    pub size_bytes: u64,
    pub entry_count: usize,
}

impl DirStats {
    pub fn missing() -> Self {
        Self::default()
    }
}

/// Everything one swap needs to know, decided up front
#[derive(Debug, Clone)]
pub struct SwapPlan {
    pub strategy: SwitchStrategy,
    pub shadow_path: PathBuf,
    pub current_path: PathBuf,
    /// Where the old current index is kept; `None` discards it
    pub backup_path: Option<PathBuf>,
    /// Scratch location for the old index when no backup is kept
    pub trash_path: PathBuf,
    /// Scratch location for COPY_AND_REPLACE
    pub staging_path: PathBuf,
}

impl SwapPlan {
    fn aside_path(&self) -> &Path {
        self.backup_path.as_deref().unwrap_or(&self.trash_path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapOutcome {
    /// Set only when a previous current index existed and was kept
    pub backup_path: Option<PathBuf>,
    pub replaced_existing: bool,
}

pub trait IndexSwapper: Send + Sync {
    /// Measure a directory; a missing path is not an error.
    fn stat(&self, path: &Path) -> io::Result<DirStats>;

    /// Create an empty directory for a new build.
    fn prepare(&self, path: &Path) -> io::Result<()>;

    /// Replace `plan.current_path` with the shadow index.
    fn swap(&self, plan: &SwapPlan) -> io::Result<SwapOutcome>;

    /// Confirm the served index exists and is listable.
    fn verify(&self, current_path: &Path) -> io::Result<DirStats>;

    /// Put `backup_path` back at `current_path`, moving whatever is there
    /// to `quarantine_path`.
    fn restore(&self, current_path: &Path, backup_path: &Path, quarantine_path: &Path)
        -> io::Result<()>;

    /// Remove a directory tree. `false` when it was already gone.
    fn remove(&self, path: &Path) -> io::Result<bool>;
}

/// `std::fs` implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct FsIndexSwapper;

impl FsIndexSwapper {
    fn atomic_rename(&self, plan: &SwapPlan) -> io::Result<SwapOutcome> {
        ensure_parent(&plan.current_path)?;

        let moved_aside = self.move_current_aside(plan)?;
        if let Err(e) = fs::rename(&plan.shadow_path, &plan.current_path) {
            if moved_aside {
                put_back(plan.aside_path(), &plan.current_path);
            }
            return Err(e);
        }

        Ok(self.finish(plan, moved_aside))
    }

    fn copy_and_replace(&self, plan: &SwapPlan) -> io::Result<SwapOutcome> {
        ensure_parent(&plan.current_path)?;
        if plan.staging_path.exists() {
            fs::remove_dir_all(&plan.staging_path)?;
        }

        if let Err(e) = copy_dir(&plan.shadow_path, &plan.staging_path) {
            let _ = fs::remove_dir_all(&plan.staging_path);
            return Err(e);
        }

        let moved_aside = match self.move_current_aside(plan) {
            Ok(moved) => moved,
            Err(e) => {
                let _ = fs::remove_dir_all(&plan.staging_path);
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&plan.staging_path, &plan.current_path) {
            if moved_aside {
                put_back(plan.aside_path(), &plan.current_path);
            }
            let _ = fs::remove_dir_all(&plan.staging_path);
            return Err(e);
        }

        if let Err(e) = fs::remove_dir_all(&plan.shadow_path) {
            warn!(
                "Switched index but could not remove shadow copy {}: {}",
                plan.shadow_path.display(),
                e
            );
        }
        Ok(self.finish(plan, moved_aside))
    }

    fn move_current_aside(&self, plan: &SwapPlan) -> io::Result<bool> {
        if !plan.current_path.exists() {
            return Ok(false);
        }
        let aside = plan.aside_path();
        ensure_parent(aside)?;
        fs::rename(&plan.current_path, aside)?;
        debug!(
            "Moved {} aside to {}",
            plan.current_path.display(),
            aside.display()
        );
        Ok(true)
    }

    fn finish(&self, plan: &SwapPlan, moved_aside: bool) -> SwapOutcome {
        if moved_aside && plan.backup_path.is_none() {
            if let Err(e) = fs::remove_dir_all(&plan.trash_path) {
                warn!(
                    "Could not remove replaced index {}: {}",
                    plan.trash_path.display(),
                    e
                );
            }
        }
        SwapOutcome {
            backup_path: plan.backup_path.clone().filter(|_| moved_aside),
            replaced_existing: moved_aside,
        }
    }
}

impl IndexSwapper for FsIndexSwapper {
    fn stat(&self, path: &Path) -> io::Result<DirStats> {
        if !path.exists() {
            return Ok(DirStats::missing());
        }
        let mut stats = DirStats {
            exists: true,
            ..DirStats::default()
        };
        for entry in WalkDir::new(path).min_depth(1) {
            let entry = entry?;
            stats.entry_count += 1;
            if entry.file_type().is_file() {
                stats.size_bytes += entry.metadata()?.len();
            }
        }
        Ok(stats)
    }

    fn prepare(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn swap(&self, plan: &SwapPlan) -> io::Result<SwapOutcome> {
        if !plan.shadow_path.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("shadow index {} is not a directory", plan.shadow_path.display()),
            ));
        }
        match plan.strategy {
            SwitchStrategy::AtomicRename => self.atomic_rename(plan),
            SwitchStrategy::CopyAndReplace => self.copy_and_replace(plan),
        }
    }

    fn verify(&self, current_path: &Path) -> io::Result<DirStats> {
        if !current_path.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", current_path.display()),
            ));
        }
        fs::read_dir(current_path)?;
        self.stat(current_path)
    }

    fn restore(
        &self,
        current_path: &Path,
        backup_path: &Path,
        quarantine_path: &Path,
    ) -> io::Result<()> {
        if current_path.exists() {
            ensure_parent(quarantine_path)?;
            fs::rename(current_path, quarantine_path)?;
        }
        fs::rename(backup_path, current_path)
    }

    fn remove(&self, path: &Path) -> io::Result<bool> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

fn put_back(aside: &Path, current: &Path) {
    if let Err(e) = fs::rename(aside, current) {
        warn!(
            "Could not restore {} to {} after failed swap: {}",
            aside.display(),
            current.display(),
            e
        );
    }
}

/// Recursive copy preserving relative layout.
fn copy_dir(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_index(dir: &Path, files: &[(&str, &str)]) {
        fs::create_dir_all(dir).unwrap();
        for (name, body) in files {
            let path = dir.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
    }

    fn plan(root: &Path, strategy: SwitchStrategy, backup: bool) -> SwapPlan {
        SwapPlan {
            strategy,
            shadow_path: root.join("shadow_1"),
            current_path: root.join("current"),
            backup_path: backup.then(|| root.join("backup_1")),
            trash_path: root.join(".replaced_1"),
            staging_path: root.join(".staging_1"),
        }
    }

    #[test]
    fn test_stat_counts_nested_files() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("idx");
        write_index(&dir, &[("a.seg", "12345"), ("sub/b.seg", "678")]);

        let stats = FsIndexSwapper.stat(&dir).unwrap();
        assert!(stats.exists);
        assert_eq!(stats.size_bytes, 8);
        assert_eq!(stats.entry_count, 3);
        assert_eq!(FsIndexSwapper.stat(&tmp.path().join("nope")).unwrap(), DirStats::missing());
    }

    #[test]
    fn test_atomic_rename_with_backup() {
        let tmp = TempDir::new().unwrap();
        let plan = plan(tmp.path(), SwitchStrategy::AtomicRename, true);
        write_index(&plan.shadow_path, &[("new.seg", "new")]);
        write_index(&plan.current_path, &[("old.seg", "old")]);

        let outcome = FsIndexSwapper.swap(&plan).unwrap();
        assert!(outcome.replaced_existing);
        assert_eq!(outcome.backup_path.as_deref(), plan.backup_path.as_deref());
        assert_eq!(fs::read_to_string(plan.current_path.join("new.seg")).unwrap(), "new");
        assert_eq!(
            fs::read_to_string(tmp.path().join("backup_1/old.seg")).unwrap(),
            "old"
        );
        assert!(!plan.shadow_path.exists());
    }

    #[test]
    fn test_atomic_rename_without_backup_discards_old() {
        let tmp = TempDir::new().unwrap();
        let plan = plan(tmp.path(), SwitchStrategy::AtomicRename, false);
        write_index(&plan.shadow_path, &[("new.seg", "new")]);
        write_index(&plan.current_path, &[("old.seg", "old")]);

        let outcome = FsIndexSwapper.swap(&plan).unwrap();
        assert!(outcome.backup_path.is_none());
        assert!(!plan.trash_path.exists());
        assert!(plan.current_path.join("new.seg").exists());
    }

    #[test]
    fn test_copy_and_replace_first_switch() {
        let tmp = TempDir::new().unwrap();
        let plan = plan(tmp.path(), SwitchStrategy::CopyAndReplace, true);
        write_index(&plan.shadow_path, &[("seg/0.bin", "data")]);

        let outcome = FsIndexSwapper.swap(&plan).unwrap();
        assert!(!outcome.replaced_existing);
        assert!(outcome.backup_path.is_none());
        assert_eq!(
            fs::read_to_string(plan.current_path.join("seg/0.bin")).unwrap(),
            "data"
        );
        assert!(!plan.shadow_path.exists());
        assert!(!plan.staging_path.exists());
    }

    #[test]
    fn test_missing_shadow_leaves_current_alone() {
        let tmp = TempDir::new().unwrap();
        let plan = plan(tmp.path(), SwitchStrategy::AtomicRename, true);
        write_index(&plan.current_path, &[("old.seg", "old")]);

        assert!(FsIndexSwapper.swap(&plan).is_err());
        assert!(plan.current_path.join("old.seg").exists());
    }

    #[test]
    fn test_restore_backup() {
        let tmp = TempDir::new().unwrap();
        let current = tmp.path().join("current");
        let backup = tmp.path().join("backup");
        let quarantine = tmp.path().join("quarantine");
        write_index(&current, &[("bad.seg", "bad")]);
        write_index(&backup, &[("good.seg", "good")]);

        FsIndexSwapper.restore(&current, &backup, &quarantine).unwrap();
        assert!(current.join("good.seg").exists());
        assert!(quarantine.join("bad.seg").exists());
        assert!(!backup.exists());
    }
}
