#![allow(dead_code)]

use branchguard_coordinator::{
    Collaborators, Coordinator, CoordinatorConfig, IndexSwapper, ManualClock, MemoryAuditSink,
    MergeConflictChecker,
};
use chrono::Utc;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub struct Harness {
    pub coordinator: Coordinator,
    pub clock: Arc<ManualClock>,
    pub audit: MemoryAuditSink,
    pub dir: TempDir,
}

#[derive(Default)]
pub struct Options {
    pub swapper: Option<Arc<dyn IndexSwapper>>,
    pub merge_checker: Option<Arc<dyn MergeConflictChecker>>,
    pub configure: Option<Box<dyn FnOnce(&mut CoordinatorConfig)>>,
}

pub fn harness() -> Harness {
    harness_with(Options::default())
}

pub fn harness_with(options: Options) -> Harness {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let audit = MemoryAuditSink::new();

    let mut config = CoordinatorConfig::default().with_base_path(dir.path().join("indexes"));
    if let Some(configure) = options.configure {
        configure(&mut config);
    }

    let mut collaborators = Collaborators::in_memory()
        .clock(clock.clone())
        .audit(Arc::new(audit.clone()));
    if let Some(swapper) = options.swapper {
        collaborators = collaborators.swapper(swapper);
    }
    if let Some(checker) = options.merge_checker {
        collaborators = collaborators.merge_checker(checker);
    }

    Harness {
        coordinator: Coordinator::new(config, collaborators).unwrap(),
        clock,
        audit,
        dir,
    }
}

/// Write `files` (relative path, body) under `dir`.
pub fn write_index(dir: &Path, files: &[(&str, &str)]) {
    fs::create_dir_all(dir).unwrap();
    for (name, body) in files {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }
}
