use std::collections::HashMap;
use std::path::{Path, PathBuf};
use anyhow::Result;
use log::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;
use walkdir::WalkDir;

/// Settings for discovering and grouping source files
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub root: PathBuf,
    /// Directory name whose contents are never picked up (empty = none)
    pub ignored_subdir: String,
    pub obj_prefix: String,
    /// Case-insensitive file-name suffix, e.g. `mkv`
    pub file_extension: String,
    /// Merge all candidates of one directory into a single unit
    pub concat: bool,
}

/// One or more source files that become a single output object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub object_name: String,
    /// On-disk input paths in walk order
    pub source_paths: Vec<PathBuf>,
}

impl WorkUnit {
    pub fn is_concatenation(&self) -> bool {
        self.source_paths.len() > 1
    }
}

/// A matched file before grouping
#[derive(Debug, Clone)]
struct Candidate {
    object_name: String,
    real_path: PathBuf,
}

pub fn nfc(s: &str) -> String {
    s.nfc().collect()
}

/// Object name with its final path segment removed
fn concat_base(object_name: &str) -> &str {
    match object_name.rfind('/') {
        Some(pos) => &object_name[..pos],
        None => "",
    }
}

fn object_name_for(relative: &Path, obj_prefix: &str) -> Option<String> {
    let mut segments = Vec::new();
    for component in relative.components() {
        segments.push(nfc(component.as_os_str().to_str()?));
    }
    let relative = segments.join("/");
    let prefix = nfc(obj_prefix.trim_end_matches('/'));
    if prefix.is_empty() {
        Some(relative)
    } else {
        Some(format!("{}/{}", prefix, relative))
    }
}

fn is_candidate(relative: &Path, opts: &ScanOptions) -> bool {
    let Some(name) = relative.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let in_ignored_dir = !opts.ignored_subdir.is_empty()
        && relative
            .parent()
            .map(|parent| {
                parent
                    .components()
                    .any(|c| c.as_os_str().to_str().map(nfc) == Some(nfc(&opts.ignored_subdir)))
            })
            .unwrap_or(false);
    if in_ignored_dir {
        return false;
    }
    nfc(name)
        .to_lowercase()
        .ends_with(&opts.file_extension.to_lowercase())
}

/// Walk `opts.root` and collect matching files in walk order
fn collect_candidates(opts: &ScanOptions) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut files_checked = 0usize;

    info!("Scanning directory: {}", opts.root.display());

    let walker = WalkDir::new(&opts.root)
        .follow_links(false)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        files_checked += 1;

        let path = entry.path();
        let Ok(relative) = path.strip_prefix(&opts.root) else {
            continue;
        };
        if !is_candidate(relative, opts) {
            continue;
        }
        match object_name_for(relative, &opts.obj_prefix) {
            Some(object_name) => {
                debug!("Found source file: {} -> {}", path.display(), object_name);
                candidates.push(Candidate {
                    object_name,
                    real_path: path.to_path_buf(),
                });
            }
            None => warn!("Skipping path that is not valid UTF-8: {}", path.display()),
        }
    }

    info!(
        "Finished scanning {}: {} files checked, {} candidates",
        opts.root.display(),
        files_checked,
        candidates.len()
    );
    candidates
}

/// Merge candidates by parent directory, keeping first-seen order
fn group_by_directory(candidates: Vec<Candidate>) -> Vec<WorkUnit> {
    let mut units: Vec<WorkUnit> = Vec::new();
    let mut by_base: HashMap<String, usize> = HashMap::new();

    for candidate in candidates {
        let base = concat_base(&candidate.object_name).to_string();
        match by_base.get(&base) {
            Some(&idx) => units[idx].source_paths.push(candidate.real_path),
            None => {
                // Files directly under an unprefixed root have no directory to
                // name the unit after; the first one seeds it.
                let object_name = if base.is_empty() {
                    candidate.object_name
                } else {
                    base.clone()
                };
                by_base.insert(base, units.len());
                units.push(WorkUnit {
                    object_name,
                    source_paths: vec![candidate.real_path],
                });
            }
        }
    }
    units
}

/// Discover source files and partition them into work units
pub fn find_source_files(opts: &ScanOptions) -> Result<Vec<WorkUnit>> {
    if !opts.root.is_dir() {
        anyhow::bail!("Source directory is not a directory: {}", opts.root.display());
    }

    let candidates = collect_candidates(opts);
    let units = if opts.concat {
        group_by_directory(candidates)
    } else {
        candidates
            .into_iter()
            .map(|c| WorkUnit {
                object_name: c.object_name,
                source_paths: vec![c.real_path],
            })
            .collect()
    };

    info!(
        "Grouped source files into {} work unit(s){}",
        units.len(),
        if opts.concat { " (concatenation enabled)" } else { "" }
    );
    Ok(units)
}
