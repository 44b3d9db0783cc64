use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{TypeBucket, walk_files};
use crate::error::HarvestError;
use crate::logging::LogContext;

pub const NO_EXTENSION_BUCKET: &str = "noext";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segregation {
    pub root: PathBuf,
    pub buckets: Vec<TypeBucket>,
    pub moved: usize,
    tabular_extension: String,
}

impl Segregation {
    pub fn bucket(&self, extension: &str) -> Option<&TypeBucket> {
        let extension = extension.to_ascii_lowercase();
        self.buckets
            .iter()
            .find(|bucket| bucket.extension == extension)
    }

    pub fn tabular_dir(&self) -> PathBuf {
        self.root.join(&self.tabular_extension)
    }

    pub fn file_count(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.files).sum()
    }
}

#[derive(Debug, Clone)]
pub struct Segregator {
    tabular_extension: String,
    log: LogContext,
}

impl Segregator {
    pub fn new(tabular_extension: &str, log: LogContext) -> Self {
        Self {
            tabular_extension: tabular_extension.to_ascii_lowercase(),
            log,
        }
    }

    pub fn segregate(&self, root: &Path) -> Result<Segregation, HarvestError> {
        let _guard = self.log.enter();
        let files = walk_files(root)?;
        if files.is_empty() {
            tracing::warn!(dir = %root.display(), "no files to segregate");
            return Err(HarvestError::NothingToSegregate(root.to_path_buf()));
        }
        // Extensionless files go first, so a top-level file named like a bucket
        // ("csv") is out of the way before that bucket directory is created.
        let mut files: Vec<(PathBuf, String)> = files
            .into_iter()
            .filter_map(|file| {
                let Some(name) = file.file_name().and_then(|name| name.to_str()).map(str::to_string)
                else {
                    tracing::warn!(path = %file.display(), "skipping file with non UTF-8 name");
                    return None;
                };
                Some((file, name))
            })
            .collect();
        files.sort_by(|(a, a_name), (b, b_name)| {
            let a_key = bucket_name(a_name) != NO_EXTENSION_BUCKET;
            let b_key = bucket_name(b_name) != NO_EXTENSION_BUCKET;
            (a_key, a).cmp(&(b_key, b))
        });
        stage_bucket_named_file(root, &mut files)?;

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut moved = 0;
        for (file, name) in &files {
            let name = name.as_str();
            let extension = bucket_name(name);
            let bucket_dir = root.join(&extension);
            *counts.entry(extension).or_default() += 1;

            if file.parent() == Some(bucket_dir.as_path()) {
                continue;
            }
            fs::create_dir_all(&bucket_dir)
                .map_err(|err| HarvestError::fs(bucket_dir.display(), err))?;
            let target = bucket_dir.join(name);
            if target.exists() {
                return Err(HarvestError::Filesystem(format!(
                    "refusing to overwrite {}",
                    target.display()
                )));
            }
            fs::rename(file, &target)
                .map_err(|err| HarvestError::fs(format!("move {}", file.display()), err))?;
            tracing::info!(from = %file.display(), to = %bucket_dir.display(), "moved file");
            moved += 1;
        }

        let buckets: Vec<TypeBucket> = counts
            .into_iter()
            .map(|(extension, files)| TypeBucket {
                dir: root.join(&extension),
                extension,
                files,
            })
            .collect();
        prune_empty_dirs(root, &buckets);

        Ok(Segregation {
            root: root.to_path_buf(),
            buckets,
            moved,
            tabular_extension: self.tabular_extension.clone(),
        })
    }
}

// A top-level file called `noext` sits where its own bucket directory must go.
fn stage_bucket_named_file(
    root: &Path,
    files: &mut [(PathBuf, String)],
) -> Result<(), HarvestError> {
    let bucket_dir = root.join(NO_EXTENSION_BUCKET);
    if !bucket_dir.is_file() {
        return Ok(());
    }
    let staged = root.join(format!(".{NO_EXTENSION_BUCKET}.staged"));
    fs::rename(&bucket_dir, &staged)
        .map_err(|err| HarvestError::fs(format!("move {}", bucket_dir.display()), err))?;
    for (file, _) in files.iter_mut() {
        if *file == bucket_dir {
            *file = staged.clone();
        }
    }
    Ok(())
}

pub fn bucket_name(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => NO_EXTENSION_BUCKET.to_string(),
    }
}

fn prune_empty_dirs(root: &Path, buckets: &[TypeBucket]) {
    let mut dirs = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(Result::ok) {
            if entry.file_type().is_ok_and(|kind| kind.is_dir()) {
                stack.push(entry.path());
                dirs.push(entry.path());
            }
        }
    }
    dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
    for dir in dirs {
        if buckets.iter().any(|bucket| bucket.dir == dir) {
            continue;
        }
        if let Err(err) = fs::remove_dir(&dir) {
            tracing::debug!(dir = %dir.display(), error = %err, "left non-empty folder in place");
        }
    }
}
