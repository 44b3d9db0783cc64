use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use fs2::FileExt;

use crate::domain::dated_dir_name;
use crate::error::HarvestError;

/// Exclusive lock on a run date, held while a run rebuilds that date's directory.
/// Released on drop.
#[derive(Debug)]
pub struct DateLock {
    file: File,
    path: PathBuf,
}

impl DateLock {
    pub fn lock_path(download_dir: &Path, date: NaiveDate) -> PathBuf {
        download_dir.join(format!(".{}.lock", dated_dir_name(date)))
    }

    pub fn acquire(download_dir: &Path, date: NaiveDate) -> Result<Self, HarvestError> {
        let (file, path) = Self::open(download_dir, date)?;
        file.lock_exclusive()
            .map_err(|err| HarvestError::fs(format!("lock {}", path.display()), err))?;
        Ok(Self { file, path })
    }

    pub fn try_acquire(download_dir: &Path, date: NaiveDate) -> Result<Self, HarvestError> {
        let (file, path) = Self::open(download_dir, date)?;
        file.try_lock_exclusive()
            .map_err(|err| HarvestError::fs(format!("lock {}", path.display()), err))?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(download_dir: &Path, date: NaiveDate) -> Result<(File, PathBuf), HarvestError> {
        fs::create_dir_all(download_dir)
            .map_err(|err| HarvestError::fs(download_dir.display(), err))?;
        let path = Self::lock_path(download_dir, date);
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| HarvestError::fs(path.display(), err))?;
        Ok((file, path))
    }
}

impl Drop for DateLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_holder_is_refused_until_release() {
        let temp = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();

        let held = DateLock::acquire(temp.path(), date).unwrap();
        assert!(held.path().ends_with(".070324.lock"));
        assert!(DateLock::try_acquire(temp.path(), date).is_err());

        drop(held);
        assert!(DateLock::try_acquire(temp.path(), date).is_ok());
    }

    #[test]
    fn different_dates_do_not_contend() {
        let temp = tempfile::tempdir().unwrap();
        let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();

        let _monday = DateLock::acquire(temp.path(), monday).unwrap();
        assert!(DateLock::try_acquire(temp.path(), tuesday).is_ok());
    }
}
