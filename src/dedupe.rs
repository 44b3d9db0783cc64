use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

use rand::Rng;

use crate::domain::{DirectoryListing, RenameDecision};
use crate::error::HarvestError;
use crate::logging::LogContext;

pub trait RenamePolicy {
    fn resolve(&mut self, candidate: &str, taken: &HashSet<String>) -> String;
}

/// Appends a bracketed digit to the file stem: `report.csv` becomes `report[1].csv`.
/// While that collides the digit is re-drawn at random among the free ones; when all
/// nine are taken the bracket grows to the first free number from 10 up.
#[derive(Debug, Clone, Default)]
pub struct AutoRename;

impl RenamePolicy for AutoRename {
    fn resolve(&mut self, candidate: &str, taken: &HashSet<String>) -> String {
        let first = bracketed(candidate, 1);
        if !taken.contains(&first) {
            return first;
        }

        let free: Vec<String> = (2..=9)
            .map(|digit| bracketed(candidate, digit))
            .filter(|name| !taken.contains(name))
            .collect();
        if !free.is_empty() {
            let pick = rand::thread_rng().gen_range(0..free.len());
            return free[pick].clone();
        }

        (10..)
            .map(|number| bracketed(candidate, number))
            .find(|name| !taken.contains(name))
            .unwrap_or_else(|| format!("{candidate}[dup]"))
    }
}

fn bracketed(name: &str, number: u32) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}[{number}]{}", &name[..dot], &name[dot..]),
        _ => format!("{name}[{number}]"),
    }
}

pub struct InteractiveRename<F>
where
    F: FnMut(&str) -> Option<String>,
{
    prompt: F,
    attempts: u32,
    fallback: AutoRename,
}

impl<F> InteractiveRename<F>
where
    F: FnMut(&str) -> Option<String>,
{
    pub fn new(prompt: F) -> Self {
        Self {
            prompt,
            attempts: 3,
            fallback: AutoRename,
        }
    }
}

impl<F> RenamePolicy for InteractiveRename<F>
where
    F: FnMut(&str) -> Option<String>,
{
    fn resolve(&mut self, candidate: &str, taken: &HashSet<String>) -> String {
        for remaining in (0..self.attempts).rev() {
            let answer = (self.prompt)(candidate).map(|name| name.trim().to_string());
            match answer {
                Some(name) if is_bare_file_name(&name) && !taken.contains(&name) => return name,
                answer => tracing::warn!(
                    candidate,
                    answer = answer.as_deref().unwrap_or(""),
                    remaining,
                    "invalid or duplicate replacement name"
                ),
            }
        }
        tracing::warn!(candidate, "max attempts exceeded, allocating a name automatically");
        self.fallback.resolve(candidate, taken)
    }
}

// A replacement must stay in the renamed file's folder.
fn is_bare_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && Path::new(name).file_name() == Some(OsStr::new(name))
}

pub fn stdin_prompt(candidate: &str) -> Option<String> {
    let mut stderr = io::stderr();
    let _ = write!(stderr, "File '{candidate}' is a duplicate. Enter a new name: ");
    let _ = stderr.flush();
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line),
    }
}

impl<P: RenamePolicy + ?Sized> RenamePolicy for Box<P> {
    fn resolve(&mut self, candidate: &str, taken: &HashSet<String>) -> String {
        (**self).resolve(candidate, taken)
    }
}

impl<P: RenamePolicy + ?Sized> RenamePolicy for &mut P {
    fn resolve(&mut self, candidate: &str, taken: &HashSet<String>) -> String {
        (**self).resolve(candidate, taken)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    pub renames: Vec<RenameDecision>,
}

pub struct DuplicateResolver<P: RenamePolicy> {
    policy: P,
    log: LogContext,
}

impl<P: RenamePolicy> DuplicateResolver<P> {
    pub fn new(policy: P, log: LogContext) -> Self {
        Self { policy, log }
    }

    /// Decides replacements without touching the disk. First occurrences keep their
    /// name; every later repeat gets a name distinct from everything in the listing and
    /// everything accepted so far, so names that were unique stay unchanged.
    pub fn plan(&mut self, names: &[&str]) -> Vec<RenameDecision> {
        let mut taken: HashSet<String> = names.iter().map(|name| name.to_string()).collect();
        let mut accepted: HashSet<&str> = HashSet::with_capacity(names.len());
        let mut decisions = Vec::new();

        for (index, name) in names.iter().copied().enumerate() {
            if accepted.insert(name) {
                continue;
            }
            tracing::info!(name, "duplicate detected");
            let resolved = self.policy.resolve(name, &taken);
            taken.insert(resolved.clone());
            decisions.push(RenameDecision {
                index,
                original_name: name.to_string(),
                resolved_name: resolved,
            });
        }
        decisions
    }

    /// Plans and applies renames for `listing`. Each renamed file stays in its own
    /// folder. The first failed rename aborts the pass; earlier renames are kept.
    pub fn resolve(&mut self, listing: &DirectoryListing) -> Result<ResolutionReport, HarvestError> {
        let log = self.log.clone();
        let _guard = log.enter();
        let names = listing.names();
        let decisions = self.plan(&names);

        for decision in &decisions {
            let entry = &listing.entries()[decision.index];
            let target = entry.path.with_file_name(&decision.resolved_name);
            fs::rename(&entry.path, &target).map_err(|err| {
                tracing::error!(
                    from = %entry.path.display(),
                    to = %target.display(),
                    error = %err,
                    "rename failed, aborting duplicate pass"
                );
                HarvestError::fs(format!("rename {}", entry.path.display()), err)
            })?;
            tracing::info!(
                from = %decision.original_name,
                to = %decision.resolved_name,
                "renamed duplicate"
            );
        }

        tracing::info!(files = listing.len(), renamed = decisions.len(), "duplicate pass complete");
        Ok(ResolutionReport { renames: decisions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taken(names: &[&str]) -> HashSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn bracket_goes_before_extension() {
        assert_eq!(bracketed("report.csv", 1), "report[1].csv");
        assert_eq!(bracketed("README", 4), "README[4]");
        assert_eq!(bracketed(".hidden", 2), ".hidden[2]");
    }

    #[test]
    fn auto_rename_redraws_digit_on_collision() {
        let mut policy = AutoRename;
        let name = policy.resolve("a.csv", &taken(&["a.csv", "a[1].csv"]));
        assert!(name.starts_with("a[") && name.ends_with("].csv"));
        assert_ne!(name, "a[1].csv");
        let digit = &name[2..3];
        assert!(("2"..="9").contains(&digit));
    }

    #[test]
    fn auto_rename_widens_when_digits_exhausted() {
        let mut names = vec!["a.csv".to_string()];
        names.extend((1..=9).map(|digit| format!("a[{digit}].csv")));
        let set: HashSet<String> = names.into_iter().collect();
        assert_eq!(AutoRename.resolve("a.csv", &set), "a[10].csv");
    }

    #[test]
    fn interactive_accepts_first_free_answer() {
        let mut answers = vec![Some("a.csv".to_string()), Some("  b.csv ".to_string())].into_iter();
        let mut policy = InteractiveRename::new(move |_| answers.next().flatten());
        assert_eq!(policy.resolve("a.csv", &taken(&["a.csv"])), "b.csv");
    }

    #[test]
    fn interactive_rejects_answers_leaving_the_folder() {
        let mut answers = vec!["../../escaped.csv", "sub/a.csv", "..", "kept.csv"].into_iter();
        let mut policy = InteractiveRename::new(move |_| answers.next().map(str::to_string));
        policy.attempts = 4;
        assert_eq!(policy.resolve("a.csv", &taken(&["a.csv"])), "kept.csv");

        let mut policy = InteractiveRename::new(|_| Some("../a.csv".to_string()));
        assert_eq!(policy.resolve("a.csv", &taken(&["a.csv"])), "a[1].csv");
    }

    #[test]
    fn interactive_falls_back_after_three_declines() {
        let mut asked = 0;
        let mut policy = InteractiveRename::new(|_| {
            asked += 1;
            None
        });
        let name = policy.resolve("a.csv", &taken(&["a.csv"]));
        drop(policy);
        assert_eq!(asked, 3);
        assert_eq!(name, "a[1].csv");
    }
}
