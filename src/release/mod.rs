// 🚀 Release notes tooling
//
// Converts the current version's section of CHANGES.rst to markdown with
// pandoc, then either publishes it as a private gist (to preview the
// rendering) or creates the tagged GitHub release.

pub mod github;

use chrono::Local;
use std::ffi::OsStr;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use github::{GitHubClient, ReleaseInfo};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DEFAULT_REPO: &str = "jantman/biweeklybudget";
pub const DEFAULT_CHANGES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/CHANGES.rst");
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";
pub const USAGE: &str = "USAGE: release <gist|release>";

const PROMPT: &str = "Does this look right? <Enter> to continue or Ctrl+C otherwise";

#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("pandoc not found on PATH.")]
    PandocNotFound,

    #[error("GITHUB_TOKEN env var must be set")]
    MissingToken,

    #[error("Release already present for {version}: \"{name}\" ({url})")]
    ReleaseExists {
        version: String,
        name: String,
        url: String,
    },

    #[error("pandoc failed: {0}")]
    Pandoc(String),

    #[error("GitHub API error: {0}")]
    Http(String),

    #[error("invalid repository {0:?}; expected owner/name")]
    InvalidRepo(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReleaseError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Action {
    /// Publish the notes as a private gist to check the rendering
    Gist,
    /// Create the GitHub release for the current version
    Release,
}

// ============================================================================
// HELPERS
// ============================================================================

/// First `name` on `PATH` that is an executable file
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    find_in_path(name, &path)
}

fn find_in_path(name: &str, path: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

/// Lines between the `## <version> ` heading and the next `## ` heading,
/// each followed by a newline. Empty if the version has no section.
pub fn extract_version_notes(markdown: &str, version: &str) -> String {
    let heading = format!("## {} ", version);
    let mut notes = String::new();
    let mut in_version = false;

    for line in markdown.lines() {
        if !in_version {
            in_version = line.starts_with(&heading);
        } else if line.starts_with("## ") {
            break;
        } else {
            notes.push_str(line);
            notes.push('\n');
        }
    }
    notes
}

/// Pandoc is checked before the token
fn check_preconditions(pandoc: Option<PathBuf>, token: Option<String>) -> Result<(PathBuf, String)> {
    let pandoc = pandoc.ok_or(ReleaseError::PandocNotFound)?;
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or(ReleaseError::MissingToken)?;
    Ok((pandoc, token))
}

// ============================================================================
// RELEASER
// ============================================================================

pub struct Releaser {
    pandoc: PathBuf,
    changes_path: PathBuf,
    version: String,
    github: GitHubClient,
}

impl Releaser {
    /// Locate pandoc and read the token from the environment
    pub fn new(repo: &str, changes_path: impl Into<PathBuf>) -> Result<Self> {
        let (pandoc, token) = check_preconditions(find_executable("pandoc"), std::env::var(TOKEN_ENV).ok())?;
        let (owner, name) = repo
            .split_once('/')
            .filter(|(o, n)| !o.is_empty() && !n.is_empty())
            .ok_or_else(|| ReleaseError::InvalidRepo(repo.to_string()))?;

        Ok(Releaser {
            pandoc,
            changes_path: changes_path.into(),
            version: VERSION.to_string(),
            github: GitHubClient::new(&token, owner, name)?,
        })
    }

    /// Current version's release notes as markdown
    pub fn markdown(&self) -> Result<String> {
        let mut cmd = Command::new(&self.pandoc);
        cmd.args(["-f", "rst", "-t", "markdown", "--wrap=none", "--markdown-headings=atx"])
            .arg(&self.changes_path);
        tracing::debug!(command = ?cmd, "running pandoc");

        let output = cmd.output()?;
        if !output.status.success() {
            return Err(ReleaseError::Pandoc(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let markdown = String::from_utf8_lossy(&output.stdout);
        Ok(extract_version_notes(&markdown, &self.version))
    }

    /// Print the notes, wait for confirmation unless `confirm` is false, then publish
    pub fn run(&self, action: Action, confirm: bool) -> Result<()> {
        tracing::info!(?action, "release tool running");
        tracing::info!(version = %self.version, "current biweeklybudget version");

        let markdown = self.markdown()?;
        println!("Markdown:\n{}\n", markdown);

        if confirm {
            print!("{}", PROMPT);
            std::io::stdout().flush()?;
            let mut answer = String::new();
            std::io::stdin().lock().read_line(&mut answer)?;
        }

        match action {
            Action::Release => self.release(&markdown),
            Action::Gist => self.gist(&markdown),
        }
    }

    fn release(&self, markdown: &str) -> Result<()> {
        let existing = self.github.releases()?;
        if let Some(found) = find_release(&existing, &self.version) {
            let err = ReleaseError::ReleaseExists {
                version: self.version.clone(),
                name: found.name.clone().unwrap_or_default(),
                url: found.html_url.clone(),
            };
            tracing::error!("{}", err);
            return Err(err);
        }

        let name = format!("{} released {}", self.version, Local::now().format("%Y-%m-%d"));
        tracing::info!(%name, "creating release");
        let created = self.github.create_release(&self.version, &name, markdown)?;
        tracing::info!(url = %created.html_url, "created release");
        Ok(())
    }

    fn gist(&self, markdown: &str) -> Result<()> {
        tracing::info!("creating private gist");
        let description = format!("biweeklybudget {} release notes test", self.version);
        let gist = self.github.create_gist(&description, "release_notes.md", markdown)?;
        tracing::info!(url = %gist.html_url, "created gist");
        Ok(())
    }
}

fn find_release<'a>(releases: &'a [ReleaseInfo], version: &str) -> Option<&'a ReleaseInfo> {
    releases.iter().find(|r| r.tag_name == version)
}

// ============================================================================
// TESTS
// ============================================================================
