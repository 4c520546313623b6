//! Shared per-repository clone cache and ephemeral working copies.
//!
//! Layout under the cache base directory:
//!
//! ```text
//! <base_dir>/<owner>-<name>/clone   shared bare clone, refreshed on each use
//! <base_dir>/<owner>-<name>/work/   one uniquely named directory per job
//! ```
//!
//! Refreshing the bare clone and copying it into a working copy happen under a
//! per-repository lock. Everything after that (patch application, push) runs
//! without the lock, so jobs for the same repository only contend while the
//! clone is being updated.

use std::fmt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::types::RepoSlug;

use super::locks::KeyedLocks;
use super::{GitResult, git_command, redact_credentials, run_git};

/// Refspecs refreshed in the bare clone: every branch and every PR head.
const CACHE_REFSPECS: [&str; 2] = [
    "+refs/heads/*:refs/heads/*",
    "+refs/pull/*/head:refs/pull/*/head",
];

/// Credentials for talking to the upstream repository.
///
/// The token is only ever placed into HTTPS remote URLs; `Debug` never prints
/// it.
#[derive(Clone, Default)]
pub struct RepoCredentials {
    token: Option<String>,
}

impl RepoCredentials {
    /// Credentials from an installation access token.
    pub fn token(token: impl Into<String>) -> Self {
        RepoCredentials {
            token: Some(token.into()),
        }
    }

    /// No credentials (public or local remotes).
    pub fn anonymous() -> Self {
        RepoCredentials { token: None }
    }
}

impl fmt::Debug for RepoCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoCredentials")
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// An ephemeral clone owned by a single job.
///
/// The directory is deleted when this value is dropped.
#[derive(Debug)]
pub struct WorkingCopy {
    slug: RepoSlug,
    dir: TempDir,
}

impl WorkingCopy {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn slug(&self) -> &RepoSlug {
        &self.slug
    }
}

/// Per-repository bare clones shared by all jobs.
#[derive(Debug)]
pub struct RepositoryCache {
    base_dir: PathBuf,
    remote_base: String,
    locks: KeyedLocks,
}

impl RepositoryCache {
    /// Creates a cache rooted at `base_dir`, cloning from
    /// `<remote_base>/<owner>/<name>.git`.
    pub fn new(base_dir: impl Into<PathBuf>, remote_base: impl Into<String>) -> Self {
        RepositoryCache {
            base_dir: base_dir.into(),
            remote_base: remote_base.into(),
            locks: KeyedLocks::new(),
        }
    }

    /// Returns the path to the repo directory (owner-name/).
    pub fn repo_dir(&self, slug: &RepoSlug) -> PathBuf {
        self.base_dir.join(slug.dir_name())
    }

    /// Returns the path to the shared bare clone.
    pub fn clone_dir(&self, slug: &RepoSlug) -> PathBuf {
        self.repo_dir(slug).join("clone")
    }

    /// Returns the directory holding working copies.
    pub fn work_dir(&self, slug: &RepoSlug) -> PathBuf {
        self.repo_dir(slug).join("work")
    }

    /// Returns the upstream URL, with the token embedded for HTTPS remotes.
    pub fn upstream_url(&self, slug: &RepoSlug, credentials: &RepoCredentials) -> String {
        let base = self.remote_base.trim_end_matches('/');
        let url = format!("{}/{}/{}.git", base, slug.owner, slug.name);
        match (&credentials.token, url.strip_prefix("https://")) {
            (Some(token), Some(rest)) => format!("https://x-access-token:{}@{}", token, rest),
            _ => url,
        }
    }

    /// Refreshes the shared clone for `slug` and copies it into a fresh
    /// working copy whose `origin` points at the upstream repository.
    #[instrument(skip(self, slug, credentials), fields(repo = %slug))]
    pub async fn prepare_working_copy(
        &self,
        slug: &RepoSlug,
        credentials: &RepoCredentials,
    ) -> GitResult<WorkingCopy> {
        let upstream = self.upstream_url(slug, credentials);

        let _guard = self.locks.lock(&slug.to_string()).await;
        debug!("Acquired repository cache lock");

        self.refresh(slug, &upstream).await?;
        let copy = self.create_working_copy(slug, &upstream).await?;

        debug!(path = %copy.path().display(), "Working copy ready");
        Ok(copy)
    }

    /// Brings the bare clone up to date, re-cloning it if it is missing or
    /// unusable.
    async fn refresh(&self, slug: &RepoSlug, upstream: &str) -> GitResult<()> {
        let clone_dir = self.clone_dir(slug);

        if is_bare_repository(&clone_dir).await {
            debug!("Fetching into cached clone");
            let mut args = vec!["fetch", "--prune", "--quiet", upstream];
            args.extend(CACHE_REFSPECS);
            run_git(&clone_dir, &args).await?;
            return Ok(());
        }

        if clone_dir.exists() {
            warn!(
                path = %clone_dir.display(),
                "RepositoryCacheCorrupt: cached clone is unusable, recloning"
            );
            tokio::fs::remove_dir_all(&clone_dir).await?;
        }

        let repo_dir = self.repo_dir(slug);
        tokio::fs::create_dir_all(&repo_dir).await?;
        info!(upstream = %redact_credentials(upstream), "Cloning repository into cache");

        let clone_path = clone_dir.to_string_lossy();
        run_git(&repo_dir, &["clone", "--bare", "--quiet", upstream, &clone_path]).await?;

        // A plain bare clone skips PR heads; pick them up right away.
        let mut args = vec!["fetch", "--quiet", upstream];
        args.extend(CACHE_REFSPECS);
        run_git(&clone_dir, &args).await?;
        Ok(())
    }

    async fn create_working_copy(&self, slug: &RepoSlug, upstream: &str) -> GitResult<WorkingCopy> {
        let work_dir = self.work_dir(slug);
        tokio::fs::create_dir_all(&work_dir).await?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", slug.dir_name()))
            .tempdir_in(&work_dir)?;

        let clone_path = self.clone_dir(slug).to_string_lossy().into_owned();
        let target = dir.path().to_string_lossy().into_owned();
        run_git(&work_dir, &["clone", "--quiet", &clone_path, &target]).await?;
        run_git(dir.path(), &["remote", "set-url", "origin", upstream]).await?;

        Ok(WorkingCopy {
            slug: slug.clone(),
            dir,
        })
    }
}

/// Returns true if `dir` is a readable bare repository.
async fn is_bare_repository(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    // --git-dir stops git from discovering an enclosing repository.
    let git_dir = format!("--git-dir={}", dir.display());
    let Ok(output) = git_command(dir)
        .args([git_dir.as_str(), "rev-parse", "--is-bare-repository"])
        .output()
        .await
    else {
        return false;
    };
    output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "true"
}
