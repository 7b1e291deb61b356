//! git2-backed change source

use super::{ChangeSource, CommitRef, DiffAction, DiffEntry, TreeFile};
use crate::config::GitSettings;
use crate::error::{AppError, AppResult};
use crate::secrets::SecretStore;
use chrono::{DateTime, Utc};
use git2::build::RepoBuilder;
use git2::{
    BranchType, Cred, CredentialType, Delta, FetchOptions, ObjectType, Oid, RemoteCallbacks,
    Repository, Sort, Tree, TreeWalkMode, TreeWalkResult,
};
use std::collections::BTreeSet;
use std::path::Path;
use tempfile::TempDir;
use tracing::{debug, info};

/// A local or freshly cloned repository
pub struct GitRepository {
    repo: Repository,
    branch: Option<String>,
    /// Keeps a temporary clone alive for the lifetime of the repository
    _checkout: Option<TempDir>,
}

impl GitRepository {
    /// Open the repository containing `path`
    pub fn open_local(path: &Path) -> AppResult<Self> {
        let repo = Repository::discover(path)?;
        info!("Opened local repository at {}", repo.path().display());
        Ok(Self {
            repo,
            branch: None,
            _checkout: None,
        })
    }

    /// Bare-clone the configured remote into a temporary directory
    pub fn clone_remote(settings: &GitSettings, secrets: &dyn SecretStore) -> AppResult<Self> {
        let checkout = tempfile::Builder::new().prefix("groundwork-").tempdir()?;
        let repo = clone_with(settings, secrets, checkout.path(), true)?;
        Ok(Self {
            repo,
            branch: Some(settings.branch.clone()),
            _checkout: Some(checkout),
        })
    }

    /// Clone the configured remote into `directory` with a working tree
    pub fn clone_into(
        settings: &GitSettings,
        secrets: &dyn SecretStore,
        directory: &Path,
    ) -> AppResult<Self> {
        let repo = clone_with(settings, secrets, directory, false)?;
        Ok(Self {
            repo,
            branch: Some(settings.branch.clone()),
            _checkout: None,
        })
    }

    /// Local and remote branch names, `origin/` stripped and de-duplicated
    pub fn branches(&self) -> AppResult<Vec<String>> {
        let mut names = BTreeSet::new();
        for branch in self.repo.branches(None)? {
            let (branch, kind) = branch?;
            if let Some(name) = branch.name()? {
                let name = match kind {
                    BranchType::Remote => name.split_once('/').map(|(_, n)| n).unwrap_or(name),
                    BranchType::Local => name,
                };
                if name != "HEAD" {
                    names.insert(name.to_string());
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    pub fn set_branch_reference(&mut self, branch: &str) {
        self.branch = Some(branch.to_string());
    }

    fn resolve(&self, reference: Option<&str>) -> AppResult<Oid> {
        let Some(name) = reference.or(self.branch.as_deref()) else {
            return Ok(self.repo.head()?.peel_to_commit()?.id());
        };

        if let Ok(branch) = self.repo.find_branch(name, BranchType::Local) {
            return Ok(branch.get().peel_to_commit()?.id());
        }
        if let Ok(branch) = self.repo.find_branch(&format!("origin/{}", name), BranchType::Remote) {
            return Ok(branch.get().peel_to_commit()?.id());
        }
        self.repo
            .revparse_single(name)
            .and_then(|object| object.peel_to_commit())
            .map(|commit| commit.id())
            .map_err(|_| AppError::ReferenceNotFound(name.to_string()))
    }

    fn tree_of(&self, commit: &str) -> AppResult<Tree<'_>> {
        let oid = Oid::from_str(commit)
            .map_err(|_| AppError::ReferenceNotFound(commit.to_string()))?;
        Ok(self.repo.find_commit(oid)?.tree()?)
    }
}

fn clone_with(
    settings: &GitSettings,
    secrets: &dyn SecretStore,
    directory: &Path,
    bare: bool,
) -> AppResult<Repository> {
    let url = settings
        .url
        .as_deref()
        .ok_or_else(|| AppError::Config("git.url is not set".to_string()))?;

    let passphrase = match &settings.password_secret {
        Some(key) => Some(secrets.get_secret(key)?),
        None => None,
    };
    let ssh_key = settings.ssh_key.clone();

    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username, allowed| {
        let user = username.unwrap_or("git");
        match (&ssh_key, &passphrase) {
            (Some(key), _) if allowed.contains(CredentialType::SSH_KEY) => {
                Cred::ssh_key(user, None, key, passphrase.as_deref())
            }
            (_, Some(password)) if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) => {
                Cred::userpass_plaintext(user, password)
            }
            _ => Cred::default(),
        }
    });

    let mut fetch = FetchOptions::new();
    fetch.remote_callbacks(callbacks);

    let mut builder = RepoBuilder::new();
    builder.bare(bare).fetch_options(fetch);
    if !settings.branch.is_empty() {
        builder.branch(&settings.branch);
    }

    info!("Cloning {} (branch {})", url, settings.branch);
    Ok(builder.clone(url, directory)?)
}

fn to_commit_ref(commit: &git2::Commit<'_>) -> CommitRef {
    let author = commit.author();
    CommitRef {
        id: commit.id().to_string(),
        message: commit.message().unwrap_or_default().trim_end().to_string(),
        author: author.name().unwrap_or_default().to_string(),
        time: DateTime::<Utc>::from_timestamp(commit.time().seconds(), 0).unwrap_or_default(),
    }
}

impl ChangeSource for GitRepository {
    fn list_commits(&self, reference: Option<&str>) -> AppResult<Vec<CommitRef>> {
        let start = self.resolve(reference)?;
        let mut walk = self.repo.revwalk()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        walk.push(start)?;

        let mut commits = Vec::new();
        for oid in walk {
            let commit = self.repo.find_commit(oid?)?;
            commits.push(to_commit_ref(&commit));
        }
        debug!("Listed {} commits from {}", commits.len(), start);
        Ok(commits)
    }

    fn diff(&self, from: &str, to: &str) -> AppResult<Vec<DiffEntry>> {
        let old = self.tree_of(from)?;
        let new = self.tree_of(to)?;
        let diff = self.repo.diff_tree_to_tree(Some(&old), Some(&new), None)?;

        let mut entries = Vec::new();
        for delta in diff.deltas() {
            let action = match delta.status() {
                Delta::Added | Delta::Renamed | Delta::Copied => DiffAction::Add,
                Delta::Modified | Delta::Typechange => DiffAction::Modify,
                Delta::Deleted => DiffAction::Delete,
                _ => DiffAction::Other,
            };
            let file = if action == DiffAction::Delete {
                delta.old_file()
            } else {
                delta.new_file()
            };
            let Some(path) = file.path() else { continue };
            entries.push(DiffEntry {
                path: path.to_string_lossy().replace('\\', "/"),
                action,
                blob_id: if action == DiffAction::Delete {
                    String::new()
                } else {
                    delta.new_file().id().to_string()
                },
            });
        }
        Ok(entries)
    }

    fn read_blob(&self, commit: &str, path: &str) -> AppResult<Vec<u8>> {
        let tree = self.tree_of(commit)?;
        let entry = tree
            .get_path(Path::new(path))
            .map_err(|_| AppError::ReferenceNotFound(format!("{}:{}", commit, path)))?;
        let blob = entry.to_object(&self.repo)?.peel_to_blob()?;
        Ok(blob.content().to_vec())
    }

    fn full_tree(&self, commit: &str) -> AppResult<Vec<TreeFile>> {
        let tree = self.tree_of(commit)?;
        let mut found = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    found.push((format!("{}{}", root, name), entry.id()));
                }
            }
            TreeWalkResult::Ok
        })?;

        let mut files = Vec::with_capacity(found.len());
        for (path, oid) in found {
            let blob = self.repo.find_blob(oid)?;
            files.push(TreeFile {
                path,
                blob_id: oid.to_string(),
                bytes: blob.content().to_vec(),
            });
        }
        Ok(files)
    }
}
