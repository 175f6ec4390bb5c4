//! Repository discovery for changed files.
//!
//! Walks up from a file's directory to the watch root looking for a git
//! repository, then derives a stable project identity from the repository root.
//! Only the repository's own metadata files are read (`HEAD`, `config`, and the
//! `gitdir` / `commondir` pointers used by worktrees and submodules).

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};

/// Identity shared by every file that lives outside any repository.
pub const NO_PROJECT_ID: &str = "no_project";

/// Maximum number of directories inspected above a file.
pub const MAX_RESOLVE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectInfo {
    pub project_id: String,
    pub project_name: String,
    /// Comma-joined `origin` URLs, empty when there is no origin.
    pub git_remote: String,
    /// Full reference name such as `refs/heads/main`, or `HEAD` when detached.
    pub git_branch: String,
    /// Path relative to the repository root, or the file's directory when
    /// there is no repository.
    pub file_path: String,
    pub file_name: String,
}

impl ProjectInfo {
    pub fn is_no_project(&self) -> bool {
        self.project_id == NO_PROJECT_ID
    }
}

#[derive(Debug)]
struct Repository {
    root: PathBuf,
    git_dir: PathBuf,
    common_dir: PathBuf,
}

pub fn resolve(file_path: &Path, watch_root: &Path) -> ProjectInfo {
    let file_path = normalize_lexically(file_path);
    let watch_root = normalize_lexically(watch_root);
    let file_name = file_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    match find_repository(&file_path, &watch_root) {
        Some(repo) => {
            let project_name = repo
                .root
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            let relative = file_path
                .strip_prefix(&repo.root)
                .map(|rel| rel.to_string_lossy().to_string())
                .unwrap_or_else(|_| file_name.clone());

            ProjectInfo {
                project_id: encode_project_id(&repo.root),
                project_name,
                git_remote: read_origin_urls(&repo.common_dir).join(","),
                git_branch: read_head_ref(&repo.git_dir).unwrap_or_default(),
                file_path: relative,
                file_name,
            }
        }
        None => ProjectInfo {
            project_id: NO_PROJECT_ID.to_string(),
            project_name: String::new(),
            git_remote: String::new(),
            git_branch: String::new(),
            file_path: file_path
                .parent()
                .map(|parent| parent.to_string_lossy().to_string())
                .unwrap_or_default(),
            file_name,
        },
    }
}

/// Reversible text encoding of a repository root.
pub fn encode_project_id(root: &Path) -> String {
    STANDARD.encode(root.to_string_lossy().as_bytes())
}

pub fn decode_project_id(project_id: &str) -> Option<PathBuf> {
    if project_id == NO_PROJECT_ID {
        return None;
    }
    let bytes = STANDARD.decode(project_id).ok()?;
    String::from_utf8(bytes).ok().map(PathBuf::from)
}

fn find_repository(file_path: &Path, watch_root: &Path) -> Option<Repository> {
    let mut current = file_path.parent();
    let mut depth = 0;

    // Lexical parents always shrink, so symlinked directories cannot loop.
    while let Some(dir) = current {
        if depth >= MAX_RESOLVE_DEPTH || !dir.starts_with(watch_root) {
            break;
        }
        if let Some(repo) = open_repository(dir) {
            return Some(repo);
        }
        if dir == watch_root {
            break;
        }
        current = dir.parent();
        depth += 1;
    }

    None
}

/// A directory is a repository when its `.git` entry leads to a git dir with a `HEAD`.
/// Unreadable entries simply mean "not a repository here".
fn open_repository(dir: &Path) -> Option<Repository> {
    let git_entry = dir.join(".git");
    let metadata = std::fs::metadata(&git_entry).ok()?;

    let git_dir = if metadata.is_dir() {
        git_entry
    } else {
        parse_gitdir(&git_entry, dir)?
    };

    if !git_dir.join("HEAD").is_file() {
        return None;
    }

    let common_dir = parse_commondir(&git_dir).unwrap_or_else(|| git_dir.clone());
    Some(Repository {
        root: dir.to_path_buf(),
        git_dir,
        common_dir,
    })
}

fn parse_gitdir(git_file: &Path, worktree_root: &Path) -> Option<PathBuf> {
    let contents = std::fs::read_to_string(git_file).ok()?;
    let line = contents
        .lines()
        .find(|line| line.to_ascii_lowercase().starts_with("gitdir:"))?;
    let raw = line.get("gitdir:".len()..)?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(resolve_git_path(worktree_root, raw))
}

fn parse_commondir(git_dir: &Path) -> Option<PathBuf> {
    let contents = std::fs::read_to_string(git_dir.join("commondir")).ok()?;
    let raw = contents.trim();
    if raw.is_empty() {
        return None;
    }
    Some(resolve_git_path(git_dir, raw))
}

fn resolve_git_path(base: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        normalize_lexically(path)
    } else {
        normalize_lexically(&base.join(path))
    }
}

fn read_head_ref(git_dir: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(git_dir.join("HEAD")).ok()?;
    let head = contents.trim();
    match head.strip_prefix("ref:") {
        Some(reference) => Some(reference.trim().to_string()),
        None if !head.is_empty() => Some("HEAD".to_string()),
        None => None,
    }
}

/// Collects every `url` of `[remote "origin"]` in the repository config.
fn read_origin_urls(common_dir: &Path) -> Vec<String> {
    let contents = match std::fs::read_to_string(common_dir.join("config")) {
        Ok(contents) => contents,
        Err(_) => return Vec::new(),
    };

    let mut urls = Vec::new();
    let mut in_origin = false;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') {
            in_origin = is_origin_section(line);
            continue;
        }
        if !in_origin {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim().eq_ignore_ascii_case("url") {
                let value = value.trim().trim_matches('"');
                if !value.is_empty() {
                    urls.push(value.to_string());
                }
            }
        }
    }
    urls
}

fn is_origin_section(header: &str) -> bool {
    let inner = header.trim_start_matches('[').trim_end_matches(']').trim();
    let mut parts = inner.splitn(2, char::is_whitespace);
    let section = parts.next().unwrap_or_default();
    let subsection = parts.next().unwrap_or_default().trim().trim_matches('"');
    section.eq_ignore_ascii_case("remote") && subsection == "origin"
}

/// Resolves `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;

    /// Lays out a minimal git repository without invoking git.
    pub(crate) fn init_fake_repo(root: &Path, branch: &str, origin_urls: &[&str]) {
        let git_dir = root.join(".git");
        fs::create_dir_all(git_dir.join("refs/heads")).expect("git dir");
        fs::write(git_dir.join("HEAD"), format!("ref: refs/heads/{}\n", branch)).expect("HEAD");

        let mut config = String::from("[core]\n\trepositoryformatversion = 0\n");
        if !origin_urls.is_empty() {
            config.push_str("[remote \"origin\"]\n");
            for url in origin_urls {
                config.push_str(&format!("\turl = {}\n", url));
            }
            config.push_str("\tfetch = +refs/heads/*:refs/remotes/origin/*\n");
        }
        config.push_str("[remote \"upstream\"]\n\turl = git@example.com:fork/app.git\n");
        fs::write(git_dir.join("config"), config).expect("config");
    }

    #[test]
    fn files_at_any_depth_share_project_id() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let watch_root = temp_dir.path().join("proj");
        let repo = watch_root.join("app");
        init_fake_repo(&repo, "main", &["git@example.com:team/app.git"]);
        fs::create_dir_all(repo.join("src/deep/er")).expect("dirs");

        let top = resolve(&repo.join("main.go"), &watch_root);
        let deep = resolve(&repo.join("src/deep/er/util.go"), &watch_root);

        assert_eq!(top.project_id, deep.project_id);
        assert_eq!(top.project_name, "app");
        assert_eq!(top.git_branch, "refs/heads/main");
        assert_eq!(top.git_remote, "git@example.com:team/app.git");
        assert_eq!(deep.file_name, "util.go");
        assert_eq!(deep.file_path, Path::new("src/deep/er/util.go").to_string_lossy());
        assert_eq!(decode_project_id(&top.project_id), Some(repo));
    }

    #[test]
    fn multiple_origin_urls_are_comma_joined() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let repo = temp_dir.path().join("svc");
        init_fake_repo(&repo, "dev", &["https://a.example/svc.git", "https://b.example/svc.git"]);

        let info = resolve(&repo.join("lib.rs"), temp_dir.path());
        assert_eq!(
            info.git_remote,
            "https://a.example/svc.git,https://b.example/svc.git"
        );
        assert_eq!(info.git_branch, "refs/heads/dev");
    }

    #[test]
    fn no_repository_below_watch_root_is_no_project() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        // A repository above the watch root must not be discovered.
        init_fake_repo(temp_dir.path(), "main", &[]);
        let watch_root = temp_dir.path().join("scratch");
        fs::create_dir_all(watch_root.join("notes")).expect("dirs");

        let first = resolve(&watch_root.join("notes/try.py"), &watch_root);
        let second = resolve(&watch_root.join("notes/try.py"), &watch_root);

        assert!(first.is_no_project());
        assert_eq!(first, second);
        assert_eq!(first.file_name, "try.py");
        assert!(first.git_remote.is_empty());
        assert!(first.git_branch.is_empty());
        assert_eq!(decode_project_id(&first.project_id), None);
    }

    #[test]
    fn watch_root_itself_can_be_the_repository() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        init_fake_repo(temp_dir.path(), "main", &[]);

        let info = resolve(&temp_dir.path().join("main.go"), temp_dir.path());
        assert!(!info.is_no_project());
        assert!(info.git_remote.is_empty());
    }

    #[test]
    fn worktree_gitfile_resolves_branch_and_shared_config() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let main_repo = temp_dir.path().join("main");
        init_fake_repo(&main_repo, "main", &["git@example.com:team/app.git"]);

        let wt_git_dir = main_repo.join(".git/worktrees/feature");
        fs::create_dir_all(&wt_git_dir).expect("worktree git dir");
        fs::write(wt_git_dir.join("HEAD"), "ref: refs/heads/feature\n").expect("HEAD");
        fs::write(wt_git_dir.join("commondir"), "../..\n").expect("commondir");

        let worktree = temp_dir.path().join("feature");
        fs::create_dir_all(&worktree).expect("worktree");
        fs::write(
            worktree.join(".git"),
            format!("gitdir: {}\n", wt_git_dir.display()),
        )
        .expect("gitfile");

        let info = resolve(&worktree.join("main.go"), temp_dir.path());
        assert_eq!(info.project_name, "feature");
        assert_eq!(info.git_branch, "refs/heads/feature");
        assert_eq!(info.git_remote, "git@example.com:team/app.git");
    }

    #[test]
    fn detached_head_reports_head() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        init_fake_repo(temp_dir.path(), "main", &[]);
        fs::write(
            temp_dir.path().join(".git/HEAD"),
            "3f1c2a9d0c1e4b5a6f7e8d9c0b1a2f3e4d5c6b7a\n",
        )
        .expect("HEAD");

        let info = resolve(&temp_dir.path().join("main.go"), temp_dir.path());
        assert_eq!(info.git_branch, "HEAD");
    }

    #[test]
    fn empty_git_dir_is_not_a_repository() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        fs::create_dir_all(temp_dir.path().join(".git")).expect("bare .git");
        let info = resolve(&temp_dir.path().join("main.go"), temp_dir.path());
        assert!(info.is_no_project());
    }
}
