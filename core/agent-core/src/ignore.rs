//! Directory ignore rules shared by the watcher and watch-root management.

use std::path::Path;

/// Directories never watched or descended into.
/// Generated, vendored or tool-owned trees that do not hold hand-written code.
pub const IGNORED_DIRECTORIES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".idea",
    ".vscode",
    ".terraform",
    "node_modules",
    "bower_components",
    "vendor",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    "target",
    "dist",
    "build",
    ".next",
    ".nuxt",
    ".output",
    "venv",
    ".venv",
    ".gradle",
    ".turbo",
    ".cache",
];

/// Roots too broad to watch: they would pull in every project on the machine.
pub const DANGEROUS_ROOTS: &[&str] = &["/", "/Users", "/home", "/var", "/tmp", "/opt", "/usr"];

#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    extra: Vec<String>,
}

impl IgnoreRules {
    pub fn new(extra: &[String]) -> Self {
        Self {
            extra: extra
                .iter()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }

    pub fn is_ignored_name(&self, name: &str) -> bool {
        IGNORED_DIRECTORIES.contains(&name) || self.extra.iter().any(|extra| extra == name)
    }

    /// True when any directory between `root` (exclusive) and `path` is ignored.
    /// Paths outside `root` are treated as ignored.
    pub fn is_ignored_path(&self, root: &Path, path: &Path) -> bool {
        let relative = match path.strip_prefix(root) {
            Ok(relative) => relative,
            Err(_) => return true,
        };
        relative.components().any(|component| {
            component
                .as_os_str()
                .to_str()
                .is_some_and(|name| self.is_ignored_name(name))
        })
    }
}

/// Explains why `path` cannot be a watch root, or `None` if it is acceptable.
pub fn reject_watch_root(path: &Path) -> Option<String> {
    if !path.is_absolute() {
        return Some(format!("'{}' is not an absolute path", path.display()));
    }

    let display = path.to_string_lossy();
    let trimmed = display.trim_end_matches('/');
    let normalized = if trimmed.is_empty() { "/" } else { trimmed };

    if DANGEROUS_ROOTS.contains(&normalized) {
        return Some(format!(
            "'{}' is too broad and would encompass many projects",
            display
        ));
    }

    if let Some(home) = dirs::home_dir() {
        if normalized == home.to_string_lossy() {
            return Some(format!(
                "'{}' is your home directory; add the folder that holds your projects instead",
                display
            ));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn builtin_and_extra_names_are_ignored() {
        let rules = IgnoreRules::new(&["generated".to_string(), "  ".to_string()]);
        assert!(rules.is_ignored_name("node_modules"));
        assert!(rules.is_ignored_name(".terraform"));
        assert!(rules.is_ignored_name("generated"));
        assert!(!rules.is_ignored_name("src"));
        assert!(!rules.is_ignored_name(""));
    }

    #[test]
    fn ignored_path_checks_components_below_root() {
        let rules = IgnoreRules::default();
        let root = PathBuf::from("/work/target");

        // The root itself may carry an ignored name; only descendants count.
        assert!(!rules.is_ignored_path(&root, &root.join("app/main.go")));
        assert!(rules.is_ignored_path(&root, &root.join("app/node_modules/x/index.js")));
        assert!(rules.is_ignored_path(&root, &root.join("app/.git")));
        assert!(rules.is_ignored_path(&root, Path::new("/elsewhere/main.go")));
    }

    #[test]
    fn broad_roots_are_rejected() {
        assert!(reject_watch_root(Path::new("/")).is_some());
        assert!(reject_watch_root(Path::new("/home/")).is_some());
        assert!(reject_watch_root(Path::new("relative")).is_some());
        assert!(reject_watch_root(Path::new("/home/dev/src")).is_none());
    }
}
