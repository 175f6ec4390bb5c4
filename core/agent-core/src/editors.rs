//! Recognizes editor processes from their executable names.
//!
//! Keystrokes only count as coding activity while one of these has focus.

const EDITORS: &[(&str, &str)] = &[
    // JetBrains
    ("idea", "IntelliJ IDEA"),
    ("goland", "GoLand"),
    ("datagrip", "DataGrip"),
    ("phpstorm", "PhpStorm"),
    ("pycharm", "PyCharm"),
    ("rubymine", "RubyMine"),
    ("webstorm", "WebStorm"),
    ("clion", "CLion"),
    ("rider", "JetBrains Rider"),
    ("rustrover", "RustRover"),
    ("studio", "Android Studio"),
    // Microsoft
    ("code", "Visual Studio Code"),
    ("code-insiders", "Visual Studio Code"),
    ("codium", "VSCodium"),
    ("devenv", "Visual Studio"),
    // Other
    ("atom", "Atom"),
    ("sublime_text", "Sublime Text"),
    ("subl", "Sublime Text"),
    ("notepad++", "Notepad++"),
    ("vim", "VIM"),
    ("gvim", "VIM"),
    ("nvim", "Neovim"),
    ("emacs", "Emacs"),
    ("bluefish", "Bluefish"),
    ("unity", "Unity"),
    ("brackets", "Brackets"),
    ("zed", "Zed"),
    ("hx", "Helix"),
    ("helix", "Helix"),
    ("cursor", "Cursor"),
];

/// Maps a process name (bare name or full executable path) to an editor
/// display name, or `None` when the process is not an editor.
pub fn editor_for_process(process: &str) -> Option<&'static str> {
    let key = normalize(process)?;
    EDITORS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, display)| *display)
}

fn normalize(process: &str) -> Option<String> {
    let trimmed = process.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Windows paths arrive with backslashes even when we run elsewhere.
    let name = trimmed
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(trimmed)
        .to_ascii_lowercase();

    let name = name.strip_suffix(".exe").unwrap_or(&name);
    let name = name.strip_suffix(".app").unwrap_or(name);
    let name = name.strip_suffix("64").unwrap_or(name);
    Some(name.to_string())
}
