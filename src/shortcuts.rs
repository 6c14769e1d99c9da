//! Configurable key bindings loaded from `shortcut.toml`.

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// All key bindings, grouped by the view that reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shortcuts {
    pub queue: QueueShortcuts,
    pub input_box: InputBoxShortcuts,
}

/// Bindings for the queue view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueShortcuts {
    pub quit: Vec<String>,
    pub add: Vec<String>,
    pub retry: Vec<String>,
    pub retry_all: Vec<String>,
    pub remove: Vec<String>,
    pub clear_completed: Vec<String>,
    pub toggle_pause: Vec<String>,
    pub open: Vec<String>,
    pub down: Vec<String>,
    pub up: Vec<String>,
}

/// Bindings inside the text input popup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputBoxShortcuts {
    pub confirm: Vec<String>,
    pub cancel: Vec<String>,
    pub backspace: Vec<String>,
    pub delete: Vec<String>,
    pub left: Vec<String>,
    pub right: Vec<String>,
    pub home: Vec<String>,
    pub end: Vec<String>,
    pub clear_line: Vec<String>,
}

impl Shortcuts {
    /// Read bindings from TOML, falling back to defaults when absent.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }
}

fn keys(ks: &[&str]) -> Vec<String> {
    ks.iter().map(|k| k.to_string()).collect()
}

impl Default for Shortcuts {
    fn default() -> Self {
        Self {
            queue: QueueShortcuts {
                quit: keys(&["q"]),
                add: keys(&["a"]),
                retry: keys(&["r"]),
                retry_all: keys(&["R"]),
                remove: keys(&["d", "Delete"]),
                clear_completed: keys(&["c"]),
                toggle_pause: keys(&["p"]),
                open: keys(&["o"]),
                down: keys(&["Down", "j"]),
                up: keys(&["Up", "k"]),
            },
            input_box: InputBoxShortcuts {
                confirm: keys(&["Enter"]),
                cancel: keys(&["Esc"]),
                backspace: keys(&["Backspace"]),
                delete: keys(&["Delete"]),
                left: keys(&["Left"]),
                right: keys(&["Right"]),
                home: keys(&["Home"]),
                end: keys(&["End"]),
                clear_line: keys(&["Ctrl+u"]),
            },
        }
    }
}

/// True when `key` matches any of the binding strings.
pub fn matches_shortcut(key: &KeyEvent, shortcuts: &[String]) -> bool {
    shortcuts.iter().any(|s| matches_single_shortcut(key, s))
}

/// Match one binding such as `"q"`, `"Enter"` or `"Ctrl+u"`.
fn matches_single_shortcut(key: &KeyEvent, shortcut: &str) -> bool {
    let (modifiers_str, key_str) = match shortcut.rsplit_once('+') {
        Some((mods, k)) if !k.is_empty() => (mods.split('+').collect::<Vec<_>>(), k),
        _ => (vec![], shortcut),
    };

    let mut expected = KeyModifiers::empty();
    for modifier in modifiers_str {
        match modifier {
            "Ctrl" | "ctrl" => expected |= KeyModifiers::CONTROL,
            "Alt" | "alt" => expected |= KeyModifiers::ALT,
            "Shift" | "shift" => expected |= KeyModifiers::SHIFT,
            _ => return false,
        }
    }

    // Terminals report 'R' as Char('R') + SHIFT; the case already says it.
    let actual = match key.code {
        KeyCode::Char(_) => key.modifiers.difference(KeyModifiers::SHIFT),
        _ => key.modifiers,
    };
    let expected = match key.code {
        KeyCode::Char(_) => expected.difference(KeyModifiers::SHIFT),
        _ => expected,
    };
    if actual != expected {
        return false;
    }

    match key_str {
        "Enter" | "enter" => key.code == KeyCode::Enter,
        "Esc" | "esc" => key.code == KeyCode::Esc,
        "Tab" | "tab" => key.code == KeyCode::Tab,
        "Backspace" | "backspace" => key.code == KeyCode::Backspace,
        "Delete" | "delete" => key.code == KeyCode::Delete,
        "Up" | "up" => key.code == KeyCode::Up,
        "Down" | "down" => key.code == KeyCode::Down,
        "Left" | "left" => key.code == KeyCode::Left,
        "Right" | "right" => key.code == KeyCode::Right,
        "Home" | "home" => key.code == KeyCode::Home,
        "End" | "end" => key.code == KeyCode::End,
        s => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => key.code == KeyCode::Char(c),
                _ => false,
            }
        }
    }
}

/// Display form of a binding list for the help bar.
pub fn format_keys(keys: &[String]) -> String {
    keys.join("/")
}
