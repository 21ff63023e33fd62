//! Key-name catalogue used to warn about keys the daemon will not recognise.
//!
//! Names are matched case-sensitively after stripping an optional `VK_`
//! prefix. Outputs may also name a custom modifier (`MD_00`..`MD_FE`) or a
//! custom lock (`LK_00`..`LK_FE`).

const KEY_NAMES: &[&str] = &[
    // Letters
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R", "S",
    "T", "U", "V", "W", "X", "Y", "Z",
    // Numbers
    "Num0", "Num1", "Num2", "Num3", "Num4", "Num5", "Num6", "Num7", "Num8", "Num9", "0", "1", "2",
    "3", "4", "5", "6", "7", "8", "9",
    // Function keys
    "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9", "F10", "F11", "F12", "F13", "F14", "F15",
    "F16", "F17", "F18", "F19", "F20", "F21", "F22", "F23", "F24",
    // Modifiers
    "LShift", "RShift", "LCtrl", "RCtrl", "LAlt", "RAlt", "LMeta", "RMeta",
    // Editing and navigation
    "Escape", "Esc", "Enter", "Return", "Backspace", "Tab", "Space", "CapsLock", "NumLock",
    "ScrollLock", "PrintScreen", "Pause", "Insert", "Ins", "Delete", "Del", "Home", "End",
    "PageUp", "PageDown", "Left", "Right", "Up", "Down",
    // Punctuation
    "LeftBracket", "RightBracket", "Backslash", "Semicolon", "Quote", "Comma", "Period", "Slash",
    "Grave", "Minus", "Equal",
    // Keypad
    "Numpad0", "Numpad1", "Numpad2", "Numpad3", "Numpad4", "Numpad5", "Numpad6", "Numpad7",
    "Numpad8", "Numpad9", "NumpadDivide", "NumpadMultiply", "NumpadSubtract", "NumpadAdd",
    "NumpadEnter", "NumpadDecimal",
    // Media and system
    "Mute", "VolumeDown", "VolumeUp", "MediaPlayPause", "MediaStop", "MediaPrevious", "MediaNext",
    "Power", "Sleep", "Wake", "BrowserBack", "BrowserForward", "BrowserRefresh", "BrowserStop",
    "BrowserSearch", "BrowserFavorites", "BrowserHome", "AppMail", "AppCalculator",
    "AppMyComputer", "Menu", "Help", "Select", "Execute", "Undo", "Redo", "Cut", "Copy", "Paste",
    "Find",
    // Japanese / Korean input
    "Zenkaku", "全角", "半角", "Katakana", "カタカナ", "Hiragana", "ひらがな", "Henkan", "変換",
    "Muhenkan", "無変換", "Yen", "円", "Ro", "ろ", "KatakanaHiragana", "Hangeul", "Hangul",
    "한글", "Hanja", "한자", "Iso102nd",
];

/// Physical modifier names that may not be used as `MD_` ids.
pub const PHYSICAL_MODIFIERS: &[&str] = &[
    "LShift", "RShift", "LCtrl", "RCtrl", "LAlt", "RAlt", "LMeta", "RMeta",
];

/// What a key argument refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRef {
    Key,
    Modifier(u8),
    Lock(u8),
}

/// Name without the optional `VK_` prefix.
pub fn strip_prefix(name: &str) -> &str {
    name.strip_prefix("VK_").unwrap_or(name)
}

pub fn is_known_key(name: &str) -> bool {
    KEY_NAMES.contains(&strip_prefix(name))
}

/// Parse a custom modifier/lock id (`MD_xx`, `LK_xx`, hex 00-FE).
fn custom_id(name: &str, prefix: &str) -> Option<Result<u8, String>> {
    let id = name.strip_prefix(prefix)?;
    if prefix == "MD_" && PHYSICAL_MODIFIERS.contains(&id) {
        return Some(Err(format!(
            "{} is a physical modifier; use \"{}\" directly or a hex id MD_00-MD_FE",
            name, id
        )));
    }
    Some(match u16::from_str_radix(id, 16) {
        Ok(n) if n <= 0xFE && id.len() == 2 => Ok(n as u8),
        _ => Err(format!("{} is not a valid id ({}00-{}FE)", name, prefix, prefix)),
    })
}

/// Classify an input (physical) key.
pub fn check_input(name: &str) -> Result<KeyRef, String> {
    if is_known_key(name) {
        Ok(KeyRef::Key)
    } else {
        Err(unknown_key_message(name))
    }
}

/// Classify an output: a key, a custom modifier or a custom lock.
pub fn check_output(name: &str) -> Result<KeyRef, String> {
    if let Some(id) = custom_id(name, "MD_") {
        return id.map(KeyRef::Modifier);
    }
    if let Some(id) = custom_id(name, "LK_") {
        return id.map(KeyRef::Lock);
    }
    check_input(name)
}

fn unknown_key_message(name: &str) -> String {
    match suggest(strip_prefix(name)) {
        Some(s) => format!("unknown key {:?}; did you mean {:?}?", name, s),
        None => format!("unknown key {:?}", name),
    }
}

/// Closest catalogue name by case-insensitive match or edit distance <= 2.
pub fn suggest(name: &str) -> Option<&'static str> {
    if let Some(exact) = KEY_NAMES.iter().copied().find(|k| k.eq_ignore_ascii_case(name)) {
        return Some(exact);
    }
    KEY_NAMES
        .iter()
        .map(|k| (edit_distance(&name.to_lowercase(), &k.to_lowercase()), *k))
        .filter(|(d, _)| *d <= 2)
        .min_by_key(|(d, _)| *d)
        .map(|(_, k)| k)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut cur = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == *cb { 0 } else { 1 };
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        prev = cur;
    }
    prev[b.len()]
}
