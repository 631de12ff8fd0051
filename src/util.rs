//! Shared utility functions used across the codebase.

use std::path::{Component, Path, PathBuf};

/// Current time as Unix seconds.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Timestamp used to name archives (`yyyymmddHHMMSS`, local time).
pub fn archive_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S").to_string()
}

/// Whether `c` is a half-width character.
///
/// Printable ASCII and the half-width katakana block count as half-width.
pub fn is_half_width_char(c: char) -> bool {
    (c.is_ascii() && !c.is_ascii_control()) || ('\u{FF61}'..='\u{FF9F}').contains(&c)
}

/// Whether every character of `s` is half-width.
pub fn is_half_width(s: &str) -> bool {
    s.chars().all(is_half_width_char)
}

/// Escape text for inclusion in HTML or XML.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape text so it can be spliced into the inside of a JSON string literal.
pub fn json_string_body(s: &str) -> String {
    let quoted = serde_json::Value::String(s.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Relative path from directory `from` to `to`.
///
/// Both paths are treated lexically; no filesystem access happens.
pub fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component> = from.components().filter(|c| *c != Component::CurDir).collect();
    let to: Vec<Component> = to.components().filter(|c| *c != Component::CurDir).collect();

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for component in &to[common..] {
        out.push(component.as_os_str());
    }
    out
}

/// Render a path with forward slashes, the form used in links.
pub fn to_link(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_width_accepts_ascii_and_katakana() {
        assert!(is_half_width("expA_01-x"));
        assert!(is_half_width("ｱｲｳ"));
    }

    #[test]
    fn half_width_rejects_full_width_and_controls() {
        assert!(!is_half_width("ｅｘｐ"));
        assert!(!is_half_width("実験"));
        assert!(!is_half_width("a\u{0}b"));
        assert!(!is_half_width("tab\there"));
    }

    #[test]
    fn html_escape_replaces_markup() {
        assert_eq!(
            html_escape("<b>\"A&B\"</b>"),
            "&lt;b&gt;&quot;A&amp;B&quot;&lt;/b&gt;"
        );
    }

    #[test]
    fn json_string_body_escapes_backslash_and_quotes() {
        assert_eq!(json_string_body(r#"a\b"c"#), r#"a\\b\"c"#);
    }

    #[test]
    fn relative_path_walks_up_and_down() {
        let rel = relative_path(
            Path::new("/ws/data_governance/researchflow/experiment/abc"),
            Path::new("/ws/data_governance/working/researchflow/experiment/abc/task/t.ipynb"),
        );
        assert_eq!(
            to_link(&rel),
            "../../../working/researchflow/experiment/abc/task/t.ipynb"
        );
    }

    #[test]
    fn relative_path_of_child() {
        let rel = relative_path(Path::new("a/b"), Path::new("a/b/c.txt"));
        assert_eq!(to_link(&rel), "c.txt");
    }
}
