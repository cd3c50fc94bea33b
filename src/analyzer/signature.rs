use crate::report::Category;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").expect("valid regex")
});
/// `0x` literals, or hex tokens with at least one digit and one letter in
/// either order. Tokens shorter than [`MIN_HEX_ID`] are left to `DIGITS`.
static HEX_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:0x[0-9a-f]+|[0-9a-f]*[0-9][0-9a-f]*[a-f][0-9a-f]*|[0-9a-f]*[a-f][0-9a-f]*[0-9][0-9a-f]*)\b")
        .expect("valid regex")
});
const MIN_HEX_ID: usize = 6;
static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Reduces a description to the part that identifies the issue: case,
/// quoting, identifiers and numbers are erased.
pub fn normalize(description: &str) -> String {
    let lower = description.to_lowercase();
    let text = UUID.replace_all(&lower, "<uuid>");
    let text = HEX_ID.replace_all(&text, |caps: &Captures| {
        let token = &caps[0];
        if token.starts_with("0x") || token.len() >= MIN_HEX_ID {
            "<hex>".to_string()
        } else {
            token.to_string()
        }
    });
    let text = DIGITS.replace_all(&text, "<n>");
    let text: String = text.chars().filter(|c| !matches!(c, '"' | '\'' | '`')).collect();
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

pub fn signature(category: Category, description: &str) -> String {
    format!("{}:{}", category.as_str(), normalize(description))
}
