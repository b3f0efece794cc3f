use once_cell::sync::Lazy;
use regex::Regex;

/// destructive operations rejected before any other check runs
pub const DENIED_KEYWORDS: [&str; 7] = [
    "DROP", "DELETE", "TRUNCATE", "ALTER", "CREATE", "INSERT", "UPDATE",
];

static LEADING_FENCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^```(?:sql)?\s*").unwrap()
});

static TRAILING_FENCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*```\s*$").unwrap()
});

/// strip markdown code fences wrapped around model output
pub fn strip_code_fences(raw: &str) -> String {
    let text = raw.trim();
    let text = LEADING_FENCE_REGEX.replace(text, "");
    let text = TRAILING_FENCE_REGEX.replace(&text, "");
    text.trim().to_string()
}

/// first denied keyword found anywhere in the query.
///
/// this is a substring scan over the upper-cased text, not a parser: a column
/// named `created_at` trips the `CREATE` entry.
pub fn find_denied_keyword(query: &str) -> Option<&'static str> {
    let upper = query.to_uppercase();
    DENIED_KEYWORDS
        .iter()
        .copied()
        .find(|keyword| upper.contains(keyword))
}
