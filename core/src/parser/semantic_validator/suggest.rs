//! "Did you mean" suggestions for unresolved names

/// Produces the help text attached to an unresolved reference
pub trait SuggestionStrategy: Send + Sync {
    /// `category` is the kind of thing looked up (`prompt`, `variable`, ...)
    fn suggest(&self, category: &str, name: &str, candidates: &[&str]) -> Option<String>;
}

/// Matches on the first three characters, case-insensitively.
///
/// Without a match, lists every known name of the category.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefixSuggestion;

const PREFIX_LEN: usize = 3;

impl SuggestionStrategy for PrefixSuggestion {
    fn suggest(&self, category: &str, name: &str, candidates: &[&str]) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let prefix = |s: &str| -> String {
            s.chars().take(PREFIX_LEN).collect::<String>().to_lowercase()
        };
        let wanted = prefix(name.trim_start_matches('$'));

        if let Some(found) = candidates.iter().find(|c| prefix(**c) == wanted) {
            return Some(format!("did you mean `{}`?", found));
        }
        Some(format!("known {} names: {}", category, candidates.join(", ")))
    }
}

/// Never suggests anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSuggestion;

impl SuggestionStrategy for NoSuggestion {
    fn suggest(&self, _category: &str, _name: &str, _candidates: &[&str]) -> Option<String> {
        None
    }
}
