use once_cell::sync::Lazy;
use regex::Regex;

static THINK_TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<think>[\s\S]*?</think>|<think\s*/>").unwrap());

static REASONING_TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<reasoning>[\s\S]*?</reasoning>").unwrap());

static INTERNAL_TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<internal>[\s\S]*?</internal>").unwrap());

/// An opening reasoning tag whose closing tag never arrived (cut off by max_tokens).
static UNCLOSED_THINK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<think>[\s\S]*$").unwrap());

static MULTIPLE_NEWLINES_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Strip reasoning artifacts some models emit around their actual answer
pub fn clean_model_output(response: &str) -> String {
    let mut cleaned = THINK_TAG_PATTERN.replace_all(response, "").to_string();
    cleaned = REASONING_TAG_PATTERN.replace_all(&cleaned, "").to_string();
    cleaned = INTERNAL_TAG_PATTERN.replace_all(&cleaned, "").to_string();
    cleaned = UNCLOSED_THINK_PATTERN.replace(&cleaned, "").to_string();

    let cleaned = cleaned.trim();

    // Collapse multiple consecutive newlines into at most two
    MULTIPLE_NEWLINES_PATTERN
        .replace_all(cleaned, "\n\n")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_think_tags() {
        let input = "<think>Which table holds rooms?</think>SELECT * FROM rooms";
        assert_eq!(clean_model_output(input), "SELECT * FROM rooms");
    }

    #[test]
    fn test_clean_self_closing_think() {
        assert_eq!(clean_model_output("<think/>SELECT 1"), "SELECT 1");
        assert_eq!(clean_model_output("<think />SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_clean_reasoning_and_internal_tags() {
        let input = "<reasoning>join on user_id</reasoning><internal>debug</internal>SELECT 1";
        assert_eq!(clean_model_output(input), "SELECT 1");
    }

    #[test]
    fn test_clean_unclosed_think() {
        let input = "SELECT 1\n<think>this never ends";
        assert_eq!(clean_model_output(input), "SELECT 1");
    }

    #[test]
    fn test_clean_multiple_newlines() {
        let input = "Line 1\n\n\n\n\nLine 2";
        assert_eq!(clean_model_output(input), "Line 1\n\nLine 2");
    }

    #[test]
    fn test_clean_preserves_normal_text() {
        let input = "I can help with patients, rooms, staff and equipment.";
        assert_eq!(clean_model_output(input), input);
    }
}
