// Splits a context-LLM reply into its translation and context parts

use crate::core::errors::ResponseParseError;

const TRANSLATION_MARKER: &str = "Translation";
const CONTEXT_MARKER: &str = "Context";

/// Decoration the model tends to wrap values in
fn is_decoration(c: char) -> bool {
    c.is_whitespace() || matches!(c, ':' | '"' | '-' | '*' | '“' | '”')
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextTranslation {
    pub translation: String,
    pub context: String,
}

/// Parse a reply shaped like
///
/// ```text
/// - "Translation": <translation>.
/// - "Context": <context>.
/// ```
///
/// The translation is whatever sits between the first `Translation` marker
/// and the first `Context` marker after it; the context is everything after
/// that. Both are trimmed of whitespace, `: " - *` and curly quotes.
///
/// The markers are plain substrings, so a translation that itself contains
/// the word "Context" is cut short there.
pub fn parse_context_response(response: &str) -> Result<ContextTranslation, ResponseParseError> {
    let start = response
        .find(TRANSLATION_MARKER)
        .ok_or(ResponseParseError::MissingTranslationMarker)?;
    let after_translation = &response[start + TRANSLATION_MARKER.len()..];

    let split = after_translation
        .find(CONTEXT_MARKER)
        .ok_or(ResponseParseError::MissingContextMarker)?;

    let translation = after_translation[..split].trim_matches(is_decoration);
    let context = after_translation[split + CONTEXT_MARKER.len()..].trim_matches(is_decoration);

    if translation.is_empty() {
        return Err(ResponseParseError::EmptyTranslation);
    }

    Ok(ContextTranslation {
        translation: translation.to_string(),
        context: context.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_reply() {
        let reply = "- \"Translation\": Where are you going?\n- \"Context\": A casual question between friends.";
        let parsed = parse_context_response(reply).unwrap();
        assert_eq!(parsed.translation, "Where are you going?");
        assert_eq!(parsed.context, "A casual question between friends.");
    }

    #[test]
    fn test_markdown_and_curly_quotes() {
        let reply = "Sure!\n\n**Translation**: “I won't lose.”\n\n**Context**: The hero's vow before the final fight.\n";
        let parsed = parse_context_response(reply).unwrap();
        assert_eq!(parsed.translation, "I won't lose.");
        assert_eq!(parsed.context, "The hero's vow before the final fight.");
    }

    #[test]
    fn test_context_searched_after_translation() {
        // A "Context" mention before the translation marker is ignored
        let reply = "Context first? No.\nTranslation: Hello.\nContext: Greeting.";
        let parsed = parse_context_response(reply).unwrap();
        assert_eq!(parsed.translation, "Hello.");
        assert_eq!(parsed.context, "Greeting.");
    }

    #[test]
    fn test_missing_markers() {
        assert_eq!(
            parse_context_response("Just a plain answer."),
            Err(ResponseParseError::MissingTranslationMarker)
        );
        assert_eq!(
            parse_context_response("Translation: hi there"),
            Err(ResponseParseError::MissingContextMarker)
        );
    }

    #[test]
    fn test_empty_translation_is_rejected() {
        assert_eq!(
            parse_context_response("\"Translation\": \"\"\n\"Context\": nothing"),
            Err(ResponseParseError::EmptyTranslation)
        );
    }

    #[test]
    fn test_context_word_inside_translation_truncates() {
        let reply = "Translation: Context matters here.\nContext: Idiom.";
        let parsed = parse_context_response(reply).unwrap_err();
        assert_eq!(parsed, ResponseParseError::EmptyTranslation);
    }
}
