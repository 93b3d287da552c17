use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// Binary preference label extracted from generated judge text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    GivenResponse1,
    GivenResponse2,
}

impl Preference {
    pub fn as_str(self) -> &'static str {
        match self {
            Preference::GivenResponse1 => "given_response_1",
            Preference::GivenResponse2 => "given_response_2",
        }
    }
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a fail-soft parse: either the tag was genuinely matched, or
/// the documented default was substituted. Both carry a usable value, so
/// callers that do not care about the distinction just take `value()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed<T> {
    Matched(T),
    Defaulted(T),
}

impl<T> Parsed<T> {
    pub fn value(&self) -> &T {
        match self {
            Parsed::Matched(value) | Parsed::Defaulted(value) => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Parsed::Matched(value) | Parsed::Defaulted(value) => value,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, Parsed::Matched(_))
    }
}

fn chosen_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<Chosen>(.*?)</Chosen>").expect("static pattern"))
}

fn explanation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)<Explanation>(.*?)</Explanation>").expect("static pattern"))
}

/// Extracts the binary choice from a `<Chosen>...</Chosen>` tag: any "1" in
/// the tag body means response 1, anything else response 2. A missing or
/// malformed tag defaults to response 1 rather than erroring; malformed judge
/// output is expected and must not abort a batch pass.
pub fn parse_preference(generated_text: &str) -> Parsed<Preference> {
    match chosen_pattern().captures(generated_text) {
        Some(captures) => {
            let chosen_text = captures[1].trim();
            if chosen_text.contains('1') {
                Parsed::Matched(Preference::GivenResponse1)
            } else {
                Parsed::Matched(Preference::GivenResponse2)
            }
        }
        None => Parsed::Defaulted(Preference::GivenResponse1),
    }
}

/// Extracts the free-form rationale from an `<Explanation>...</Explanation>`
/// tag. An unterminated opening tag falls back to everything after it; no
/// tag at all falls back to the empty string.
pub fn parse_explanation(generated_text: &str) -> Parsed<String> {
    if let Some(captures) = explanation_pattern().captures(generated_text) {
        return Parsed::Matched(captures[1].trim().to_string());
    }
    match generated_text.split_once("<Explanation>") {
        Some((_, rest)) => Parsed::Defaulted(rest.to_string()),
        None => Parsed::Defaulted(String::new()),
    }
}
