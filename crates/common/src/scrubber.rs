use once_cell::sync::Lazy;
use regex::Regex;

/// Literal scrubber for SQL written to logs.
///
/// Regex-based and best-effort: quoted string literals are replaced wholesale, and
/// recognizable PII shapes outside quotes (emails, SSNs, card and phone numbers) are masked.
/// Nothing here parses SQL.
static STRING_LITERAL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'(?:[^']|'')*'").expect("valid string literal regex"));

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}").expect("valid email regex")
});

// XXX-XX-XXXX
static SSN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("valid ssn regex"));

static CREDIT_CARD_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d[ -]*?){13,16}\b").expect("valid card regex"));

static PHONE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+?1[-. ]?)?\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}").expect("valid phone regex")
});

/// Masks PII shapes in free text.
pub fn scrub(input: &str) -> String {
    let mut scrubbed = input.to_string();

    scrubbed = EMAIL_REGEX.replace_all(&scrubbed, "[EMAIL]").to_string();
    scrubbed = SSN_REGEX.replace_all(&scrubbed, "[SSN]").to_string();
    // 13-16 digits can catch long ids too; acceptable for log output.
    scrubbed = CREDIT_CARD_REGEX
        .replace_all(&scrubbed, "[CREDIT_CARD]")
        .to_string();
    scrubbed = PHONE_REGEX.replace_all(&scrubbed, "[PHONE]").to_string();

    scrubbed
}

/// Scrubs a SQL statement: every quoted literal becomes `'?'`, then [`scrub`] runs on the rest.
pub fn scrub_sql(sql: &str) -> String {
    let without_literals = STRING_LITERAL_REGEX.replace_all(sql, "'?'");
    scrub(&without_literals)
}
