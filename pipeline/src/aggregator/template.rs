//! Log body normalisation.
//!
//! Variable tokens are masked with placeholders so that lines produced by
//! the same log statement collapse onto one template.

use regex::Regex;
use std::sync::LazyLock;

/// Masking rules, applied in order. Earlier rules must not produce text a
/// later rule would match again.
static MASKS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
            "<UUID>",
        ),
        (
            r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
            "<TIMESTAMP>",
        ),
        (r"\b\d{1,3}(?:\.\d{1,3}){3}(?::\d{1,5})?\b", "<IP>"),
        (r"\b(?:0x)?[0-9a-fA-F]{16,}\b", "<HEX>"),
        (r"\d+(?:\.\d+)?", "<NUM>"),
    ]
    .into_iter()
    .map(|(pattern, placeholder)| {
        (
            Regex::new(pattern).expect("invalid log template pattern"),
            placeholder,
        )
    })
    .collect()
});

/// Reduces a log body to its template.
///
/// ```
/// use pipeline::aggregator::template::normalize;
///
/// assert_eq!(
///     normalize("Connection timeout to 10.0.0.5:5432"),
///     "Connection timeout to <IP>"
/// );
/// assert_eq!(normalize("retried 3 times in 1.5s"), "retried <NUM> times in <NUM>s");
/// ```
#[must_use]
pub fn normalize(body: &str) -> String {
    let mut template = body.to_string();
    for (regex, placeholder) in MASKS.iter() {
        if regex.is_match(&template) {
            template = regex.replace_all(&template, *placeholder).into_owned();
        }
    }
    template
}

/// Fraction of whitespace-separated tokens two templates share position by
/// position. Templates with different token counts have similarity `0`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn similarity(a: &str, b: &str) -> f64 {
    let left: Vec<&str> = a.split_whitespace().collect();
    let right: Vec<&str> = b.split_whitespace().collect();

    if left.len() != right.len() {
        return 0.0;
    }
    if left.is_empty() {
        return 1.0;
    }

    let equal = left.iter().zip(&right).filter(|(l, r)| l == r).count();
    equal as f64 / left.len() as f64
}
