/// Whether `subject` matches `pattern`.
///
/// Tokens are separated by `.`. A `*` token matches exactly one token and a
/// trailing `>` matches one or more remaining tokens.
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return pattern_tokens.next().is_none(),
            (Some("*"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Whether every subject matched by `filter` is also matched by `pattern`.
///
/// Used to find the stream that covers a consumer's filter subject.
pub fn covers(pattern: &str, filter: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut filter_tokens = filter.split('.');

    loop {
        match (pattern_tokens.next(), filter_tokens.next()) {
            (Some(">"), Some(_)) => return pattern_tokens.next().is_none(),
            (Some(_), Some(">")) => return false,
            (Some("*"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
