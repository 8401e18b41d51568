//! Counter identity and its storage key rendering.

use qrquota_core::{SubjectId, WindowKey, WindowKind};

/// Key prefix used when none is configured.
pub const DEFAULT_KEY_PREFIX: &str = "rate_limit";

/// Identity of one counter: a subject's usage in one window instance.
///
/// `scope` narrows the counter to one metered action (for example an API
/// route). `None` is the subject-wide counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// Metered subject
    pub subject: SubjectId,
    /// Window kind
    pub kind: WindowKind,
    /// Window instance
    pub window: WindowKey,
    /// Optional action scope
    pub scope: Option<String>,
}

impl CounterKey {
    /// Create a subject-wide counter key.
    pub fn new(subject: SubjectId, kind: WindowKind, window: WindowKey) -> Self {
        Self {
            subject,
            kind,
            window,
            scope: None,
        }
    }

    /// Narrow the key to `scope`.
    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    /// Render the storage key: `{prefix}:{<subject>}:{kind}:{window_start}[:{scope}]`.
    ///
    /// The subject sits inside a Redis hash tag, so every counter of one
    /// subject lands in one cluster slot and the subject's end is unambiguous
    /// even though subject ids contain `:`. Braces and `%` inside the subject
    /// are percent-encoded to keep the tag closed.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{TimeZone, Utc};
    /// use qrquota_core::{SubjectId, WindowKind};
    /// use qrquota_store::CounterKey;
    ///
    /// let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap();
    /// let key = CounterKey::new(SubjectId::user(7), WindowKind::Minute, WindowKind::Minute.window_key(at));
    /// assert_eq!(key.render("rate_limit"), "rate_limit:{user:7}:minute:1704067200");
    /// ```
    pub fn render(&self, prefix: &str) -> String {
        let mut rendered = format!(
            "{prefix}:{{{}}}:{}:{}",
            subject_tag(&self.subject),
            self.kind,
            self.window.epoch_seconds()
        );
        if let Some(scope) = &self.scope {
            rendered.push(':');
            rendered.push_str(scope);
        }
        rendered
    }

    /// Glob pattern matching every rendered key of `subject` and no other.
    pub fn subject_pattern(prefix: &str, subject: &SubjectId) -> String {
        let tag = subject_tag(subject);
        let mut pattern = String::with_capacity(prefix.len() + tag.len() + 5);
        push_glob_escaped(&mut pattern, prefix);
        pattern.push_str(":{");
        push_glob_escaped(&mut pattern, &tag);
        pattern.push_str("}:*");
        pattern
    }
}

/// Subject id with `%`, `{` and `}` percent-encoded.
fn subject_tag(subject: &SubjectId) -> String {
    let mut tag = String::with_capacity(subject.as_str().len());
    for c in subject.as_str().chars() {
        match c {
            '%' => tag.push_str("%25"),
            '{' => tag.push_str("%7B"),
            '}' => tag.push_str("%7D"),
            c => tag.push(c),
        }
    }
    tag
}

fn push_glob_escaped(pattern: &mut String, text: &str) {
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_render_with_scope() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap();
        let key = CounterKey::new(SubjectId::api_key("abc"), WindowKind::Day, WindowKind::Day.window_key(at))
            .with_scope(Some("/api/v1/qr".to_string()));
        assert_eq!(key.render("rl"), "rl:{key:abc}:day:1704067200:/api/v1/qr");
    }

    #[test]
    fn test_subject_pattern_escapes_glob() {
        let pattern = CounterKey::subject_pattern("rate_limit", &SubjectId::from("user:*[1]"));
        assert_eq!(pattern, r"rate_limit:{user:\*\[1\]}:*");
    }

    #[test]
    fn test_braces_in_subject_are_encoded() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let key = CounterKey::new(SubjectId::from("key:a}b{%"), WindowKind::Minute, WindowKind::Minute.window_key(at));
        assert_eq!(key.render("rl"), "rl:{key:a%7Db%7B%25}:minute:1704067200");
    }

    /// Minimal Redis glob: `*` and backslash escapes, enough for subject patterns.
    fn glob_match(pattern: &str, text: &str) -> bool {
        let mut tokens = Vec::new();
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => tokens.push(Some(chars.next().unwrap())),
                '*' => tokens.push(None),
                c => tokens.push(Some(c)),
            }
        }
        fn matches(tokens: &[Option<char>], text: &[char]) -> bool {
            match tokens.split_first() {
                None => text.is_empty(),
                Some((None, rest)) => (0..=text.len()).any(|i| matches(rest, &text[i..])),
                Some((Some(c), rest)) => text.first() == Some(c) && matches(rest, &text[1..]),
            }
        }
        matches(&tokens, &text.chars().collect::<Vec<_>>())
    }

    #[test]
    fn test_subject_pattern_does_not_match_longer_subject() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let window = WindowKind::Minute.window_key(at);
        let pattern = CounterKey::subject_pattern("rate_limit", &SubjectId::from("user:1"));

        let own = CounterKey::new(SubjectId::from("user:1"), WindowKind::Minute, window);
        let lookalike = CounterKey::new(SubjectId::from("user:1:minute"), WindowKind::Minute, window);
        let braced = CounterKey::new(SubjectId::from("user:1}:x"), WindowKind::Minute, window);

        assert!(glob_match(&pattern, &own.render("rate_limit")));
        assert!(!glob_match(&pattern, &lookalike.render("rate_limit")));
        assert!(!glob_match(&pattern, &braced.render("rate_limit")));
    }
}
