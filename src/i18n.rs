//! Message lookup for user-facing text.
//!
//! Locale catalogs live outside this crate; the pipeline only needs an opaque
//! `translate(key, vars)`. [`EnglishCatalog`] is the built-in fallback.
use std::collections::HashMap;

pub trait Translator: Send + Sync {
    /// Resolve `key` and substitute `{name}` placeholders from `vars`.
    fn translate(&self, key: &str, vars: &[(&str, &str)]) -> String;
}

fn interpolate(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), value)
    })
}

/// English messages. Unknown keys render as the key itself.
#[derive(Debug, Clone)]
pub struct EnglishCatalog {
    messages: HashMap<&'static str, &'static str>,
}

impl Default for EnglishCatalog {
    fn default() -> Self {
        let messages = HashMap::from([
            ("notification.title", "New release: {repo} {tag}"),
            ("notification.test_title", "Test notification from release-watchbot"),
            ("notification.label.repository", "Repository"),
            ("notification.label.release", "Release"),
            ("notification.label.published", "Published"),
            ("notification.label.notes", "Release notes"),
            ("notification.label.link", "View release"),
            ("notification.prerelease", "pre-release"),
            ("notification.draft", "draft"),
            ("notification.no_notes", "No release notes provided."),
            ("notification.truncated", "[truncated]"),
            ("check.summary", "{checked} of {total} repositories checked, {sent} notifications sent"),
            ("resolve.none", "No provider hosts {repo}"),
        ]);
        Self { messages }
    }
}

impl Translator for EnglishCatalog {
    fn translate(&self, key: &str, vars: &[(&str, &str)]) -> String {
        match self.messages.get(key) {
            Some(template) => interpolate(template, vars),
            None => key.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_placeholders() {
        let t = EnglishCatalog::default();
        assert_eq!(
            t.translate("notification.title", &[("repo", "o/r"), ("tag", "v1")]),
            "New release: o/r v1"
        );
    }

    #[test]
    fn unknown_key_falls_back_to_key() {
        let t = EnglishCatalog::default();
        assert_eq!(t.translate("does.not.exist", &[]), "does.not.exist");
    }
}
