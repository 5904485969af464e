//! Runtime settings persisted in the settings store.
//!
//! Settings differ from the YAML [`crate::config::Config`]: they are edited at
//! runtime (by an administrator through whatever surface wraps the actions) and
//! are re-read on every check cycle and every poll tick.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{WatchError, WatchResult};
use crate::model::{ReleaseChannel, RepoSettings};

/// Upper bound the providers accept for `per_page`.
pub const MAX_PAGE_SIZE: u32 = 100;
/// Upper bound on releases fetched per repository and check.
pub const MAX_RELEASES_PER_CHECK: u32 = 1000;
/// Upper bound on both intervals, minutes (one year).
pub const MAX_INTERVAL_MINUTES: u64 = 525_600;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TimeFormat {
    #[serde(rename = "12h")]
    TwelveHour,
    #[default]
    #[serde(rename = "24h")]
    TwentyFourHour,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationFormat {
    #[default]
    Text,
    Markdown,
    Html,
}

impl NotificationFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationFormat::Text => "text",
            NotificationFormat::Markdown => "markdown",
            NotificationFormat::Html => "html",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Background loop period, minutes.
    pub refresh_interval: u64,
    /// Minimum minutes between provider calls for one repository.
    pub cache_interval: u64,
    pub releases_per_page: u32,
    pub release_channels: Vec<ReleaseChannel>,
    pub pre_release_sub_channels: Vec<String>,
    pub include_regex: Option<String>,
    pub exclude_regex: Option<String>,
    pub show_acknowledge: bool,
    pub time_format: TimeFormat,
    pub locale: String,
    pub apprise_format: NotificationFormat,
    pub apprise_max_characters: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refresh_interval: 10,
            cache_interval: 5,
            releases_per_page: 30,
            release_channels: vec![ReleaseChannel::Stable],
            pre_release_sub_channels: Vec::new(),
            include_regex: None,
            exclude_regex: None,
            show_acknowledge: true,
            time_format: TimeFormat::default(),
            locale: "en".to_string(),
            apprise_format: NotificationFormat::default(),
            apprise_max_characters: None,
        }
    }
}

/// Trim a regex setting; blank means unset.
pub fn normalize_regex(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn normalize_sub_channels(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = values
        .iter()
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn normalize_channels(values: &[ReleaseChannel]) -> Vec<ReleaseChannel> {
    let mut out = values.to_vec();
    out.sort();
    out.dedup();
    out
}

fn check_pattern(field: &str, pattern: Option<&str>) -> WatchResult<()> {
    if let Some(p) = pattern {
        Regex::new(p).map_err(|e| WatchError::InvalidSettings(format!("{field}: {e}")))?;
    }
    Ok(())
}

impl Settings {
    /// Canonical form: regexes trimmed (blank → unset), channel lists sorted
    /// and deduplicated, release cap clamped.
    pub fn normalized(&self) -> Settings {
        let mut s = self.clone();
        s.include_regex = normalize_regex(self.include_regex.as_deref());
        s.exclude_regex = normalize_regex(self.exclude_regex.as_deref());
        s.release_channels = normalize_channels(&self.release_channels);
        s.pre_release_sub_channels = normalize_sub_channels(&self.pre_release_sub_channels);
        s.releases_per_page = self.releases_per_page.clamp(1, MAX_RELEASES_PER_CHECK);
        s.refresh_interval = self.refresh_interval.min(MAX_INTERVAL_MINUTES);
        s.cache_interval = self.cache_interval.min(MAX_INTERVAL_MINUTES);
        s.apprise_max_characters = self.apprise_max_characters.filter(|n| *n > 0);
        s
    }

    pub fn validate(&self) -> WatchResult<()> {
        check_pattern("include_regex", normalize_regex(self.include_regex.as_deref()).as_deref())?;
        check_pattern("exclude_regex", normalize_regex(self.exclude_regex.as_deref()).as_deref())?;
        Ok(())
    }

    /// Poll period with a one-minute floor. Stored values above
    /// [`MAX_INTERVAL_MINUTES`] are capped.
    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_interval.clamp(1, MAX_INTERVAL_MINUTES) * 60)
    }

    pub fn cache_period(&self) -> chrono::Duration {
        // The cap fits in i64 minutes and in chrono's range.
        let minutes = self.cache_interval.min(MAX_INTERVAL_MINUTES) as i64;
        chrono::Duration::minutes(minutes)
    }

    /// Resolve the filter for one repository: overrides first, globals second.
    pub fn filter_for(&self, overrides: &RepoSettings) -> FilterSettings {
        let channels = overrides
            .release_channels
            .as_deref()
            .unwrap_or(&self.release_channels);
        let sub_channels = overrides
            .pre_release_sub_channels
            .as_deref()
            .unwrap_or(&self.pre_release_sub_channels);
        let include = normalize_regex(overrides.include_regex.as_deref())
            .or_else(|| normalize_regex(self.include_regex.as_deref()));
        let exclude = normalize_regex(overrides.exclude_regex.as_deref())
            .or_else(|| normalize_regex(self.exclude_regex.as_deref()));
        FilterSettings {
            channels: normalize_channels(channels),
            pre_release_sub_channels: normalize_sub_channels(sub_channels),
            include_regex: include,
            exclude_regex: exclude,
            releases_per_page: overrides
                .releases_per_page
                .unwrap_or(self.releases_per_page)
                .clamp(1, MAX_RELEASES_PER_CHECK),
        }
    }
}

impl RepoSettings {
    pub fn normalized(&self) -> RepoSettings {
        RepoSettings {
            release_channels: self.release_channels.as_deref().map(normalize_channels),
            pre_release_sub_channels: self
                .pre_release_sub_channels
                .as_deref()
                .map(normalize_sub_channels),
            include_regex: normalize_regex(self.include_regex.as_deref()),
            exclude_regex: normalize_regex(self.exclude_regex.as_deref()),
            releases_per_page: self.releases_per_page.map(|n| n.clamp(1, MAX_RELEASES_PER_CHECK)),
        }
    }

    pub fn validate(&self) -> WatchResult<()> {
        check_pattern("include_regex", normalize_regex(self.include_regex.as_deref()).as_deref())?;
        check_pattern("exclude_regex", normalize_regex(self.exclude_regex.as_deref()).as_deref())?;
        Ok(())
    }
}

/// Effective, normalized filter for one repository. Two equal values select
/// the same release from the same upstream list, so a cached ETag stays valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSettings {
    pub channels: Vec<ReleaseChannel>,
    pub pre_release_sub_channels: Vec<String>,
    pub include_regex: Option<String>,
    pub exclude_regex: Option<String>,
    pub releases_per_page: u32,
}

impl FilterSettings {
    pub fn allows(&self, channel: ReleaseChannel) -> bool {
        self.channels.contains(&channel)
    }

    /// Per-request page size.
    pub fn page_size(&self) -> u32 {
        self.releases_per_page.min(MAX_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_regex_is_unset() {
        let s = Settings {
            include_regex: Some("   ".into()),
            exclude_regex: Some("\t\n".into()),
            ..Settings::default()
        };
        let n = s.normalized();
        assert_eq!(n.include_regex, None);
        assert_eq!(n.exclude_regex, None);
        assert_eq!(
            s.filter_for(&RepoSettings::default()),
            Settings::default().filter_for(&RepoSettings::default())
        );
    }

    #[test]
    fn regex_is_trimmed() {
        let s = Settings {
            include_regex: Some("  ^v\\d+ ".into()),
            ..Settings::default()
        };
        assert_eq!(s.normalized().include_regex.as_deref(), Some("^v\\d+"));
    }

    #[test]
    fn overrides_take_precedence() {
        let global = Settings {
            include_regex: Some("^v".into()),
            ..Settings::default()
        };
        let overrides = RepoSettings {
            release_channels: Some(vec![ReleaseChannel::Prerelease, ReleaseChannel::Stable]),
            include_regex: Some("^release-".into()),
            releases_per_page: Some(5000),
            ..RepoSettings::default()
        };
        let f = global.filter_for(&overrides);
        assert_eq!(
            f.channels,
            vec![ReleaseChannel::Stable, ReleaseChannel::Prerelease]
        );
        assert_eq!(f.include_regex.as_deref(), Some("^release-"));
        assert_eq!(f.releases_per_page, MAX_RELEASES_PER_CHECK);
    }

    #[test]
    fn refresh_period_has_one_minute_floor() {
        let s = Settings {
            refresh_interval: 0,
            ..Settings::default()
        };
        assert_eq!(s.refresh_period(), Duration::from_secs(60));
    }

    #[test]
    fn oversized_intervals_are_capped() {
        let s = Settings {
            refresh_interval: u64::MAX / 2,
            cache_interval: 1 << 60,
            ..Settings::default()
        };
        assert_eq!(
            s.refresh_period(),
            Duration::from_secs(MAX_INTERVAL_MINUTES * 60)
        );
        assert_eq!(
            s.cache_period(),
            chrono::Duration::minutes(MAX_INTERVAL_MINUTES as i64)
        );
        let n = s.normalized();
        assert_eq!(n.refresh_interval, MAX_INTERVAL_MINUTES);
        assert_eq!(n.cache_interval, MAX_INTERVAL_MINUTES);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let s = Settings {
            exclude_regex: Some("(unclosed".into()),
            ..Settings::default()
        };
        let err = s.validate().unwrap_err();
        assert_eq!(err.kind().as_str(), "invalid_settings");
    }

    #[test]
    fn settings_roundtrip_uses_defaults_for_missing_fields() {
        let s: Settings = serde_json::from_str(r#"{"refresh_interval": 30, "time_format": "12h"}"#)
            .unwrap();
        assert_eq!(s.refresh_interval, 30);
        assert_eq!(s.time_format, TimeFormat::TwelveHour);
        assert_eq!(s.release_channels, vec![ReleaseChannel::Stable]);
    }
}
