//! Release selection (channels, sub-channels, include/exclude patterns) and
//! new-release detection against a repository's last seen tag.
use regex::Regex;
use tracing::warn;

use crate::model::{Release, ReleaseChannel, Repository};
use crate::settings::FilterSettings;

fn compile(field: &str, pattern: Option<&str>) -> Option<Regex> {
    let pattern = pattern?;
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            warn!(field, pattern, %err, "ignoring invalid release filter pattern");
            None
        }
    }
}

fn matches_sub_channel(tag: &str, sub_channels: &[String]) -> bool {
    if sub_channels.is_empty() {
        return true;
    }
    let tag = tag.to_ascii_lowercase();
    sub_channels.iter().any(|s| tag.contains(s.as_str()))
}

/// Keep releases that pass the channel rules and patterns, in input order.
pub fn filter_releases<'a>(releases: &'a [Release], filter: &FilterSettings) -> Vec<&'a Release> {
    let include = compile("include_regex", filter.include_regex.as_deref());
    let exclude = compile("exclude_regex", filter.exclude_regex.as_deref());

    releases
        .iter()
        .filter(|r| match r.channel() {
            ReleaseChannel::Draft => filter.allows(ReleaseChannel::Draft),
            ReleaseChannel::Prerelease => {
                filter.allows(ReleaseChannel::Prerelease)
                    && matches_sub_channel(&r.tag_name, &filter.pre_release_sub_channels)
            }
            ReleaseChannel::Stable => filter.allows(ReleaseChannel::Stable),
        })
        .filter(|r| include.as_ref().map_or(true, |re| re.is_match(&r.tag_name)))
        .filter(|r| !exclude.as_ref().is_some_and(|re| re.is_match(&r.tag_name)))
        .collect()
}

/// Most recent release passing [`filter_releases`]. Ties keep the provider's order.
pub fn select_latest(releases: &[Release], filter: &FilterSettings) -> Option<Release> {
    filter_releases(releases, filter)
        .into_iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.released_at().cmp(&b.released_at()).then(ib.cmp(ia)))
        .map(|(_, r)| r.clone())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// First check; the tag is recorded without notifying.
    Baseline,
    /// Tag differs from the last seen one.
    New,
    Unchanged,
    /// Nothing passed the filter.
    NoRelease,
}

/// Compare `latest` with the repository's last seen tag and update the
/// repository in place. The caller persists the repository before notifying.
pub fn detect_new_release(
    repo: &mut Repository,
    latest: Option<Release>,
    show_acknowledge: bool,
) -> Detection {
    let Some(release) = latest else {
        repo.latest_release = None;
        return Detection::NoRelease;
    };
    let detection = match repo.last_seen_release_tag.as_deref() {
        None => Detection::Baseline,
        Some(tag) if tag == release.tag_name => Detection::Unchanged,
        Some(_) => Detection::New,
    };
    if detection != Detection::Unchanged {
        repo.last_seen_release_tag = Some(release.tag_name.clone());
    }
    if detection == Detection::New && show_acknowledge {
        repo.is_new = true;
    }
    repo.latest_release = Some(release);
    detection
}
