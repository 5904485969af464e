//! Notification bodies: plain text, markdown and HTML renderings of a release.
use chrono::{DateTime, Utc};
use pulldown_cmark::{html, Event, Options, Parser};

use crate::i18n::Translator;
use crate::model::{Release, Repository};
use crate::settings::{NotificationFormat, Settings, TimeFormat};

/// A rendered notification in every supported format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub title: String,
    pub text: String,
    pub markdown: String,
    pub html: String,
    /// Appended when a text or markdown body is cut short.
    pub truncation_marker: String,
}

impl Message {
    /// Body for `format`, honoring `max_chars` for text and markdown only.
    /// HTML is always sent whole.
    pub fn body(&self, format: NotificationFormat, max_chars: Option<usize>) -> String {
        match format {
            NotificationFormat::Html => self.html.clone(),
            NotificationFormat::Text => truncate_chars(&self.text, max_chars, &self.truncation_marker),
            NotificationFormat::Markdown => {
                truncate_chars(&self.markdown, max_chars, &self.truncation_marker)
            }
        }
    }
}

/// Cut `body` to at most `max_chars` characters, ending with `marker` when cut.
pub fn truncate_chars(body: &str, max_chars: Option<usize>, marker: &str) -> String {
    let Some(max) = max_chars else {
        return body.to_string();
    };
    if body.chars().count() <= max {
        return body.to_string();
    }
    let suffix = format!("\n{marker}");
    let suffix_len = suffix.chars().count();
    if max <= suffix_len {
        return body.chars().take(max).collect();
    }
    let mut out: String = body.chars().take(max - suffix_len).collect();
    out.push_str(&suffix);
    out
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render release notes to HTML. Raw HTML in the notes is escaped, not passed through.
pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(markdown, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

pub fn format_timestamp(at: DateTime<Utc>, format: TimeFormat) -> String {
    match format {
        TimeFormat::TwelveHour => at.format("%Y-%m-%d %I:%M %p UTC").to_string(),
        TimeFormat::TwentyFourHour => at.format("%Y-%m-%d %H:%M UTC").to_string(),
    }
}

pub fn build_message(
    repo: &Repository,
    release: &Release,
    settings: &Settings,
    t: &dyn Translator,
) -> Message {
    let title = t.translate(
        "notification.title",
        &[("repo", repo.id.as_str()), ("tag", release.tag_name.as_str())],
    );
    let label = |key: &str| t.translate(&format!("notification.label.{key}"), &[]);
    let published = format_timestamp(release.released_at(), settings.time_format);

    let mut qualifiers = Vec::new();
    if release.prerelease {
        qualifiers.push(t.translate("notification.prerelease", &[]));
    }
    if release.draft {
        qualifiers.push(t.translate("notification.draft", &[]));
    }
    let qualifier = if qualifiers.is_empty() {
        String::new()
    } else {
        format!(" [{}]", qualifiers.join(", "))
    };

    let notes = release.body.trim();
    let notes = if notes.is_empty() {
        t.translate("notification.no_notes", &[])
    } else {
        notes.to_string()
    };

    let text = format!(
        "{title}\n\n\
         {repo_label}: {repo_id} ({repo_url})\n\
         {release_label}: {name} ({tag}){qualifier}\n\
         {published_label}: {published}\n\
         {link_label}: {link}\n\n\
         {notes_label}:\n{notes}",
        repo_label = label("repository"),
        repo_id = repo.id,
        repo_url = repo.url,
        release_label = label("release"),
        name = release.display_name(),
        tag = release.tag_name,
        published_label = label("published"),
        link_label = label("link"),
        link = release.html_url,
        notes_label = label("notes"),
    );

    let markdown = format!(
        "**{repo_label}:** [{repo_id}]({repo_url})\n\
         **{release_label}:** [{name}]({link}) (`{tag}`){qualifier}\n\
         **{published_label}:** {published}\n\n\
         **{notes_label}:**\n\n{notes}",
        repo_label = label("repository"),
        repo_id = repo.id,
        repo_url = repo.url,
        release_label = label("release"),
        name = release.display_name(),
        link = release.html_url,
        tag = release.tag_name,
        published_label = label("published"),
        notes_label = label("notes"),
    );

    let html = format!(
        "<h2>{title}</h2>\n\
         <p><strong>{repo_label}:</strong> <a href=\"{repo_url}\">{repo_id}</a><br>\n\
         <strong>{release_label}:</strong> <a href=\"{link}\">{name}</a> (<code>{tag}</code>){qualifier}<br>\n\
         <strong>{published_label}:</strong> {published}</p>\n\
         <h3>{notes_label}</h3>\n{rendered}",
        title = escape_html(&title),
        repo_label = escape_html(&label("repository")),
        repo_url = escape_html(&repo.url),
        repo_id = escape_html(&repo.id),
        release_label = escape_html(&label("release")),
        link = escape_html(&release.html_url),
        name = escape_html(release.display_name()),
        tag = escape_html(&release.tag_name),
        qualifier = escape_html(&qualifier),
        published_label = escape_html(&label("published")),
        published = escape_html(&published),
        notes_label = escape_html(&label("notes")),
        rendered = render_markdown(&notes),
    );

    Message {
        title,
        text,
        markdown,
        html,
        truncation_marker: t.translate("notification.truncated", &[]),
    }
}
