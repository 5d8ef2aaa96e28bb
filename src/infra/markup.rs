//! Comrak-backed markup renderer with ammonia sanitisation and page includes.

use ammonia::Builder as AmmoniaBuilder;
use comrak::{Arena, format_html, options::Options, parse_document};

use crate::domain::FetchError;
use crate::fetch::host::{MarkupRenderer, RenderScope};

/// Config value switching newlines inside paragraphs into `<br>`.
pub const HARD_BREAKS_VALUE: &str = "markup.hard_breaks";

const INCLUDE_OPEN: &str = "{{page>";
const INCLUDE_CLOSE: &str = "}}";

/// Renders CommonMark with the GFM extensions.
///
/// A line holding only `{{page>ID}}` embeds page `ID` of the same drive as a
/// nested fragment; the including fragment then depends on it.
pub struct ComrakMarkupRenderer {
    options: Options<'static>,
    sanitizer: AmmoniaBuilder<'static>,
}

impl Default for ComrakMarkupRenderer {
    fn default() -> Self {
        Self {
            options: default_options(),
            sanitizer: build_sanitizer(),
        }
    }
}

impl MarkupRenderer for ComrakMarkupRenderer {
    fn render(&self, source: &str, scope: &mut RenderScope<'_, '_>) -> Result<String, FetchError> {
        let mut options = self.options.clone();
        options.render.hardbreaks = scope
            .config_value(HARD_BREAKS_VALUE)
            .is_some_and(|value| is_truthy(&value));

        let mut html = String::new();
        let mut pending = String::new();
        for line in source.lines() {
            match include_target(line) {
                Some(id) => {
                    self.flush(&mut pending, &options, &mut html)?;
                    html.push_str(&scope.fragment(id)?);
                }
                None => {
                    pending.push_str(line);
                    pending.push('\n');
                }
            }
        }
        self.flush(&mut pending, &options, &mut html)?;
        Ok(html)
    }
}

impl ComrakMarkupRenderer {
    fn flush(
        &self,
        pending: &mut String,
        options: &Options<'static>,
        html: &mut String,
    ) -> Result<(), FetchError> {
        if pending.trim().is_empty() {
            pending.clear();
            return Ok(());
        }

        let arena = Arena::new();
        let root = parse_document(&arena, pending.as_str(), options);
        let mut rendered = String::new();
        format_html(root, options, &mut rendered)
            .map_err(|err| FetchError::internal(format!("markup rendering failed: {err}")))?;

        html.push_str(&self.sanitizer.clean(&rendered).to_string());
        pending.clear();
        Ok(())
    }
}

fn include_target(line: &str) -> Option<&str> {
    let inner = line
        .trim()
        .strip_prefix(INCLUDE_OPEN)?
        .strip_suffix(INCLUDE_CLOSE)?;
    let id = inner.split('|').next().unwrap_or_default().trim();
    (!id.is_empty()).then_some(id)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn default_options() -> Options<'static> {
    let mut options = Options::default();

    let ext = &mut options.extension;
    ext.strikethrough = true;
    ext.table = true;
    ext.autolink = true;
    ext.tasklist = true;
    ext.footnotes = true;
    ext.description_lists = true;
    ext.underline = true;

    let render = &mut options.render;
    render.github_pre_lang = true;
    render.tasklist_classes = true;
    render.r#unsafe = true;
    render.sourcepos = false;

    options
}

fn build_sanitizer() -> AmmoniaBuilder<'static> {
    let mut builder = AmmoniaBuilder::default();
    builder.add_tags(&["input", "section", "sup", "dl", "dt", "dd"]);
    builder.add_generic_attributes(&["class", "id"]);
    builder.add_tag_attributes("input", &["type", "checked", "disabled"]);
    builder.add_tag_attributes("th", &["align"]);
    builder.add_tag_attributes("td", &["align"]);
    builder.add_tag_attributes("pre", &["lang"]);
    builder.add_url_schemes(["http", "https", "mailto", "tel"].iter().copied());
    builder
}
