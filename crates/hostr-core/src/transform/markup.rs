//! Markup cleanup: Hive HTML/markdown bodies to plain text.

use std::sync::LazyLock;

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use regex::Regex;

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid html tag pattern"));

// Signature appended by the d.buzz frontend, always on the last line.
static DBUZZ_SIGNATURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)posted via[^\n]*d\.buzz[^\n]*$").expect("valid signature pattern"));

static LINE_PADDING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]*\n[ \t]*").expect("valid padding pattern"));

/// Remove HTML tags, the d.buzz signature and per-line padding.
///
/// Blank lines survive so markdown paragraphs still parse.
pub fn clean_content(content: &str) -> String {
    let without_tags = HTML_TAG.replace_all(content, "");
    let trimmed = without_tags.trim_end();
    let without_signature = DBUZZ_SIGNATURE.replace(trimmed, "");
    LINE_PADDING
        .replace_all(&without_signature, "\n")
        .trim()
        .to_string()
}

/// Render markdown as plain text.
///
/// Link and image targets are kept as literal URLs in place of their
/// label; heading, emphasis, list, quote and table syntax is reduced to the
/// inner text; fenced code is dropped; blank lines are removed.
pub fn strip_markdown(input: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut out = String::with_capacity(input.len());
    // Targets of the links/images we are inside; their label text is dropped.
    let mut targets: Vec<String> = Vec::new();
    let mut in_code_block = false;

    for event in Parser::new_ext(input, options) {
        match event {
            Event::Start(Tag::Link { dest_url, .. }) | Event::Start(Tag::Image { dest_url, .. }) => {
                targets.push(dest_url.to_string());
            }
            Event::End(TagEnd::Link) | Event::End(TagEnd::Image) => {
                if let Some(url) = targets.pop() {
                    if targets.is_empty() {
                        out.push_str(&url);
                    }
                }
            }
            Event::Start(Tag::CodeBlock(_)) => in_code_block = true,
            Event::End(TagEnd::CodeBlock) => in_code_block = false,
            Event::Text(text) | Event::Code(text) => {
                if !in_code_block && targets.is_empty() {
                    out.push_str(&text);
                }
            }
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::End(TagEnd::Paragraph)
            | Event::End(TagEnd::Heading(_))
            | Event::End(TagEnd::Item)
            | Event::End(TagEnd::TableHead)
            | Event::End(TagEnd::TableRow)
            | Event::Rule => out.push('\n'),
            Event::End(TagEnd::TableCell) => out.push(' '),
            _ => {}
        }
    }

    collapse_blank_lines(&out)
}

/// Full Hive body to plain-text pipeline.
pub fn plain_text(body: &str) -> String {
    strip_markdown(&clean_content(body))
}

fn collapse_blank_lines(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_content_strips_html_and_signature() {
        let body = "<center>Hello</center>\n\n  world  \n\nPosted via D.Buzz (https://d.buzz)";
        assert_eq!(clean_content(body), "Hello\n\nworld");
    }

    #[test]
    fn test_links_and_images_become_urls() {
        let md = "See [my site](https://example.com) and ![pic](https://img.example/a.png)";
        assert_eq!(
            strip_markdown(md),
            "See https://example.com and https://img.example/a.png"
        );
    }

    #[test]
    fn test_headers_emphasis_and_lists() {
        let md = "# Title\n\nSome **bold** and _italic_ text\n\n- one\n- two\n\n1. first\n2. second";
        assert_eq!(
            strip_markdown(md),
            "Title\nSome bold and italic text\none\ntwo\nfirst\nsecond"
        );
    }

    #[test]
    fn test_code_fences_dropped_inline_code_kept() {
        let md = "Run `cargo` now\n\n```\nsecret code\n```\n\nDone";
        assert_eq!(strip_markdown(md), "Run cargo now\nDone");
    }

    #[test]
    fn test_tables_reduce_to_cells() {
        let md = "| a | b |\n|---|---|\n| 1 | 2 |";
        assert_eq!(strip_markdown(md), "a b\n1 2");
    }

    #[test]
    fn test_blank_line_runs_collapse() {
        let md = "one\n\n\n\n> quoted\n\n---\n\ntwo";
        assert_eq!(strip_markdown(md), "one\nquoted\ntwo");
    }

    #[test]
    fn test_bare_urls_survive() {
        assert_eq!(
            plain_text("check https://hive.blog/@alice/post"),
            "check https://hive.blog/@alice/post"
        );
    }
}
