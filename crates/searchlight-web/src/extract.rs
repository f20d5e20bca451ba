//! HTML to readable text

use scraper::{ElementRef, Html, Node, Selector};

/// Text pulled out of one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub title: Option<String>,
    pub text: String,
    /// Set when `max_chars` cut the text short
    pub truncated: bool,
}

/// A content region shorter than this is treated as a stub and the whole body is used instead
const MIN_REGION_CHARS: usize = 100;

const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "noscript", "svg", "aside", "form", "iframe",
    "template", "button",
];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "h1", "h2", "h3", "h4", "h5", "h6", "li", "ul", "ol", "tr", "td", "th",
    "table", "article", "section", "main", "blockquote", "pre", "figcaption", "dt", "dd", "hr",
];

/// Parse an HTML document and return its title and main text.
///
/// `<article>`, `<main>` and `[role=main]` are tried first; the body is used
/// when none of them holds a meaningful amount of text. Boilerplate subtrees
/// (scripts, navigation, forms, ...) are dropped.
pub fn html_to_text(html: &str, max_chars: usize) -> Extracted {
    let doc = Html::parse_document(html);
    let title = document_title(&doc);

    for region in ["article", "main", "[role=\"main\"]"] {
        let Ok(selector) = Selector::parse(region) else {
            continue;
        };
        if let Some(el) = doc.select(&selector).next() {
            let raw = element_text(&el);
            if raw.split_whitespace().map(|w| w.chars().count()).sum::<usize>() >= MIN_REGION_CHARS {
                let (text, truncated) = collapse_whitespace(&raw, max_chars);
                return Extracted {
                    title,
                    text,
                    truncated,
                };
            }
        }
    }

    let raw = match Selector::parse("body")
        .ok()
        .and_then(|s| doc.select(&s).next())
    {
        Some(body) => element_text(&body),
        None => doc.root_element().text().collect(),
    };
    let (text, truncated) = collapse_whitespace(&raw, max_chars);
    Extracted {
        title,
        text,
        truncated,
    }
}

fn document_title(doc: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let el = doc.select(&selector).next()?;
    let title = el.text().collect::<String>();
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

fn element_text(el: &ElementRef<'_>) -> String {
    let mut buf = String::new();
    collect_text(el, &mut buf);
    buf
}

fn collect_text(node: &ElementRef<'_>, buf: &mut String) {
    for child in node.children() {
        match child.value() {
            Node::Text(text) => buf.push_str(text),
            Node::Element(el) => {
                let tag = el.name();
                if SKIP_TAGS.contains(&tag) {
                    continue;
                }
                let block = BLOCK_TAGS.contains(&tag);
                if block {
                    buf.push('\n');
                }
                if let Some(child_ref) = ElementRef::wrap(child) {
                    collect_text(&child_ref, buf);
                }
                if block {
                    buf.push('\n');
                }
            }
            _ => {}
        }
    }
}

/// Collapse runs of spaces into one and runs of blank lines into a single
/// paragraph break, then cap the result at `max_chars` characters.
pub fn collapse_whitespace(text: &str, max_chars: usize) -> (String, bool) {
    let mut lines: Vec<String> = Vec::new();
    let mut blank_pending = false;
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_pending = !lines.is_empty();
            continue;
        }
        if blank_pending {
            lines.push(String::new());
            blank_pending = false;
        }
        lines.push(line);
    }
    let collapsed = lines.join("\n");

    match collapsed.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            // Prefer ending on a word boundary
            let head = &collapsed[..cut];
            let end = head.rfind(char::is_whitespace).filter(|&i| i > cut / 2).unwrap_or(cut);
            (head[..end].trim_end().to_string(), true)
        }
        None => (collapsed, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_article_and_skips_boilerplate() {
        let body = "Paris will see light rain tomorrow with highs of 14 degrees. ".repeat(3);
        let html = format!(
            r#"<html><head><title> Paris   weather </title><style>p {{}}</style></head>
            <body><nav>Home | News</nav>
            <article><h1>Forecast</h1><p>{}</p><script>track()</script></article>
            <footer>Copyright</footer></body></html>"#,
            body
        );
        let out = html_to_text(&html, 10_000);
        assert_eq!(out.title.as_deref(), Some("Paris weather"));
        assert!(out.text.starts_with("Forecast"));
        assert!(out.text.contains("light rain tomorrow"));
        assert!(!out.text.contains("Home | News"));
        assert!(!out.text.contains("track()"));
        assert!(!out.text.contains("Copyright"));
        assert!(!out.truncated);
    }

    #[test]
    fn test_short_article_falls_back_to_body() {
        let html = r#"<html><body><article>Tiny</article><p>Body paragraph with the real content.</p></body></html>"#;
        let out = html_to_text(html, 10_000);
        assert!(out.text.contains("Tiny"));
        assert!(out.text.contains("Body paragraph"));
        assert!(out.title.is_none());
    }

    #[test]
    fn test_block_tags_separate_words() {
        let html = "<body><p>one</p><p>two</p><ul><li>three</li><li>four</li></ul></body>";
        let out = html_to_text(html, 10_000);
        assert_eq!(out.text, "one\n\ntwo\n\nthree\n\nfour");
    }

    #[test]
    fn test_entities_are_decoded() {
        let out = html_to_text("<body><p>Fish &amp; chips &lt;3</p></body>", 100);
        assert_eq!(out.text, "Fish & chips <3");
    }

    #[test]
    fn test_collapse_whitespace_caps_chars() {
        let (text, truncated) = collapse_whitespace("alpha beta gamma delta", 12);
        assert!(truncated);
        assert_eq!(text, "alpha beta");

        let (text, truncated) = collapse_whitespace("  a \t b  \n\n\n\n c ", 100);
        assert!(!truncated);
        assert_eq!(text, "a b\n\nc");
    }

    #[test]
    fn test_collapse_whitespace_multibyte_boundary() {
        let (text, truncated) = collapse_whitespace("ééééé", 3);
        assert!(truncated);
        assert_eq!(text, "ééé");
    }
}
