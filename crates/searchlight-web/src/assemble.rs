//! Bounded context assembly with citation markers

use std::collections::{HashMap, HashSet};

use crate::search::normalize_url;
use crate::types::{Citation, FetchedPage, SearchResult, WebContext};

const BLOCK_SEPARATOR: &str = "\n\n";

/// Build the context block for one turn.
///
/// Sources are taken in search-rank order. When at least one page was
/// fetched, only results with a fetched page are used; otherwise the search
/// snippets stand in. `budget` caps `assembled_text` in UTF-8 bytes.
pub fn assemble(pages: &[FetchedPage], results: &[SearchResult], budget: usize) -> WebContext {
    if budget == 0 {
        return WebContext::default();
    }

    let by_url: HashMap<String, &FetchedPage> = pages
        .iter()
        .filter(|p| !p.extracted_text.trim().is_empty())
        .map(|p| (normalize_url(&p.url), p))
        .collect();
    let use_pages = !by_url.is_empty();

    let mut ranked: Vec<&SearchResult> = results.iter().collect();
    ranked.sort_by_key(|r| r.rank);

    let mut context = WebContext::default();
    let mut seen = HashSet::new();

    for result in ranked {
        let key = normalize_url(&result.url);
        if !seen.insert(key.clone()) {
            continue;
        }

        let (title, body) = if use_pages {
            match by_url.get(&key) {
                Some(page) => (
                    page.title
                        .as_deref()
                        .filter(|t| !t.trim().is_empty())
                        .unwrap_or(&result.title),
                    page.extracted_text.trim(),
                ),
                None => continue,
            }
        } else {
            let snippet = result.snippet.trim();
            if snippet.is_empty() {
                continue;
            }
            (result.title.as_str(), snippet)
        };

        let n = context.citations.len() + 1;
        let separator = if context.assembled_text.is_empty() {
            ""
        } else {
            BLOCK_SEPARATOR
        };
        let header = format!("{}[{}] {}\nURL: {}\n", separator, n, title, result.url);

        let remaining = budget - context.assembled_text.len();
        if header.len() >= remaining {
            break;
        }

        let room = remaining - header.len();
        let (body, cut) = if body.len() > room {
            (&body[..floor_char_boundary(body, room)], true)
        } else {
            (body, false)
        };

        context.assembled_text.push_str(&header);
        context.assembled_text.push_str(body);
        context.citations.push(Citation {
            title: title.to_string(),
            url: result.url.clone(),
        });

        if cut {
            break;
        }
    }

    debug_assert!(context.assembled_text.len() <= budget);
    tracing::debug!(
        sources = context.citations.len(),
        bytes = context.assembled_text.len(),
        from_pages = use_pages,
        "web context assembled"
    );
    context
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(n: usize, snippet: &str) -> SearchResult {
        SearchResult {
            title: format!("Result {}", n),
            url: format!("https://site{}.example/page", n),
            snippet: snippet.to_string(),
            rank: n,
        }
    }

    fn page(n: usize, text: &str) -> FetchedPage {
        FetchedPage {
            url: format!("https://site{}.example/page", n),
            title: Some(format!("Page {}", n)),
            extracted_text: text.to_string(),
            truncated: false,
        }
    }

    #[test]
    fn test_zero_budget_is_empty() {
        let ctx = assemble(&[page(1, "text")], &[result(1, "s")], 0);
        assert!(ctx.is_empty());
        assert!(ctx.citations.is_empty());
    }

    #[test]
    fn test_pages_in_rank_order_with_markers() {
        let results = vec![result(2, "b"), result(1, "a"), result(3, "c")];
        let pages = vec![page(3, "third body"), page(1, "first body")];
        let ctx = assemble(&pages, &results, 10_000);

        assert_eq!(
            ctx.assembled_text,
            "[1] Page 1\nURL: https://site1.example/page\nfirst body\n\n\
             [2] Page 3\nURL: https://site3.example/page\nthird body"
        );
        let urls: Vec<&str> = ctx.citations.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["https://site1.example/page", "https://site3.example/page"]);
        assert_eq!(ctx.citations[0].title, "Page 1");
    }

    #[test]
    fn test_falls_back_to_snippets() {
        let results = vec![result(1, "snippet one"), result(2, ""), result(3, "snippet three")];
        let ctx = assemble(&[], &results, 10_000);
        assert_eq!(ctx.citations.len(), 2);
        assert!(ctx.assembled_text.contains("[2] Result 3\n"));
        assert!(ctx.assembled_text.contains("snippet three"));
    }

    #[test]
    fn test_budget_is_never_exceeded() {
        let results: Vec<SearchResult> = (1..=5).map(|n| result(n, "x")).collect();
        let pages: Vec<FetchedPage> = (1..=5).map(|n| page(n, &"é lorem ".repeat(100))).collect();
        for budget in [1, 10, 40, 41, 57, 100, 333, 1_000, 5_000] {
            let ctx = assemble(&pages, &results, budget);
            assert!(ctx.assembled_text.len() <= budget, "budget {}", budget);
            assert!(ctx.assembled_text.chars().count() <= budget);
        }
    }

    #[test]
    fn test_partial_block_stops_assembly() {
        let results = vec![result(1, ""), result(2, "")];
        let pages = vec![page(1, &"a".repeat(500)), page(2, "short")];
        let ctx = assemble(&pages, &results, 100);
        assert_eq!(ctx.citations.len(), 1);
        assert_eq!(ctx.assembled_text.len(), 100);
    }

    #[test]
    fn test_header_that_does_not_fit_stops() {
        let ctx = assemble(&[page(1, "body")], &[result(1, "")], 10);
        assert!(ctx.is_empty());
        assert!(ctx.citations.is_empty());
    }

    #[test]
    fn test_duplicate_urls_cited_once() {
        let mut dup = result(2, "dup");
        dup.url = "https://site1.example/page/".to_string();
        let ctx = assemble(&[], &[result(1, "one"), dup], 10_000);
        assert_eq!(ctx.citations.len(), 1);
    }

    #[test]
    fn test_floor_char_boundary() {
        let s = "aé";
        assert_eq!(floor_char_boundary(s, 2), 1);
        assert_eq!(floor_char_boundary(s, 3), 3);
        assert_eq!(floor_char_boundary(s, 10), 3);
    }
}
