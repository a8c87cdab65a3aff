//! Content extraction: main-region selection, HTML stripping, Markdown
//! conversion, code-language detection, quality scoring.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use thiserror::Error;
use url::Url;

use crate::models::ExtractedPage;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to parse HTML: {0}")]
    ParseFailed(String),
}

const STRIP_SELECTORS: &[&str] = &[
    "script",
    "style",
    "noscript",
    "template",
    "nav",
    "[role=\"navigation\"]",
    ".navigation",
    ".menu",
    ".sidebar",
    ".breadcrumb",
    ".toc",
    ".footer",
    ".advertisement",
    ".ads",
    ".social-share",
    ".comments",
];

const MAIN_REGION_SELECTORS: &[&str] = &[
    "main",
    "article",
    ".docs-content",
    ".markdown-body",
    ".documentation-content",
    ".content-body",
    "[role=\"main\"]",
];

const RECOGNIZED_LANGUAGES: &[&str] = &[
    "javascript",
    "js",
    "typescript",
    "ts",
    "python",
    "py",
    "java",
    "c",
    "cpp",
    "cs",
    "ruby",
    "rb",
    "php",
    "go",
    "rust",
    "rs",
    "html",
    "css",
    "sql",
    "shell",
    "bash",
    "sh",
    "json",
    "yaml",
    "yml",
    "xml",
    "markdown",
    "md",
];

/// Extract `{title, content_markdown, outbound_links, quality_score, word_count}`
/// from a fetched HTML page.
pub fn extract(html: &str, source_url: &str) -> Result<ExtractedPage, ExtractError> {
    let document = Html::parse_document(html);
    let base = Url::parse(source_url).ok();

    let title = extract_title(&document);
    let outbound_links = extract_outbound_links(&document, base.as_ref());

    let main_region = select_main_region(&document);
    let content_markdown = match main_region {
        Some(region) => render_region_markdown(&region),
        None => String::new(),
    };

    let word_count = content_markdown.split_whitespace().count() as u32;
    let quality_score = compute_quality_score(&content_markdown);

    Ok(ExtractedPage {
        title,
        content_markdown,
        outbound_links,
        quality_score,
        word_count,
    })
}

fn extract_title(document: &Html) -> Option<String> {
    if let Some(t) = select_first_text(document, "title") {
        if !t.is_empty() {
            return Some(t);
        }
    }
    if let Some(og) = select_first_attr(document, r#"meta[property="og:title"]"#, "content") {
        if !og.is_empty() {
            return Some(og);
        }
    }
    select_first_text(document, "h1").filter(|s| !s.is_empty())
}

fn select_first_text(document: &Html, selector_str: &str) -> Option<String> {
    let selector = Selector::parse(selector_str).ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

fn select_first_attr(document: &Html, selector_str: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector_str).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|s| s.to_string())
}

fn extract_outbound_links(document: &Html, base: Option<&Url>) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return vec![];
    };

    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();

    for el in document.select(&selector) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let trimmed = href.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("javascript:") || lower.starts_with("mailto:") {
            continue;
        }

        let resolved = match base {
            Some(b) => b.join(trimmed).ok(),
            None => Url::parse(trimmed).ok(),
        };

        if let Some(url) = resolved {
            let s = url.to_string();
            if seen.insert(s.clone()) {
                links.push(s);
            }
        }
    }

    links
}

/// First of `<main>`, `<article>`, known documentation-content containers, or
/// `role="main"`. Falls back to the descendant of `<body>` maximizing content
/// density (paragraphs + headings + code blocks, minus link-heavy noise).
fn select_main_region(document: &Html) -> Option<ElementRef<'_>> {
    for selector_str in MAIN_REGION_SELECTORS {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(el) = document.select(&selector).next() {
                return Some(el);
            }
        }
    }

    let body_selector = Selector::parse("body").ok()?;
    let body = document.select(&body_selector).next()?;
    Some(best_content_descendant(body))
}

/// Heuristic fallback: score every block-level descendant by content density
/// and return the highest scorer, defaulting to `body` itself.
fn best_content_descendant(body: ElementRef<'_>) -> ElementRef<'_> {
    let candidates_selector = Selector::parse("div, section").unwrap();

    let mut best = body;
    let mut best_score = content_density_score(body);

    for el in body.select(&candidates_selector) {
        let score = content_density_score(el);
        if score > best_score {
            best = el;
            best_score = score;
        }
    }

    best
}

fn content_density_score(el: ElementRef<'_>) -> i64 {
    let p_count = count_matching(el, "p") as i64;
    let heading_count = count_matching(el, "h1, h2, h3, h4, h5, h6") as i64;
    let code_count = count_matching(el, "pre") as i64;
    let link_count = count_matching(el, "a") as i64;

    p_count * 3 + heading_count * 2 + code_count * 4 - link_count
}

fn count_matching(el: ElementRef<'_>, selector_str: &str) -> usize {
    Selector::parse(selector_str)
        .map(|sel| el.select(&sel).count())
        .unwrap_or(0)
}

/// Walk the selected region, stripping boilerplate, and render GFM-flavored
/// Markdown via `htmd`.
fn render_region_markdown(region: &ElementRef<'_>) -> String {
    let cleaned_html = strip_boilerplate(region);
    let converter = htmd::HtmlToMarkdown::builder().build();
    let converted = converter.convert(&cleaned_html).unwrap_or_default();
    let with_languages = annotate_code_languages(region, &converted);
    let with_images = rewrite_image_refs(&with_languages);
    normalize_whitespace(&with_images)
}

/// Images are referenced by alt text only; `htmd` emits standard
/// `![alt](src "title")` syntax, but a binary reference is dropped
/// entirely in favor of a plain `[IMAGE: alt]` marker.
fn rewrite_image_refs(markdown: &str) -> String {
    static IMAGE_RE: OnceLock<Regex> = OnceLock::new();
    let re = IMAGE_RE.get_or_init(|| Regex::new(r#"!\[([^\]]*)\]\([^)]*\)"#).unwrap());
    re.replace_all(markdown, |caps: &regex::Captures| format!("[IMAGE: {}]", &caps[1]))
        .into_owned()
}

/// Serialize `region` to an HTML string with boilerplate elements dropped,
/// unless those elements themselves carry heading/paragraph content (e.g. a
/// sidebar that happens to contain a worked example stays).
fn strip_boilerplate(region: &ElementRef<'_>) -> String {
    let html = region.html();
    let fragment = Html::parse_fragment(&html);

    let mut out = fragment.html();
    for selector_str in STRIP_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        for el in fragment.select(&selector) {
            if has_substantive_content(el) {
                continue;
            }
            let fragment_html = el.html();
            out = out.replacen(&fragment_html, "", 1);
        }
    }
    out
}

fn has_substantive_content(el: ElementRef<'_>) -> bool {
    count_matching(el, "p, h1, h2, h3, h4, h5, h6") > 0
}

/// `htmd` emits bare fences without a language tag; re-detect the language
/// for each original `<pre><code>` block in source order and splice the tag
/// back into the corresponding fence.
fn annotate_code_languages(region: &ElementRef<'_>, markdown: &str) -> String {
    let Ok(pre_selector) = Selector::parse("pre") else {
        return markdown.to_string();
    };

    let languages: Vec<Option<&'static str>> = region
        .select(&pre_selector)
        .map(detect_code_language)
        .collect();

    if languages.iter().all(Option::is_none) {
        return markdown.to_string();
    }

    let mut result = String::with_capacity(markdown.len());
    let mut block_index = 0usize;
    let mut in_fence = false;

    for line in markdown.lines() {
        if line.trim_start().starts_with("```") {
            if !in_fence {
                let lang = languages.get(block_index).copied().flatten().unwrap_or("");
                result.push_str("```");
                result.push_str(lang);
                in_fence = true;
            } else {
                result.push_str("```");
                in_fence = false;
                block_index += 1;
            }
        } else {
            result.push_str(line);
        }
        result.push('\n');
    }

    result
}

fn detect_code_language(pre: ElementRef<'_>) -> Option<&'static str> {
    let code_selector = Selector::parse("code").ok()?;
    let code_el = pre.select(&code_selector).next();

    for el in [Some(pre), code_el].into_iter().flatten() {
        for class in el.value().classes() {
            if let Some(lang) = language_from_class_token(class) {
                return Some(lang);
            }
        }
        for attr in ["data-language", "data-lang", "data-code-language"] {
            if let Some(v) = el.value().attr(attr) {
                if let Some(lang) = normalize_language_token(v) {
                    return Some(lang);
                }
            }
        }
    }

    let text: String = code_el.unwrap_or(pre).text().collect();
    detect_language_by_content(&text)
}

fn language_from_class_token(class: &str) -> Option<&'static str> {
    for prefix in ["language-", "lang-", "prism-", "highlight-", "code-"] {
        if let Some(rest) = class.strip_prefix(prefix) {
            if let Some(lang) = normalize_language_token(rest) {
                return Some(lang);
            }
        }
    }
    None
}

fn normalize_language_token(token: &str) -> Option<&'static str> {
    let lower = token.to_ascii_lowercase();
    RECOGNIZED_LANGUAGES
        .iter()
        .find(|&&known| known == lower)
        .copied()
}

fn detect_language_by_content(text: &str) -> Option<&'static str> {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        vec![
            ("python", Regex::new(r#"(?m)^\s*(def |import |if __name__ == .__main__.)"#).unwrap()),
            ("javascript", Regex::new(r"\b(const|let|var|function|=>)\b").unwrap()),
            ("typescript", Regex::new(r"\b(interface|type|namespace)\b\s*\w+").unwrap()),
            ("java", Regex::new(r"\b(public|private|protected|class|void)\b").unwrap()),
            ("ruby", Regex::new(r"(?m)^\s*(def|end|module|require)\b").unwrap()),
            ("php", Regex::new(r"(\$\w+|<\?php)").unwrap()),
            ("html", Regex::new(r"<[a-zA-Z][^>]*>").unwrap()),
            ("css", Regex::new(r"[.#][\w-]+\s*\{").unwrap()),
            (
                "sql",
                Regex::new(r"(?i)\b(SELECT|INSERT|UPDATE|DELETE|FROM|WHERE)\b").unwrap(),
            ),
            ("shell", Regex::new(r"(?m)(^#!/|sudo|apt-get|yum|brew|chmod|chown)").unwrap()),
        ]
    });

    patterns
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(lang, _)| *lang)
}

/// Collapse runs of whitespace to single spaces and excess blank lines down
/// to two, but only outside fenced code blocks — the content inside a fence
/// is rendered faithfully, indentation and all.
fn normalize_whitespace(markdown: &str) -> String {
    static SPACE_RE: OnceLock<Regex> = OnceLock::new();
    static BLANK_LINES_RE: OnceLock<Regex> = OnceLock::new();
    let space_re = SPACE_RE.get_or_init(|| Regex::new(r"[ \t]+").unwrap());
    let blank_lines_re = BLANK_LINES_RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap());

    let mut out = String::with_capacity(markdown.len());
    let mut in_fence = false;
    let mut lines = markdown.lines().peekable();
    while let Some(line) = lines.next() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            out.push_str(line);
        } else if in_fence {
            out.push_str(line);
        } else {
            out.push_str(&space_re.replace_all(line, " "));
        }
        if lines.peek().is_some() {
            out.push('\n');
        }
    }

    let collapsed_blank_lines = blank_lines_re.replace_all(&out, "\n\n");
    collapsed_blank_lines.trim().to_string()
}

/// Score 0-100: structural signal (headings, code) + length + code-block
/// density + documentation-vocabulary hits.
fn compute_quality_score(markdown: &str) -> u8 {
    let mut score: i32 = 0;

    if Regex::new(r"(?m)^#{1,6} ").unwrap().is_match(markdown) {
        score += 15;
    }

    let code_block_count = markdown.matches("```").count() / 2;
    if code_block_count > 0 {
        score += 15;
    }

    let len = markdown.len();
    if len > 1000 {
        score += 10;
    }
    if len > 5000 {
        score += 15;
    }

    score += (code_block_count as i32 * 5).min(20);

    let lower = markdown.to_ascii_lowercase();
    for keyword in ["api", "documentation", "guide", "tutorial"] {
        if score >= 100 {
            break;
        }
        if lower.contains(keyword) {
            score += 5;
        }
    }

    score.clamp(0, 100) as u8
}
