//! Policy-document chunking.
//!
//! Documents split along their heading hierarchy first; within a heading,
//! text splits into ~400-token windows with ~50-token overlap. Each chunk
//! carries a citation locator ("§2.1, p.5") assembled from the section
//! number and an estimated page.

/// Target window size in tokens.
pub const TARGET_WINDOW_TOKENS: usize = 400;

/// Overlap between consecutive windows in tokens.
pub const WINDOW_OVERLAP_TOKENS: usize = 50;

/// Characters per token, for estimation. Same heuristic everywhere in the
/// crate so budgets agree with each other.
const CHARS_PER_TOKEN: usize = 4;

/// Characters per estimated page of policy text.
const CHARS_PER_PAGE: usize = 3000;

/// A chunk ready for embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// Section number, e.g. `"2.1"`; empty before the first heading.
    pub section_id: String,
    /// Heading text, without the number.
    pub heading: String,
    pub text: String,
    /// Citation locator, e.g. `"§2.1, p.5"`.
    pub citation_locator: String,
    /// Ordering key: (heading index, window index within the heading).
    pub order: (usize, usize),
}

/// Estimate the token count of a text.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// One section of a document: heading plus body.
#[derive(Debug)]
struct Section {
    section_id: String,
    heading: String,
    body: String,
    /// Character offset of the section start in the source document.
    offset: usize,
}

/// Split a document into chunks.
///
/// With `split_by_sections` the heading hierarchy drives the split;
/// otherwise the whole text is one section. Within a section, text is
/// windowed by [`TARGET_WINDOW_TOKENS`] with [`WINDOW_OVERLAP_TOKENS`]
/// overlap.
pub fn chunk_document(text: &str, split_by_sections: bool) -> Vec<TextChunk> {
    let sections = if split_by_sections {
        split_sections(text)
    } else {
        vec![Section {
            section_id: String::new(),
            heading: String::new(),
            body: text.to_string(),
            offset: 0,
        }]
    };

    let mut chunks = Vec::new();
    for (heading_index, section) in sections.iter().enumerate() {
        let windows = window_text(&section.body);
        for (window_index, window) in windows.into_iter().enumerate() {
            let page = 1 + section.offset / CHARS_PER_PAGE;
            let citation_locator = if section.section_id.is_empty() {
                format!("p.{page}")
            } else {
                format!("§{}, p.{page}", section.section_id)
            };
            chunks.push(TextChunk {
                section_id: section.section_id.clone(),
                heading: section.heading.clone(),
                text: window,
                citation_locator,
                order: (heading_index, window_index),
            });
        }
    }
    chunks
}

/// Split text on heading lines. A heading is a Markdown `#` line or a
/// numbered line like `2.1 Emergency Medical Cover`.
fn split_sections(text: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current = Section {
        section_id: String::new(),
        heading: String::new(),
        body: String::new(),
        offset: 0,
    };
    let mut offset = 0usize;

    for line in text.lines() {
        if let Some((section_id, heading)) = parse_heading(line) {
            if !current.body.trim().is_empty() || !current.heading.is_empty() {
                sections.push(current);
            }
            current = Section {
                section_id,
                heading,
                body: String::new(),
                offset,
            };
        } else {
            current.body.push_str(line);
            current.body.push('\n');
        }
        offset += line.len() + 1;
    }
    if !current.body.trim().is_empty() || !current.heading.is_empty() {
        sections.push(current);
    }
    sections
}

/// Parse a heading line into (section number, heading text).
fn parse_heading(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim();

    if let Some(rest) = trimmed.strip_prefix('#') {
        let heading = rest.trim_start_matches('#').trim();
        if heading.is_empty() {
            return None;
        }
        let (section_id, title) = split_leading_number(heading);
        return Some((section_id, title));
    }

    // Numbered headings: "2.1 Emergency Medical Cover". Short line, starts
    // with a section number, no sentence punctuation at the end.
    if trimmed.len() < 80 && !trimmed.ends_with('.') {
        let (section_id, title) = split_leading_number(trimmed);
        if !section_id.is_empty() && !title.is_empty() {
            return Some((section_id, title));
        }
    }
    None
}

/// Split `"2.1 Emergency Medical"` into `("2.1", "Emergency Medical")`.
fn split_leading_number(text: &str) -> (String, String) {
    let mut end = 0;
    for (i, c) in text.char_indices() {
        if c.is_ascii_digit() || c == '.' {
            end = i + c.len_utf8();
        } else {
            break;
        }
    }
    let number: String = text.chars().take(end).collect();
    let number = number.trim_end_matches('.').to_string();
    if number.is_empty() || !number.chars().any(|c| c.is_ascii_digit()) {
        return (String::new(), text.trim().to_string());
    }
    let rest: String = text.chars().skip(end).collect();
    (number, rest.trim().to_string())
}

/// Window a section body into overlapping token windows, splitting on
/// whitespace so words stay intact.
fn window_text(body: &str) -> Vec<String> {
    let words: Vec<&str> = body.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    // Token targets converted to word counts via the chars-per-token
    // estimate (≈ 0.75 words per token works out close enough here).
    let window_words = TARGET_WINDOW_TOKENS * 3 / 4;
    let overlap_words = WINDOW_OVERLAP_TOKENS * 3 / 4;
    let stride = window_words.saturating_sub(overlap_words).max(1);

    let mut windows = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + window_words).min(words.len());
        windows.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += stride;
    }
    windows
}
