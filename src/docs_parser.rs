//! Turns a raw HTML page into a [`Section`] tree.
//!
//! The first `<h1>` becomes the page title. Every other heading opens a subsection
//! nested by heading level; a section's content is all visible text that follows
//! its heading up to the next heading of the same or a higher level.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Node, Selector};
use thiserror::Error;

use crate::section::Section;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Empty document")]
    Empty,

    #[error("Document has no headings or visible text")]
    NoContent,

    #[error("Invalid selector: {0}")]
    Selector(String),
}

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

enum Block {
    Heading {
        level: u8,
        title: String,
        id: Option<String>,
    },
    Text(String),
}

struct Draft {
    level: u8,
    title: String,
    fragment: String,
    text: Vec<String>,
    children: Vec<usize>,
}

/// Parses `html` fetched for `path` into a section tree.
pub fn parse_section(path: &str, html: &str) -> Result<Section, ParseError> {
    if html.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let document = Html::parse_document(html);
    let selector = Selector::parse("body").map_err(|e| ParseError::Selector(format!("{e:?}")))?;
    let blocks = match document.select(&selector).next() {
        Some(body) => collect_blocks(body),
        None => Vec::new(),
    };

    let mut page_title = None;
    let mut drafts = vec![Draft {
        level: 0,
        title: String::new(),
        fragment: String::new(),
        text: Vec::new(),
        children: Vec::new(),
    }];
    let mut stack = vec![0usize];
    let mut fragments = HashSet::new();

    for block in blocks {
        match block {
            Block::Heading { level, title, .. } if level == 1 && page_title.is_none() => {
                page_title = Some(title);
                stack.truncate(1);
            }
            Block::Heading { level, title, id } => {
                while stack.len() > 1 && drafts[stack[stack.len() - 1]].level >= level {
                    stack.pop();
                }
                for &open in &stack {
                    drafts[open].text.push(title.clone());
                }
                let base = id.unwrap_or_else(|| slugify(&title));
                let fragment = unique_fragment(&mut fragments, &base);
                let index = drafts.len();
                drafts.push(Draft {
                    level,
                    title,
                    fragment,
                    text: Vec::new(),
                    children: Vec::new(),
                });
                let parent = stack[stack.len() - 1];
                drafts[parent].children.push(index);
                stack.push(index);
            }
            Block::Text(text) => {
                for &open in &stack {
                    drafts[open].text.push(text.clone());
                }
            }
        }
    }

    if page_title.is_none() && drafts.len() == 1 && drafts[0].text.is_empty() {
        return Err(ParseError::NoContent);
    }

    let page_title = page_title.unwrap_or_else(|| path.to_string());
    Ok(assemble(&drafts, 0, path, path.to_string(), page_title, Utc::now()))
}

fn assemble(
    drafts: &[Draft],
    index: usize,
    base: &str,
    section_path: String,
    title: String,
    fetched_at: DateTime<Utc>,
) -> Section {
    let draft = &drafts[index];
    let subsections = draft
        .children
        .iter()
        .map(|&child| {
            let child_draft = &drafts[child];
            assemble(
                drafts,
                child,
                base,
                format!("{}#{}", base, child_draft.fragment),
                child_draft.title.clone(),
                fetched_at,
            )
        })
        .collect();

    Section {
        path: section_path,
        title,
        content: draft.text.join(" "),
        subsections,
        fetched_at,
    }
}

fn collect_blocks(body: ElementRef<'_>) -> Vec<Block> {
    let mut blocks = Vec::new();
    for node in body.descendants() {
        match node.value() {
            Node::Element(element) => {
                if let Some(level) = heading_level(element.name()) {
                    let Some(heading) = ElementRef::wrap(node) else {
                        continue;
                    };
                    blocks.push(Block::Heading {
                        level,
                        title: normalize(&heading.text().collect::<Vec<_>>().join(" ")),
                        id: element
                            .attr("id")
                            .map(str::trim)
                            .filter(|id| !id.is_empty())
                            .map(str::to_string),
                    });
                }
            }
            Node::Text(text) => {
                let hidden = node.ancestors().any(|ancestor| {
                    ancestor.value().as_element().is_some_and(|element| {
                        let name = element.name();
                        heading_level(name).is_some() || SKIPPED_ELEMENTS.contains(&name)
                    })
                });
                if hidden {
                    continue;
                }
                let text = normalize(text);
                if !text.is_empty() {
                    blocks.push(Block::Text(text));
                }
            }
            _ => {}
        }
    }
    blocks
}

fn heading_level(name: &str) -> Option<u8> {
    let mut chars = name.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some('h'), Some(digit @ '1'..='6'), None) => digit.to_digit(10).map(|d| d as u8),
        _ => None,
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "section".to_string()
    } else {
        slug.to_string()
    }
}

fn unique_fragment(taken: &mut HashSet<String>, base: &str) -> String {
    let mut candidate = base.to_string();
    let mut n = 0;
    while taken.contains(&candidate) {
        n += 1;
        candidate = format!("{base}-{n}");
    }
    taken.insert(candidate.clone());
    candidate
}
