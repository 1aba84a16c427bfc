//! Judgment page repair and template composition.
//!
//! Source pages are inconsistently authored: site navigation wraps the
//! opinion, list items are left unclosed and empty blocks stand in for line
//! breaks. [`Opinion::extract`] isolates the decision text, [`Opinion::repair`]
//! fixes the defects, and [`TemplatePage`] merges the result with metadata.

pub mod dom;

use judgmental_core::{ErrorKind, JudgmentMetadata, RepairLabel};
use scraper::Selector;
use thiserror::Error;
use tracing::debug;

pub use dom::{Document, ElementData, NodeData, NodeId};

pub const CRATE_NAME: &str = "judgmental-html";

pub const OPINION_SELECTOR: &str = "div.opinion > p";
pub const TITLE_SELECTOR: &str = "title";
pub const DATE_SELECTOR: &str = "div#meta-date";
pub const CITATION_SELECTOR: &str = "span#meta-citation";
pub const COURT_SELECTOR: &str = "div#content > h1";

const PLACEHOLDERS: [&str; 5] = [
    OPINION_SELECTOR,
    TITLE_SELECTOR,
    DATE_SELECTOR,
    CITATION_SELECTOR,
    COURT_SELECTOR,
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkupError {
    #[error("can't find element \"{0}\"")]
    CantFindElement(String),
    #[error("{0}")]
    Standard(String),
}

impl MarkupError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CantFindElement(_) => ErrorKind::CantFindElement,
            Self::Standard(_) => ErrorKind::StandardConversionError,
        }
    }
}

fn parse_selector(selector: &str) -> Result<Selector, MarkupError> {
    Selector::parse(selector)
        .map_err(|e| MarkupError::Standard(format!("invalid selector {selector}: {e}")))
}

/// The body of a source page, trimmed down to the decision text.
#[derive(Debug, Clone)]
pub struct Opinion {
    doc: Document,
    body: NodeId,
}

impl Opinion {
    pub fn extract(source: &str) -> Result<Self, MarkupError> {
        let selectors = [parse_selector("body")?];
        let (mut doc, found) = Document::parse_locating(source, &selectors);
        let body = found
            .first()
            .copied()
            .flatten()
            .ok_or_else(|| MarkupError::Standard("no body tag".to_string()))?;
        find_opinion(&mut doc, body);
        Ok(Self { doc, body })
    }

    /// Runs the repair passes, returning the labels of those that changed
    /// something.
    pub fn repair(&mut self) -> Vec<RepairLabel> {
        let mut fired = Vec::new();
        if mend_unclosed_tags(&mut self.doc, self.body) {
            fired.push(RepairLabel::MendUnclosedTags);
        }
        if empty_paragraphs_to_breaks(&mut self.doc, self.body) {
            fired.push(RepairLabel::EmptyParagraphsToBreaks);
        }
        fired
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn body(&self) -> NodeId {
        self.body
    }
}

/// Drops the site furniture around the opinion.
///
/// With H horizontal rules directly under `body`, the c-th rule (0-based)
/// survives only when `0 < c < H-1`, and any other element survives only
/// when the number of rules already passed is in `0 < c < H`. Text directly
/// under `body` is left alone.
pub fn find_opinion(doc: &mut Document, body: NodeId) {
    let children = doc.children(body).to_vec();
    let separators = children
        .iter()
        .filter(|c| doc.is_element(**c, "hr"))
        .count();

    let mut seen = 0usize;
    for child in children {
        if matches!(doc.data(child), NodeData::Text(_)) {
            continue;
        }
        if doc.is_element(child, "hr") {
            if !(0 < seen && seen + 1 < separators) {
                doc.detach(child);
            }
            seen += 1;
        } else if !(0 < seen && seen < separators) {
            doc.detach(child);
        }
    }
}

fn find_misnested_item(doc: &Document, opinion: NodeId) -> Option<NodeId> {
    for outer in doc.descendant_elements(opinion, "li") {
        for link in doc.element_children(outer) {
            if !doc.is_element(link, "a") {
                continue;
            }
            if let Some(inner) = doc
                .element_children(link)
                .into_iter()
                .find(|c| doc.is_element(*c, "li"))
            {
                return Some(inner);
            }
        }
    }
    None
}

/// Untangles `<li><a><li>` chains left by unclosed list items: each inner
/// item is moved out to sit right after the item that swallowed it.
pub fn mend_unclosed_tags(doc: &mut Document, opinion: NodeId) -> bool {
    let mut mended = false;
    while let Some(culprit) = find_misnested_item(doc, opinion) {
        let Some(grandfather) = doc.parent(culprit).and_then(|link| doc.parent(link)) else {
            break;
        };
        let (Some(great_grandfather), Some(index)) =
            (doc.parent(grandfather), doc.index_in_parent(grandfather))
        else {
            break;
        };
        doc.insert(great_grandfather, index + 1, culprit);
        mended = true;
    }
    mended
}

fn is_empty_block(doc: &Document, id: NodeId) -> bool {
    doc.children(id)
        .iter()
        .all(|c| matches!(doc.data(*c), NodeData::Text(_)))
        && doc.text_content(id).trim().is_empty()
}

/// `<p/>` and `<blockquote/>` with nothing but whitespace become `<br/>`.
pub fn empty_paragraphs_to_breaks(doc: &mut Document, opinion: NodeId) -> bool {
    let mut replaced = false;
    for name in ["p", "blockquote"] {
        for block in doc.descendant_elements(opinion, name) {
            if is_empty_block(doc, block) {
                let br = doc.create_element("br");
                doc.replace_with(block, &[br]);
                replaced = true;
            }
        }
    }
    replaced
}

/// A freshly parsed page template with its placeholders located.
#[derive(Debug, Clone)]
pub struct TemplatePage {
    doc: Document,
    opinion: NodeId,
    title: NodeId,
    date: NodeId,
    citation: NodeId,
    court: NodeId,
}

impl TemplatePage {
    /// Fails with [`MarkupError::CantFindElement`] naming the first missing
    /// placeholder.
    pub fn parse(source: &str) -> Result<Self, MarkupError> {
        let selectors = PLACEHOLDERS
            .iter()
            .map(|s| parse_selector(s))
            .collect::<Result<Vec<_>, _>>()?;
        let (doc, found) = Document::parse_locating(source, &selectors);
        let locate = |index: usize| {
            found[index].ok_or_else(|| MarkupError::CantFindElement(PLACEHOLDERS[index].to_string()))
        };
        Ok(Self {
            opinion: locate(0)?,
            title: locate(1)?,
            date: locate(2)?,
            citation: locate(3)?,
            court: locate(4)?,
            doc,
        })
    }

    /// Fills the placeholders and serializes the finished page.
    ///
    /// The children of the opinion `<body>` take the placeholder's place. The
    /// `<body>` element itself is not carried over, which differs from the
    /// legacy page output: there is no nested `<body>` inside the opinion div.
    pub fn compose(mut self, opinion: &Opinion, metadata: &JudgmentMetadata) -> String {
        let source = opinion.document();
        let grafted = source
            .children(opinion.body())
            .iter()
            .map(|child| self.doc.import(source, *child))
            .collect::<Vec<_>>();
        debug!(nodes = grafted.len(), "grafting opinion into template");
        self.doc.replace_with(self.opinion, &grafted);

        let judgment = &metadata.judgment;
        self.doc.set_text(self.title, &judgment.title);
        self.doc.set_text(self.date, &judgment.date);
        self.doc.set_text(self.citation, &metadata.joined_citations());
        self.doc.set_text(self.court, &judgment.court_name);
        self.doc.to_pretty_html()
    }
}

/// Parses `template_source` and composes it with an already repaired opinion.
pub fn compose_page(
    template_source: &str,
    opinion: &Opinion,
    metadata: &JudgmentMetadata,
) -> Result<String, MarkupError> {
    Ok(TemplatePage::parse(template_source)?.compose(opinion, metadata))
}
