//! Inline citation markers (`[n]`) mapped back to the sources they reference.
//!
//! Resolution is read-only; the text and the source list are never modified.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::message::{AssistantMessage, SourceRecord};

static CITATION_REGEX: OnceLock<Regex> = OnceLock::new();

fn citation_regex() -> &'static Regex {
    CITATION_REGEX.get_or_init(|| {
        Regex::new(r"\[(\d+)\]").expect("citation regex is valid")
    })
}

/// One `[n]` marker found in answer text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Citation<'a> {
    /// One-based citation number as written in the text.
    pub number: usize,
    /// Byte offset where the marker's `[` starts.
    pub start: usize,
    /// Byte offset just past the marker's `]`.
    pub end: usize,
    /// `sources[number - 1]`, or `None` when the number points nowhere.
    pub source: Option<&'a SourceRecord>,
}

impl Citation<'_> {
    pub fn is_resolved(&self) -> bool {
        self.source.is_some()
    }
}

/// Answer text split into plain runs and citation markers, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Citation(Citation<'a>),
}

pub fn resolve<'a>(content: &'a str, sources: &'a [SourceRecord]) -> Vec<Citation<'a>> {
    citation_regex()
        .captures_iter(content)
        .filter_map(|captures| {
            let marker = captures.get(0)?;
            // Numbers too large for usize cannot index anything; leave them as text.
            let number = captures.get(1)?.as_str().parse::<usize>().ok()?;
            let source = number
                .checked_sub(1)
                .and_then(|index| sources.get(index));
            Some(Citation {
                number,
                start: marker.start(),
                end: marker.end(),
                source,
            })
        })
        .collect()
}

pub fn segments<'a>(content: &'a str, sources: &'a [SourceRecord]) -> Vec<Segment<'a>> {
    let mut segments = Vec::new();
    let mut cursor = 0;

    for citation in resolve(content, sources) {
        if citation.start > cursor {
            segments.push(Segment::Text(&content[cursor..citation.start]));
        }
        segments.push(Segment::Citation(citation));
        cursor = citation.end;
    }

    if cursor < content.len() {
        segments.push(Segment::Text(&content[cursor..]));
    }

    segments
}

/// Zero-based indices of the sources the text actually cites, ascending.
pub fn cited_sources(content: &str, sources: &[SourceRecord]) -> BTreeSet<usize> {
    resolve(content, sources)
        .into_iter()
        .filter(Citation::is_resolved)
        .map(|citation| citation.number - 1)
        .collect()
}

impl AssistantMessage {
    pub fn citations(&self) -> Vec<Citation<'_>> {
        resolve(&self.content, &self.sources)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sources() -> Vec<SourceRecord> {
        vec![
            SourceRecord::new("Elon Musk", "https://en.wikipedia.org/wiki/Elon_Musk", ""),
            SourceRecord::new("SpaceX", "https://en.wikipedia.org/wiki/SpaceX", ""),
        ]
    }

    #[test]
    fn markers_resolve_to_one_based_sources() {
        let sources = sources();
        let content = "Founder of SpaceX [2] and Tesla [1].";
        let citations = resolve(content, &sources);

        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].number, 2);
        assert_eq!(
            citations[0].source.map(|source| source.url.as_str()),
            Some("https://en.wikipedia.org/wiki/SpaceX")
        );
        assert_eq!(&content[citations[0].start..citations[0].end], "[2]");
        assert_eq!(citations[1].source.map(|source| source.title.as_str()), Some("Elon Musk"));
    }

    #[test]
    fn unknown_numbers_stay_unresolved() {
        let sources = sources();
        let citations = resolve("see [0] and [7]", &sources);
        assert_eq!(citations.len(), 2);
        assert!(citations.iter().all(|citation| !citation.is_resolved()));
    }

    #[test]
    fn non_numeric_brackets_are_plain_text() {
        let sources = sources();
        assert!(resolve("an [a] and [] and [1a]", &sources).is_empty());
        assert!(resolve("[99999999999999999999999999]", &sources).is_empty());
    }

    #[test]
    fn segments_interleave_text_and_markers() {
        let sources = sources();
        let content = "A [1][2] b";
        let parts = segments(content, &sources);

        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], Segment::Text("A "));
        assert!(matches!(parts[1], Segment::Citation(Citation { number: 1, .. })));
        assert!(matches!(parts[2], Segment::Citation(Citation { number: 2, .. })));
        assert_eq!(parts[3], Segment::Text(" b"));
    }

    #[test]
    fn cited_sources_are_deduplicated() {
        let sources = sources();
        let cited = cited_sources("[2] then [2] then [5]", &sources);
        assert_eq!(cited.into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn message_citations_use_its_own_sources() {
        let message = AssistantMessage {
            content: "Elon Musk is an entrepreneur [1].".to_string(),
            sources: sources(),
            ..AssistantMessage::default()
        };
        let citations = message.citations();
        assert_eq!(citations.len(), 1);
        assert!(citations[0].is_resolved());
    }
}
