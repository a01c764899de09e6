//! Heading-based splitting of markdown documentation.

use std::path::Path;

use pulldown_cmark::{Event, Parser, Tag, TagEnd};

use super::{ChunkSource, SemanticChunk};
use crate::languages::Lang;

struct Heading {
    offset: usize,
    level: usize,
    title: String,
}

fn line_at(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}

/// One `section` chunk per heading; text before the first heading is named after the file.
pub(crate) fn split_sections(lang: Lang, path: &Path, source: &str) -> Vec<SemanticChunk> {
    let mut headings: Vec<Heading> = Vec::new();
    let mut open: Option<Heading> = None;

    for (event, range) in Parser::new(source).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                open = Some(Heading {
                    offset: range.start,
                    level: level as usize,
                    title: String::new(),
                });
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some(h) = open.as_mut() {
                    h.title.push_str(&text);
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(h) = open.take() {
                    headings.push(h);
                }
            }
            _ => {}
        }
    }

    let file_path = path.to_string_lossy().into_owned();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let make = |start: usize, end: usize, name: String, signature: String| {
        let body = source[start..end].trim_end();
        if body.trim().is_empty() {
            return None;
        }
        let start_line = line_at(source, start);
        Some(SemanticChunk {
            file_path: file_path.clone(),
            start_line,
            end_line: start_line + body.lines().count().saturating_sub(1),
            name,
            kind: "section".into(),
            signature,
            docstring: String::new(),
            code: body.to_string(),
            package: stem.clone(),
            parent: None,
            language: lang,
            source: ChunkSource::Docs,
        })
    };

    let mut chunks = Vec::new();
    let first = headings.first().map_or(source.len(), |h| h.offset);
    chunks.extend(make(0, first, stem.clone(), String::new()));

    for (i, heading) in headings.iter().enumerate() {
        let end = headings.get(i + 1).map_or(source.len(), |next| next.offset);
        let title = heading.title.trim().to_string();
        let signature = format!("{} {title}", "#".repeat(heading.level));
        chunks.extend(make(heading.offset, end, title, signature));
    }
    chunks
}
