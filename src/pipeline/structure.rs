//! Rebuilds the block → paragraph → line → word hierarchy from the flat
//! token list by sorting on the engine's grouping keys and cutting the
//! sorted run wherever a key changes.

use super::confidence::aggregate_confidence;
use super::types::{Block, BoundingBox, DocumentTree, Line, OcrToken, Paragraph};

/// Joiners between the children of each level.
const WORD_SEPARATOR: &str = " ";
const LINE_SEPARATOR: &str = "\n";
const PARAGRAPH_SEPARATOR: &str = "\n\n";
const BLOCK_SEPARATOR: &str = "\n\n";

/// Build the tree. Tokens whose text is empty after trimming are dropped,
/// so no level ever contains an empty container.
pub fn build_document_tree(tokens: &[OcrToken]) -> DocumentTree {
    let mut words: Vec<&OcrToken> = tokens
        .iter()
        .filter(|t| !t.text.trim().is_empty())
        .collect();
    // Stable: words of one line keep the engine's reading order.
    words.sort_by_key(|t| t.layout_key());

    let blocks = group_runs(&words, |t| t.block_index)
        .into_iter()
        .map(|block_words| {
            let paragraphs: Vec<Paragraph> = group_runs(block_words, |t| t.paragraph_index)
                .into_iter()
                .map(|para_words| {
                    let lines: Vec<Line> = group_runs(para_words, |t| t.line_index)
                        .into_iter()
                        .map(build_line)
                        .collect();
                    build_paragraph(para_words, lines)
                })
                .collect();
            build_block(block_words, paragraphs)
        })
        .collect();

    DocumentTree { blocks }
}

impl DocumentTree {
    /// Full page text: blocks separated by a blank line.
    pub fn text(&self) -> String {
        join_trimmed(self.blocks.iter().map(|b| b.text.as_str()), BLOCK_SEPARATOR)
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn word_count(&self) -> usize {
        self.blocks
            .iter()
            .flat_map(|b| &b.paragraphs)
            .flat_map(|p| &p.lines)
            .map(|l| l.words.len())
            .sum()
    }
}

/// Split a sorted slice into maximal runs sharing `key`.
fn group_runs<'a, 't, K: PartialEq>(
    words: &'a [&'t OcrToken],
    key: impl Fn(&OcrToken) -> K,
) -> Vec<&'a [&'t OcrToken]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=words.len() {
        if i == words.len() || key(words[i]) != key(words[start]) {
            if i > start {
                runs.push(&words[start..i]);
            }
            start = i;
        }
    }
    runs
}

fn build_line(words: &[&OcrToken]) -> Line {
    let owned: Vec<OcrToken> = words
        .iter()
        .map(|t| OcrToken {
            text: t.text.trim().to_string(),
            ..(*t).clone()
        })
        .collect();
    Line {
        index: words.first().map(|t| t.line_index).unwrap_or_default(),
        text: join_trimmed(owned.iter().map(|t| t.text.as_str()), WORD_SEPARATOR),
        bbox: enclosing(words),
        confidence: aggregate_confidence(&owned),
        words: owned,
    }
}

fn build_paragraph(words: &[&OcrToken], lines: Vec<Line>) -> Paragraph {
    Paragraph {
        index: words.first().map(|t| t.paragraph_index).unwrap_or_default(),
        text: join_trimmed(lines.iter().map(|l| l.text.as_str()), LINE_SEPARATOR),
        bbox: enclosing(words),
        confidence: mean_of(words),
        lines,
    }
}

fn build_block(words: &[&OcrToken], paragraphs: Vec<Paragraph>) -> Block {
    Block {
        index: words.first().map(|t| t.block_index).unwrap_or_default(),
        text: join_trimmed(paragraphs.iter().map(|p| p.text.as_str()), PARAGRAPH_SEPARATOR),
        bbox: enclosing(words),
        confidence: mean_of(words),
        paragraphs,
    }
}

fn enclosing(words: &[&OcrToken]) -> BoundingBox {
    let boxes: Vec<BoundingBox> = words.iter().map(|t| t.bbox()).collect();
    BoundingBox::enclosing(&boxes).unwrap_or(BoundingBox {
        x: 0,
        y: 0,
        width: 0,
        height: 0,
    })
}

fn mean_of(words: &[&OcrToken]) -> f32 {
    super::confidence::mean_confidence(words.iter().map(|t| t.confidence))
}

fn join_trimmed<'a>(parts: impl Iterator<Item = &'a str>, separator: &str) -> String {
    parts.collect::<Vec<_>>().join(separator).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ocr::test_token;

    #[test]
    fn groups_words_into_lines_and_blocks() {
        let tokens = vec![
            test_token("Hello", 90, (1, 1, 1), (10, 10, 50, 12)),
            test_token("World", 80, (1, 1, 1), (70, 10, 50, 12)),
            test_token("Foo", 70, (2, 1, 1), (10, 60, 30, 12)),
        ];
        let tree = build_document_tree(&tokens);

        assert_eq!(tree.blocks.len(), 2);
        let first = &tree.blocks[0];
        assert_eq!(first.paragraphs.len(), 1);
        assert_eq!(first.paragraphs[0].lines.len(), 1);
        assert_eq!(first.paragraphs[0].lines[0].text, "Hello World");
        assert_eq!(first.text, "Hello World");
        assert_eq!(tree.blocks[1].text, "Foo");
        assert_eq!(tree.text(), "Hello World\n\nFoo");
    }

    #[test]
    fn zero_based_keys_split_lines_within_a_block() {
        let tokens = vec![
            test_token("Hello", 90, (0, 0, 0), (10, 10, 50, 12)),
            test_token("World", 80, (0, 0, 1), (10, 30, 50, 12)),
            test_token("Foo", 70, (1, 0, 0), (10, 70, 30, 12)),
        ];
        let tree = build_document_tree(&tokens);

        assert_eq!(tree.blocks.len(), 2);
        let first = &tree.blocks[0];
        assert_eq!(first.index, 0);
        assert_eq!(first.paragraphs.len(), 1);
        assert_eq!(first.paragraphs[0].lines.len(), 2);
        assert_eq!(first.text, "Hello\nWorld");
        assert_eq!(tree.blocks[1].text, "Foo");
        assert_eq!(tree.text(), "Hello\nWorld\n\nFoo");
    }

    #[test]
    fn whitespace_tokens_are_dropped_and_empty_lines_omitted() {
        let tokens = vec![
            test_token("  ", 90, (1, 1, 1), (10, 10, 5, 12)),
            test_token("\t", 90, (1, 1, 2), (10, 30, 5, 12)),
            test_token("kept", 60, (1, 1, 3), (10, 50, 40, 12)),
        ];
        let tree = build_document_tree(&tokens);

        let lines = &tree.blocks[0].paragraphs[0].lines;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].index, 3);
        assert_eq!(lines[0].text, "kept");
        assert_eq!(tree.word_count(), 1);
    }

    #[test]
    fn only_whitespace_yields_empty_tree() {
        let tokens = vec![test_token(" ", 50, (1, 1, 1), (0, 0, 1, 1))];
        let tree = build_document_tree(&tokens);
        assert!(tree.is_empty());
        assert_eq!(tree.text(), "");
    }

    #[test]
    fn out_of_order_tokens_sort_by_keys_keeping_line_order() {
        let tokens = vec![
            test_token("second", 80, (1, 2, 1), (10, 40, 50, 12)),
            test_token("quick", 80, (1, 1, 1), (10, 10, 40, 12)),
            test_token("fox", 80, (1, 1, 1), (60, 10, 30, 12)),
            test_token("brown", 80, (1, 1, 2), (10, 25, 40, 12)),
        ];
        let tree = build_document_tree(&tokens);

        let block = &tree.blocks[0];
        assert_eq!(block.paragraphs.len(), 2);
        assert_eq!(block.paragraphs[0].text, "quick fox\nbrown");
        assert_eq!(block.text, "quick fox\nbrown\n\nsecond");
    }

    #[test]
    fn levels_carry_bbox_and_confidence() {
        let tokens = vec![
            test_token("a", 60, (1, 1, 1), (10, 10, 20, 10)),
            test_token("b", 0, (1, 1, 1), (40, 12, 20, 10)),
            test_token("c", 100, (1, 1, 2), (10, 30, 20, 10)),
        ];
        let tree = build_document_tree(&tokens);

        let para = &tree.blocks[0].paragraphs[0];
        assert_eq!(para.bbox, BoundingBox { x: 10, y: 10, width: 50, height: 30 });
        assert!((para.lines[0].confidence - 60.0).abs() < f32::EPSILON);
        assert!((para.confidence - 80.0).abs() < f32::EPSILON);
    }

    #[test]
    fn word_text_is_trimmed() {
        let tokens = vec![
            test_token(" padded ", 90, (1, 1, 1), (0, 0, 10, 10)),
            test_token("word", 90, (1, 1, 1), (12, 0, 10, 10)),
        ];
        let tree = build_document_tree(&tokens);
        let line = &tree.blocks[0].paragraphs[0].lines[0];
        assert_eq!(line.words[0].text, "padded");
        assert_eq!(line.text, "padded word");
    }
}
