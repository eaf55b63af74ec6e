use std::cmp::Ordering;
use std::collections::HashMap;

use crate::config::SelectionConfig;
use crate::models::CrossReferenceEdge;

const RELAXED_ADJACENCY: u32 = 20;
const RELAXED_PER_BOOK: usize = 4;

/// Which rung of the relaxation ladder produced a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPass {
    Strict,
    WideAdjacency,
    WideBook,
    Unconstrained,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub edges: Vec<CrossReferenceEdge>,
    pub pass: SelectionPass,
}

/// Orders edges by weight descending, then by target position ascending.
pub fn sort_edges(edges: &mut [CrossReferenceEdge]) {
    edges.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.target.cmp(&b.target))
    });
}

/// Picks up to `max_count` edges, bounding repetition per target book and
/// clustering inside one target chapter. `edges` must already be ordered the
/// way [`sort_edges`] orders them.
pub fn select(edges: &[CrossReferenceEdge], limits: &SelectionConfig) -> Selection {
    let ladder = [
        (
            SelectionPass::Strict,
            limits.max_per_target_book,
            limits.adjacency_threshold,
        ),
        (
            SelectionPass::WideAdjacency,
            limits.max_per_target_book,
            limits.adjacency_threshold.max(RELAXED_ADJACENCY),
        ),
        (
            SelectionPass::WideBook,
            limits.max_per_target_book.max(RELAXED_PER_BOOK),
            limits.adjacency_threshold.max(RELAXED_ADJACENCY),
        ),
    ];

    for (pass, max_per_book, adjacency) in ladder {
        let picked = select_with_constraints(edges, max_per_book, adjacency, limits.max_count);
        if picked.len() >= limits.min_count {
            return Selection {
                edges: picked,
                pass,
            };
        }
    }

    Selection {
        edges: edges.iter().take(limits.max_count).cloned().collect(),
        pass: SelectionPass::Unconstrained,
    }
}

fn select_with_constraints(
    edges: &[CrossReferenceEdge],
    max_per_book: usize,
    adjacency: u32,
    max_count: usize,
) -> Vec<CrossReferenceEdge> {
    let mut selected: Vec<CrossReferenceEdge> = Vec::new();
    let mut book_counts: HashMap<u32, usize> = HashMap::new();

    for edge in edges {
        if selected.len() >= max_count {
            break;
        }

        let target = edge.target;
        if book_counts.get(&target.book_id).copied().unwrap_or(0) >= max_per_book {
            continue;
        }

        let adjacent = selected.iter().any(|prev| {
            prev.target.book_id == target.book_id
                && prev.target.chapter == target.chapter
                && prev.target.verse_start.abs_diff(target.verse_start) <= adjacency
        });
        if adjacent {
            continue;
        }

        *book_counts.entry(target.book_id).or_insert(0) += 1;
        selected.push(edge.clone());
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VerseRef;

    fn edge(book: u32, chapter: u32, verse: u32, weight: f64) -> CrossReferenceEdge {
        CrossReferenceEdge {
            source: VerseRef::single(43, 3, 16),
            target: VerseRef::single(book, chapter, verse),
            weight,
            origin_tag: "openbible".to_string(),
        }
    }

    fn targets(selection: &Selection) -> Vec<(u32, u32, u32)> {
        selection
            .edges
            .iter()
            .map(|e| (e.target.book_id, e.target.chapter, e.target.verse_start))
            .collect()
    }

    #[test]
    fn strict_pass_limits_books_and_adjacency() {
        let edges = vec![
            edge(45, 5, 8, 1.0),
            edge(45, 5, 10, 0.95),
            edge(62, 4, 9, 0.9),
            edge(45, 8, 32, 0.85),
            edge(45, 10, 9, 0.8),
            edge(1, 22, 2, 0.75),
            edge(23, 53, 5, 0.7),
            edge(58, 11, 17, 0.65),
            edge(40, 20, 28, 0.6),
        ];

        let selection = select(&edges, &SelectionConfig::default());
        assert_eq!(selection.pass, SelectionPass::Strict);
        assert_eq!(
            targets(&selection),
            vec![
                (45, 5, 8),
                (62, 4, 9),
                (45, 8, 32),
                (1, 22, 2),
                (23, 53, 5),
                (58, 11, 17),
                (40, 20, 28),
            ]
        );
    }

    #[test]
    fn strict_pass_never_exceeds_bounds() {
        let mut edges = Vec::new();
        for book in 1..=6u32 {
            for verse in 1..=30u32 {
                edges.push(edge(book, 1, verse * 7, 1.0 / f64::from(verse)));
            }
        }
        sort_edges(&mut edges);

        let limits = SelectionConfig::default();
        let selection = select(&edges, &limits);
        assert_eq!(selection.pass, SelectionPass::Strict);
        assert!(selection.edges.len() <= limits.max_count);

        let mut per_book: HashMap<u32, usize> = HashMap::new();
        for e in &selection.edges {
            *per_book.entry(e.target.book_id).or_default() += 1;
        }
        assert!(per_book.values().all(|&n| n <= limits.max_per_target_book));
    }

    #[test]
    fn verses_outside_threshold_are_not_adjacent() {
        let edges = vec![
            edge(19, 23, 1, 1.0),
            edge(19, 23, 10, 0.9),
            edge(45, 8, 1, 0.8),
            edge(45, 8, 12, 0.7),
            edge(43, 10, 11, 0.6),
        ];

        let selection = select(&edges, &SelectionConfig::default());
        assert_eq!(selection.pass, SelectionPass::Strict);
        assert_eq!(selection.edges.len(), 5);
    }

    #[test]
    fn relaxes_book_limit_when_targets_concentrate() {
        let mut edges = Vec::new();
        for chapter in 1..=4u32 {
            edges.push(edge(19, chapter, 1, 1.0 - f64::from(chapter) / 10.0));
            edges.push(edge(45, chapter, 1, 0.95 - f64::from(chapter) / 10.0));
        }
        sort_edges(&mut edges);

        let limits = SelectionConfig::default();
        let selection = select(&edges, &limits);
        assert_eq!(selection.pass, SelectionPass::WideBook);
        assert_eq!(selection.edges.len(), limits.max_count);
        assert!(selection.edges.len() >= limits.min_count);
    }

    #[test]
    fn falls_back_to_top_weights_when_constraints_starve() {
        let edges: Vec<_> = (1..=9u32)
            .map(|v| edge(19, 119, v, 1.0 - f64::from(v) / 100.0))
            .collect();

        let limits = SelectionConfig::default();
        let selection = select(&edges, &limits);
        assert_eq!(selection.pass, SelectionPass::Unconstrained);
        assert_eq!(selection.edges.len(), limits.max_count);
        assert!(selection.edges.len() >= limits.min_count.min(edges.len()));
        assert_eq!(selection.edges[0].target.verse_start, 1);
    }

    #[test]
    fn small_inputs_are_returned_whole() {
        let edges = vec![edge(1, 1, 1, 0.5), edge(1, 1, 2, 0.4)];
        let selection = select(&edges, &SelectionConfig::default());
        assert_eq!(selection.edges.len(), 2);
        assert!(select(&[], &SelectionConfig::default()).edges.is_empty());
    }

    #[test]
    fn sort_is_deterministic_on_ties() {
        let mut edges = vec![
            edge(45, 5, 8, 0.5),
            edge(1, 3, 15, 0.5),
            edge(1, 3, 1, 0.5),
            edge(66, 1, 1, 0.9),
        ];
        sort_edges(&mut edges);
        let order: Vec<_> = edges
            .iter()
            .map(|e| (e.target.book_id, e.target.verse_start))
            .collect();
        assert_eq!(order, vec![(66, 1), (1, 1), (1, 15), (45, 8)]);
    }
}
