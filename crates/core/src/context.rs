use crate::models::{SearchResult, Source};

/// Renders results as `[i]: <text>` blocks, `i` being the 1-based rank, separated by
/// blank lines. `[i]` here is the same entry as `sources(results)[i - 1]`.
pub fn assemble_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(index, result)| format!("[{}]: {}", index + 1, result.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn sources(results: &[SearchResult]) -> Vec<Source> {
    results.iter().map(Source::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(text: &str, file_name: &str, score: f32) -> SearchResult {
        SearchResult {
            chunk_id: format!("id-{text}"),
            score,
            text: text.to_string(),
            document_id: "doc".to_string(),
            file_name: file_name.to_string(),
            page: Some(1),
            chunk_index: 0,
        }
    }

    #[test]
    fn context_numbers_results_by_rank() {
        let results = vec![result("alpha", "a.pdf", 0.9), result("beta", "b.pdf", 0.5)];
        assert_eq!(assemble_context(&results), "[1]: alpha\n\n[2]: beta");
    }

    #[test]
    fn near_duplicates_are_kept() {
        let results = vec![result("same", "a.pdf", 0.9), result("same", "a.pdf", 0.9)];
        assert_eq!(assemble_context(&results), "[1]: same\n\n[2]: same");
    }

    #[test]
    fn source_position_matches_citation_index() {
        let results = vec![
            result("alpha", "a.pdf", 0.9),
            result("beta", "b.pdf", 0.7),
            result("gamma", "c.pdf", 0.5),
        ];
        let context = assemble_context(&results);
        let sources = sources(&results);

        for (position, source) in sources.iter().enumerate() {
            let label = format!("[{}]: {}", position + 1, results[position].text);
            assert!(context.contains(&label));
            assert_eq!(source.file_name, results[position].file_name);
            assert_eq!(source.score, results[position].score);
        }
    }

    #[test]
    fn empty_results_give_empty_context() {
        assert_eq!(assemble_context(&[]), "");
        assert!(sources(&[]).is_empty());
    }
}
