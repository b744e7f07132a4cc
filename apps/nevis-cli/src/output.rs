//! Terminal and JSON rendering of search results and eval reports.
use serde::Serialize;

use nevis_core::types::SearchResult;
use nevis_hybrid::eval::EvalReport;

const SNIPPET_MAX_LEN: usize = 80;

#[derive(Serialize)]
struct JsonOutput<'a> {
    query: &'a str,
    results: &'a [SearchResult],
}

pub fn format_json(query: &str, results: &[SearchResult]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonOutput { query, results })
}

fn truncate(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

pub fn format_table(query: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return format!("No results for \"{query}\"");
    }
    let mut out = format!("{:>4}  {:<9} {:<36} {:>6} {:>8}  {}\n", "RANK", "KIND", "ID", "SCORE", "RAW", "SNIPPET");
    for r in results {
        out.push_str(&format!(
            "{:>4}  {:<9} {:<36} {:>6.3} {:>8.3}  {}\n",
            r.rank,
            r.kind.to_string(),
            r.entity_id,
            r.score,
            r.raw_score,
            truncate(r.snippet.as_deref().unwrap_or(""), SNIPPET_MAX_LEN)
        ));
    }
    out.pop();
    out
}

pub fn format_report(report: &EvalReport) -> String {
    let mut out = String::new();
    for r in &report.results {
        let m = &r.metrics;
        out.push_str(&format!(
            "{:<40} MRR {:.4}  Recall@{k} {:.4}  NDCG@{k} {:.4}  P {:.4}\n",
            truncate(&r.query, 40),
            m.mrr,
            m.recall_at_k,
            m.ndcg_at_k,
            m.precision,
            k = report.cutoff
        ));
    }
    for (query, err) in &report.failures {
        out.push_str(&format!("{:<40} FAILED: {err}\n", truncate(query, 40)));
    }
    match &report.average {
        Some(m) => out.push_str(&format!(
            "\n{} cases, {:.0}% succeeded. Average MRR {:.4}  Recall@{k} {:.4}  NDCG@{k} {:.4}  P {:.4}",
            report.total_cases,
            report.success_rate() * 100.0,
            m.mrr,
            m.recall_at_k,
            m.ndcg_at_k,
            m.precision,
            k = report.cutoff
        )),
        None => out.push_str(&format!("\n{} cases, none succeeded", report.total_cases)),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use nevis_core::types::EntityKind;

    fn result(rank: usize) -> SearchResult {
        SearchResult { kind: EntityKind::Document, entity_id: format!("d{rank}"), rank, score: 1.0, raw_score: 4.2, snippet: Some("401k rollover\n strategies".into()) }
    }

    #[test]
    fn table_has_header_and_flattened_snippets() {
        let table = format_table("q", &[result(1), result(2)]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("RANK"));
        assert!(lines[1].contains("DOCUMENT"));
        assert!(lines[1].ends_with("401k rollover strategies"));
    }

    #[test]
    fn json_keeps_kind_names() {
        let json = format_json("q", &[result(1)]).unwrap();
        assert!(json.contains("\"kind\": \"DOCUMENT\""));
    }

    #[test]
    fn empty_results_say_so() {
        assert_eq!(format_table("nothing", &[]), "No results for \"nothing\"");
    }
}
