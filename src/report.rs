//! Console rendering of the final report

use crate::pipeline::WorkflowRun;
use crate::schemas::{Confidence, ScraperRow, WeightReport};
use std::fmt::Write;

fn confidence_label(confidence: Confidence) -> &'static str {
    match confidence {
        Confidence::High => "High",
        Confidence::Medium => "Medium",
        Confidence::Low => "Low",
    }
}

/// The weight report as plain text
pub fn render_weight_report(report: &WeightReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Bike Weight Report: {} {} {}",
        report.brand, report.model, report.year
    );
    let _ = writeln!(out, "{}", "=".repeat(60));
    let _ = writeln!(out, "Final weight: {}", report.final_weight);
    let _ = writeln!(out, "Confidence:   {}", confidence_label(report.confidence));
    let _ = writeln!(out);
    let _ = writeln!(out, "Sources:");
    for (i, detail) in report.url_details.iter().enumerate() {
        let marker = if detail.data_found { "found" } else { "-" };
        let _ = writeln!(out, "  {}. [{marker}] {}", i + 1, detail.url);
        let _ = writeln!(out, "     {}", detail.observations);
    }
    out
}

fn render_row(out: &mut String, index: usize, row: &ScraperRow) {
    let _ = writeln!(out, "  {}. {} [{}]", index + 1, row.url, row.status.as_str());
    if row.is_found() {
        let _ = writeln!(out, "     {} | \"{}\"", row.weight_value, row.evidence_snippet);
    }
    if let Some(notes) = row.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        let _ = writeln!(out, "     note: {notes}");
    }
}

/// Full run summary: report, extraction rows and run metadata
pub fn render_run(run: &WorkflowRun) -> String {
    let mut out = render_weight_report(&run.report);
    let _ = writeln!(out);
    let _ = writeln!(out, "Extraction ({} worker round(s)):", run.worker_rounds);
    for (i, row) in run.rows.iter().enumerate() {
        render_row(&mut out, i, row);
    }
    let _ = writeln!(out);
    let elapsed = run.elapsed();
    let _ = writeln!(
        out,
        "Run {} | {} pages fetched | {}.{:03}s",
        run.run_id,
        run.fetched_urls.len(),
        elapsed.num_seconds(),
        elapsed.num_milliseconds().rem_euclid(1000)
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::UrlExtractionDetail;

    fn report(final_weight: &str, confidence: Confidence) -> WeightReport {
        WeightReport {
            brand: "Megamo".to_string(),
            model: "Track 00".to_string(),
            year: "2026".to_string(),
            final_weight: final_weight.to_string(),
            confidence,
            url_details: (0..5)
                .map(|i| UrlExtractionDetail {
                    url: format!("https://example.com/{i}"),
                    data_found: i == 2,
                    observations: format!("observation {i}"),
                })
                .collect(),
        }
    }

    #[test]
    fn test_render_weight_report() {
        let text = render_weight_report(&report("7.8 kg", Confidence::Medium));
        assert!(text.starts_with("Bike Weight Report: Megamo Track 00 2026\n"));
        assert!(text.contains("Final weight: 7.8 kg"));
        assert!(text.contains("Confidence:   Medium"));
        assert!(text.contains("  3. [found] https://example.com/2"));
        assert!(text.contains("  1. [-] https://example.com/0"));
        assert!(text.contains("     observation 4"));
    }

    #[test]
    fn test_render_row_notes() {
        let mut out = String::new();
        render_row(&mut out, 0, &ScraperRow::blocked("https://example.com/a"));
        assert!(out.contains("[BLOCKED (robots/meta)]"));
        assert!(out.contains("note: scraping not allowed"));
    }
}
