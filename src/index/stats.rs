use crate::index::disk::DiskSegment;
use crate::index::segment::Segment;
use crate::index::store::suffixed;
use crate::index::types::{IndexConfig, SegmentProperty};
use anyhow::{Context, Result};
use std::path::Path;

/// Terms listed by `show_stats`
const TOP_TERMS: usize = 15;

/// Figures describing one on-disk segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentStats {
    pub property: SegmentProperty,
    pub term_count: usize,
    pub posting_count: u64,
    pub file_size: u64,
    /// Most frequent terms by document frequency, descending
    pub top_terms: Vec<(String, usize)>,
}

/// Gather statistics for the segment at `base`
pub fn collect_stats(base: &Path, config: &IndexConfig) -> Result<SegmentStats> {
    let segment = DiskSegment::open(base, &config.store)
        .with_context(|| format!("Failed to open index {}", base.display()))?;

    let entries = segment.entries()?;
    let posting_count = entries.iter().map(|(_, list)| list.len() as u64).sum();
    let mut top_terms: Vec<(String, usize)> = entries
        .into_iter()
        .map(|(term, list)| (term, list.len()))
        .collect();
    let term_count = top_terms.len();
    top_terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_terms.truncate(TOP_TERMS);

    Ok(SegmentStats {
        property: segment.property(),
        term_count,
        posting_count,
        file_size: files_size(base),
        top_terms,
    })
}

/// Display index statistics
pub fn show_stats(base: &Path, config: &IndexConfig) -> Result<()> {
    let stats = collect_stats(base, config)?;
    let property = stats.property;

    println!("Index Statistics");
    println!("================");
    println!();
    println!("Index base:       {}", base.display());
    println!("Document count:   {}", property.doc_count);
    println!("Token count:      {}", property.token_count);
    println!("Avg doc length:   {:.2}", property.avg_doc_len());
    println!("Distinct terms:   {}", stats.term_count);
    println!("Postings:         {}", stats.posting_count);
    if property.data_range.is_unbounded() {
        println!("Data range:       unbounded");
    } else {
        println!(
            "Data range:       [{}, {})",
            property.data_range.start, property.data_range.end
        );
    }

    if !stats.top_terms.is_empty() {
        println!();
        println!("Top terms by document frequency:");
        for (term, df) in &stats.top_terms {
            println!("  {:20} {}", term, df);
        }
        if stats.term_count > stats.top_terms.len() {
            println!("  ... and {} more", stats.term_count - stats.top_terms.len());
        }
    }

    println!();
    println!("Index size:       {}", format_size(stats.file_size));

    Ok(())
}

/// Combined size of the segment's files; missing files count as zero
fn files_size(base: &Path) -> u64 {
    [".idx", ".kv", ".sum"]
        .iter()
        .filter_map(|suffix| std::fs::metadata(suffixed(base, suffix)).ok())
        .map(|meta| meta.len())
        .sum()
}

/// Format byte size to human readable
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::types::Document;
    use tempfile::TempDir;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn test_collect_stats() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("full");
        let config = IndexConfig::default();
        {
            let segment = DiskSegment::open(&base, &config.store).unwrap();
            segment
                .add(&[
                    Document::new(1, "A donut on a glass plate. Only the donuts."),
                    Document::new(2, "donut is a donut"),
                ])
                .unwrap();
            segment.close().unwrap();
        }

        let stats = collect_stats(&base, &config).unwrap();
        assert_eq!(stats.property.doc_count, 2);
        assert_eq!(stats.top_terms[0], ("donut".to_string(), 2));
        assert_eq!(stats.term_count, stats.top_terms.len());
        assert!(stats.file_size > 0);
    }
}
