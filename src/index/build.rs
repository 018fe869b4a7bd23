//! Bulk build: document stream -> spill files -> k-way merge -> disk segment.
//!
//! Spill file layout (`{dest}.spill.{n}`):
//! - 16-byte summary header (see [`summary`])
//! - records sorted by term: `key_len:i32 | key | value_len:i32 | value`,
//!   where the value is an encoded posting list in storage order
//!
//! Every spill reader ends its channel with an explicit `End` (or `Failed`),
//! so the merge never has to guess whether a quiet reader is finished.

use crate::index::disk::DiskSegment;
use crate::index::memory::MemorySegment;
use crate::index::posting::{POSTING_SIZE, PostingList};
use crate::index::segment::Segment;
use crate::index::store::{remove_if_exists, suffixed};
use crate::index::summary::{self, SUMMARY_SIZE};
use crate::index::types::{Document, IndexConfig, SegmentProperty};
use crate::utils::progress::{document_spinner, merge_bar};
use crate::utils::{Analyzer, StandardAnalyzer, read_prefixed, write_prefixed};
use anyhow::{Context, Result, bail};
use crossbeam::channel::{self, Receiver, Select, Sender};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Upper bound on documents handed to one parallel analysis pass
const ADD_BATCH: usize = 256;

/// One item of a document stream
#[derive(Debug, Clone)]
pub enum StreamMessage {
    Document(Document),
    End,
}

/// One item from a spill reader
enum SpillMessage {
    Pair(String, PostingList),
    End,
    Failed(String),
}

/// Outcome of a bulk build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub documents: u64,
    pub skipped: usize,
    pub terms: usize,
    pub spill_files: usize,
}

/// Stream documents from a JSON-lines file on a background thread.
///
/// Malformed lines are logged and skipped. The thread returns the number
/// of documents sent.
pub fn spawn_jsonl_reader(
    path: &Path,
    capacity: usize,
) -> Result<(Receiver<StreamMessage>, JoinHandle<Result<usize>>)> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let (tx, rx) = channel::bounded(capacity);
    let source = path.display().to_string();

    let handle = thread::Builder::new()
        .name("jsonl-reader".to_string())
        .spawn(move || -> Result<usize> {
            let mut sent = 0;
            for (line_no, line) in BufReader::new(file).lines().enumerate() {
                let line = line.with_context(|| format!("Failed to read {}", source))?;
                if line.trim().is_empty() {
                    continue;
                }
                let doc: Document = match serde_json::from_str(&line) {
                    Ok(doc) => doc,
                    Err(e) => {
                        warn!(file = %source, line = line_no + 1, error = %e, "skipping malformed document");
                        continue;
                    }
                };
                if tx.send(StreamMessage::Document(doc)).is_err() {
                    // consumer gave up
                    return Ok(sent);
                }
                sent += 1;
            }
            let _ = tx.send(StreamMessage::End);
            Ok(sent)
        })?;

    Ok((rx, handle))
}

/// Build a disk segment at `dest` from a JSON-lines file
pub fn build_from_jsonl(input: &Path, dest: &Path, config: &IndexConfig, silent: bool) -> Result<BuildReport> {
    let (stream, reader) = spawn_jsonl_reader(input, config.build.channel_capacity)?;
    let report = build_index_with_progress(stream, dest, config, silent);
    let sent = reader
        .join()
        .map_err(|_| anyhow::anyhow!("document reader panicked"))??;
    debug!(sent, "document reader finished");
    report
}

/// Build a disk segment at `dest` from a document stream
pub fn build_index(stream: Receiver<StreamMessage>, dest: &Path, config: &IndexConfig) -> Result<BuildReport> {
    build_index_with_progress(stream, dest, config, true)
}

/// Build a disk segment at `dest` from a document stream, with optional progress output
pub fn build_index_with_progress(
    stream: Receiver<StreamMessage>,
    dest: &Path,
    config: &IndexConfig,
    silent: bool,
) -> Result<BuildReport> {
    config.validate()?;
    let start = Instant::now();
    let removed = remove_spill_files(dest)?;
    if removed > 0 {
        info!(removed, "removed stale spill files");
    }

    let analyzer: Arc<dyn Analyzer> = Arc::new(StandardAnalyzer);
    let (spills, skipped) = spill(stream, dest, config, analyzer.clone(), silent)?;
    info!(files = spills.len(), elapsed = ?start.elapsed(), "spilled all documents");

    let mut report = merge_spills(&spills, dest, config, analyzer, silent)?;
    report.skipped = skipped;

    for path in &spills {
        remove_if_exists(path)?;
    }
    info!(
        documents = report.documents,
        terms = report.terms,
        elapsed = ?start.elapsed(),
        "indexed documents"
    );
    Ok(report)
}

/// Path of the `n`th spill file for `dest`
pub fn spill_path(dest: &Path, n: usize) -> PathBuf {
    suffixed(dest, &format!(".spill.{}", n))
}

/// Accumulate documents in memory and write a spill file every
/// `spill_threshold` documents. Returns the spill files and the number of
/// skipped documents.
fn spill(
    stream: Receiver<StreamMessage>,
    dest: &Path,
    config: &IndexConfig,
    analyzer: Arc<dyn Analyzer>,
    silent: bool,
) -> Result<(Vec<PathBuf>, usize)> {
    let threshold = config.build.spill_threshold;
    let segment = MemorySegment::with_analyzer(analyzer);
    let spinner = document_spinner(silent);

    let mut files = Vec::new();
    let mut skipped = 0;
    let mut batch: Vec<Document> = Vec::with_capacity(ADD_BATCH.min(threshold));

    let mut flush_batch = |batch: &mut Vec<Document>, files: &mut Vec<PathBuf>| -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let report = segment.add(batch)?;
        skipped += report.skipped;
        batch.clear();

        if segment.property().doc_count >= threshold as u64 {
            let path = spill_path(dest, files.len());
            write_spill(&segment, &path)?;
            files.push(path);
            segment.clear()?;
        }
        Ok(())
    };

    loop {
        match stream.recv() {
            Ok(StreamMessage::Document(doc)) => {
                if let Some(ref spinner) = spinner {
                    spinner.inc(1);
                }
                batch.push(doc);
                // never let a batch carry the segment past the threshold
                let room = threshold.saturating_sub(segment.property().doc_count as usize);
                if batch.len() >= ADD_BATCH.min(room.max(1)) {
                    flush_batch(&mut batch, &mut files)?;
                }
            }
            Ok(StreamMessage::End) => break,
            Err(_) => bail!("document stream closed without an end marker"),
        }
    }
    flush_batch(&mut batch, &mut files)?;

    if segment.property().doc_count > 0 {
        let path = spill_path(dest, files.len());
        write_spill(&segment, &path)?;
        files.push(path);
    }

    if let Some(spinner) = spinner {
        spinner.finish_with_message(format!("{} spill files", files.len()));
    }
    Ok((files, skipped))
}

/// Write a memory segment as a term-sorted spill file
fn write_spill(segment: &MemorySegment, path: &Path) -> Result<()> {
    let mut file = BufWriter::new(
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
    );
    let property = segment.property();
    file.write_all(&summary::encode(&property)?)?;

    let entries = segment.sorted_entries();
    for (term, postings) in &entries {
        write_prefixed(&mut file, term.as_bytes())?;
        write_prefixed(&mut file, &postings.encode())?;
    }
    file.flush()?;

    info!(
        file = %path.display(),
        documents = property.doc_count,
        terms = entries.len(),
        "wrote spill file"
    );
    Ok(())
}

/// Open a spill file, read its header, and stream its records on a thread
fn spawn_spill_reader(
    path: &Path,
    capacity: usize,
) -> Result<(SegmentProperty, Receiver<SpillMessage>, JoinHandle<()>)> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
    );
    let mut header = [0u8; SUMMARY_SIZE];
    reader
        .read_exact(&mut header)
        .with_context(|| format!("Spill file {} has no header", path.display()))?;
    let property = summary::decode(&header)?;

    let (tx, rx) = channel::bounded(capacity);
    let source = path.display().to_string();
    let handle = thread::Builder::new()
        .name("spill-reader".to_string())
        .spawn(move || stream_spill(reader, &source, &tx))?;
    Ok((property, rx, handle))
}

fn stream_spill<R: Read>(mut reader: R, source: &str, tx: &Sender<SpillMessage>) {
    loop {
        let message = match read_record(&mut reader) {
            Ok(Some((term, postings))) => SpillMessage::Pair(term, postings),
            Ok(None) => SpillMessage::End,
            Err(e) => SpillMessage::Failed(format!("{}: {}", source, e)),
        };
        let last = !matches!(message, SpillMessage::Pair(..));
        if tx.send(message).is_err() || last {
            return;
        }
    }
}

fn read_record<R: Read>(reader: &mut R) -> Result<Option<(String, PostingList)>> {
    let Some(key) = read_prefixed(reader)? else {
        return Ok(None);
    };
    let Some(value) = read_prefixed(reader)? else {
        bail!("record has a key but no value");
    };
    let term = String::from_utf8(key).context("term is not valid UTF-8")?;
    let postings = PostingList::decode(&value)?;
    Ok(Some((term, postings)))
}

/// K-way merge of spill files into a fresh disk segment at `dest`
fn merge_spills(
    files: &[PathBuf],
    dest: &Path,
    config: &IndexConfig,
    analyzer: Arc<dyn Analyzer>,
    silent: bool,
) -> Result<BuildReport> {
    let start = Instant::now();
    let segment = DiskSegment::create(dest, &config.store, analyzer)?;

    let mut property = SegmentProperty::default();
    let mut receivers = Vec::with_capacity(files.len());
    let mut readers = Vec::with_capacity(files.len());
    for path in files {
        let (header, rx, handle) = spawn_spill_reader(path, config.build.channel_capacity)?;
        property = property.merged(&header);
        receivers.push(rx);
        readers.push(handle);
    }

    // counts are known up front, so intermediate commits carry the final summary
    segment.set_property(property);
    let mut sink = MergeSink::new(&segment, config.build.merge_buffer_bytes);

    let bar = merge_bar(files.len() as u64, silent);
    let mut heads: Vec<Option<(String, PostingList)>> = (0..files.len()).map(|_| None).collect();
    let mut open = vec![true; files.len()];

    loop {
        // every open reader must hold a head before a pivot can be chosen
        let mut pending: Vec<usize> = (0..files.len())
            .filter(|&i| open[i] && heads[i].is_none())
            .collect();
        while !pending.is_empty() {
            let mut select = Select::new();
            for &i in &pending {
                select.recv(&receivers[i]);
            }
            let op = select.select();
            let slot = op.index();
            let i = pending[slot];
            match op.recv(&receivers[i]) {
                Ok(SpillMessage::Pair(term, postings)) => heads[i] = Some((term, postings)),
                Ok(SpillMessage::End) => {
                    open[i] = false;
                    if let Some(ref bar) = bar {
                        bar.inc(1);
                    }
                }
                Ok(SpillMessage::Failed(e)) => bail!("spill reader failed: {}", e),
                Err(_) => bail!("spill reader for {} exited without an end marker", files[i].display()),
            }
            pending.swap_remove(slot);
        }

        let pivot = heads
            .iter()
            .enumerate()
            .filter_map(|(i, head)| head.as_ref().map(|(term, _)| (i, term)))
            .min_by(|a, b| a.1.cmp(b.1))
            .map(|(i, _)| i);
        let Some(pivot) = pivot else {
            break;
        };
        let Some((term, mut postings)) = heads[pivot].take() else {
            break;
        };
        for head in heads.iter_mut() {
            if head.as_ref().is_some_and(|(t, _)| *t == term) {
                if let Some((_, other)) = head.take() {
                    postings.extend(other);
                }
            }
        }

        postings.normalize();
        sink.push(&term, &postings)?;
    }
    let terms = sink.terms;

    for handle in readers {
        if handle.join().is_err() {
            warn!("spill reader panicked after finishing");
        }
    }

    segment.close()?;
    if let Some(bar) = bar {
        bar.finish_with_message(format!("{} terms", terms));
    }

    info!(
        documents = property.doc_count,
        terms,
        elapsed = ?start.elapsed(),
        "merged spill files"
    );
    Ok(BuildReport {
        documents: property.doc_count,
        skipped: 0,
        terms,
        spill_files: files.len(),
    })
}

/// Fold every term of the segment at `src` into the segment at `dst` and
/// add up their counts. Returns the number of terms merged.
pub fn merge_index(src: &Path, dst: &Path, config: &IndexConfig) -> Result<usize> {
    let start = Instant::now();
    let analyzer: Arc<dyn Analyzer> = Arc::new(StandardAnalyzer);
    let source = DiskSegment::open_with(src, &config.store, analyzer.clone())
        .with_context(|| format!("Failed to open source index {}", src.display()))?;
    let target = DiskSegment::open_with(dst, &config.store, analyzer)
        .with_context(|| format!("Failed to open destination index {}", dst.display()))?;
    info!(
        source_terms = source.keys().len(),
        target_terms = target.keys().len(),
        "loaded indexes for merge"
    );

    let mut sink = MergeSink::new(&target, config.build.merge_buffer_bytes);
    for term in source.keys() {
        let Some(postings) = source.stored(&term)? else {
            continue;
        };
        let mut merged = target.stored(&term)?.unwrap_or_default();
        merged.extend(postings);
        merged.normalize();
        sink.push(&term, &merged)?;
    }
    let terms = sink.terms;
    target.absorb_property(&source.property());
    target.close()?;

    info!(
        src = %src.display(),
        dst = %dst.display(),
        terms,
        elapsed = ?start.elapsed(),
        "merged index"
    );
    Ok(terms)
}

/// Writes merged lists into a destination segment, committing to disk
/// whenever the staged bytes reach `limit`
struct MergeSink<'a> {
    segment: &'a DiskSegment,
    limit: usize,
    staged_bytes: usize,
    terms: usize,
}

impl<'a> MergeSink<'a> {
    fn new(segment: &'a DiskSegment, limit: usize) -> Self {
        Self {
            segment,
            limit,
            staged_bytes: 0,
            terms: 0,
        }
    }

    fn push(&mut self, term: &str, postings: &PostingList) -> Result<()> {
        self.segment.insert_list(term, postings)?;
        self.terms += 1;
        self.staged_bytes += term.len() + postings.len() * POSTING_SIZE;
        if self.staged_bytes >= self.limit {
            self.segment.flush()?;
            debug!(terms = self.terms, bytes = self.staged_bytes, "committed merged lists");
            self.staged_bytes = 0;
        }
        Ok(())
    }
}

/// Remove spill files left behind for `dest`; returns how many were removed
fn remove_spill_files(dest: &Path) -> Result<usize> {
    let Some(name) = dest.file_name().and_then(|n| n.to_str()) else {
        return Ok(0);
    };
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !dir.exists() {
        return Ok(0);
    }

    let prefix = format!("{}.spill.", name);
    let mut removed = 0;
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        if entry.file_name().to_str().is_some_and(|n| n.starts_with(&prefix)) {
            remove_if_exists(&entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::posting::Posting;
    use tempfile::TempDir;

    fn small_config(threshold: usize) -> IndexConfig {
        let mut config = IndexConfig::default();
        config.build.spill_threshold = threshold;
        config.build.channel_capacity = 4;
        config
    }

    fn feed(docs: Vec<Document>, end: bool) -> Receiver<StreamMessage> {
        let (tx, rx) = channel::unbounded();
        for doc in docs {
            tx.send(StreamMessage::Document(doc)).unwrap();
        }
        if end {
            tx.send(StreamMessage::End).unwrap();
        }
        rx
    }

    #[test]
    fn test_spill_file_count_is_ceiling() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("full");
        let docs: Vec<Document> = (0..7).map(|i| Document::new(i, format!("donut t{}", i))).collect();

        let (files, skipped) = spill(
            feed(docs, true),
            &dest,
            &small_config(3),
            Arc::new(StandardAnalyzer),
            true,
        )
        .unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(skipped, 0);
        for file in &files {
            assert!(file.exists());
        }
    }

    #[test]
    fn test_exact_multiple_has_no_empty_spill() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("full");
        let docs: Vec<Document> = (0..6).map(|i| Document::new(i, "donut")).collect();

        let (files, _) = spill(
            feed(docs, true),
            &dest,
            &small_config(3),
            Arc::new(StandardAnalyzer),
            true,
        )
        .unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_missing_end_marker_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = build_index(
            feed(vec![Document::new(1, "donut")], false),
            &dir.path().join("full"),
            &small_config(3),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_truncated_spill_fails_merge() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("full");
        let segment = MemorySegment::new();
        segment.add(&[Document::new(1, "donut glass")]).unwrap();
        let path = spill_path(&dest, 0);
        write_spill(&segment, &path).unwrap();

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        let result = merge_spills(
            &[path],
            &dest,
            &small_config(3),
            Arc::new(StandardAnalyzer),
            true,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_read_record_end_of_file() {
        let mut empty: &[u8] = &[];
        assert!(read_record(&mut empty).unwrap().is_none());
    }

    #[test]
    fn test_merge_sink_commits_when_buffer_fills() {
        let dir = TempDir::new().unwrap();
        let segment =
            DiskSegment::create(&dir.path().join("full"), &Default::default(), Arc::new(StandardAnalyzer))
                .unwrap();
        // each push stages 34 bytes, so a commit follows every second push
        let mut sink = MergeSink::new(&segment, 64);
        for i in 0..50u32 {
            let postings: PostingList = vec![Posting::new(i, 3, 1, 1.0)].into();
            sink.push(&format!("term{:02}", i), &postings).unwrap();
            assert!(segment.staged_len() <= 2);
        }
        assert_eq!(sink.terms, 50);

        segment.close().unwrap();
        assert_eq!(segment.staged_len(), 0);
        let entries = segment.entries().unwrap();
        assert_eq!(entries.len(), 50);
        assert_eq!(entries[7].1.ids(), vec![7]);
    }

    #[test]
    fn test_multi_spill_merge_with_small_buffer() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("full");
        let mut config = small_config(4);
        config.build.merge_buffer_bytes = 32;
        let docs: Vec<Document> = (0..20).map(|i| Document::new(i, format!("donut w{}", i))).collect();

        let report = build_index(feed(docs, true), &dest, &config).unwrap();
        assert_eq!(report.spill_files, 5);
        assert_eq!(report.terms, 21);

        let segment = DiskSegment::open(&dest, &config.store).unwrap();
        assert_eq!(segment.property().doc_count, 20);
        assert_eq!(segment.get("donut").unwrap().unwrap().len(), 20);
    }
}
