//! Corpus loader.
//!
//! Walks the corpus directory, filters paths through include/exclude globs
//! and turns every matching file into [`Document`]s. `.csv` files go through
//! the tabular parser (row or file grain); everything else is read as plain
//! text, one document per file.
//!
//! Any file that cannot be read or parsed fails the whole load.

use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::{CorpusConfig, CsvGrain};
use crate::error::CorpusLoadError;
use crate::models::Document;

pub fn load_corpus(config: &CorpusConfig) -> Result<Vec<Document>, CorpusLoadError> {
    let root = &config.root;
    if !root.exists() {
        return Err(CorpusLoadError::MissingRoot(root.clone()));
    }
    if !root.is_dir() {
        return Err(CorpusLoadError::NotADirectory(root.clone()));
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec!["**/.git/**".to_string()];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut documents = Vec::new();
    let mut files = 0usize;

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        let parsed = parse_file(path, &rel_str, config)?;
        debug!(file = %rel_str, documents = parsed.len(), "parsed corpus file");
        files += 1;
        documents.extend(parsed);
    }

    if documents.is_empty() {
        return Err(CorpusLoadError::Empty(root.clone()));
    }

    // Sort for deterministic ordering
    documents.sort_by(|a, b| a.source.cmp(&b.source).then(a.row.cmp(&b.row)));

    info!(
        root = %root.display(),
        files,
        documents = documents.len(),
        "corpus loaded"
    );
    Ok(documents)
}

fn parse_file(
    path: &Path,
    relative_path: &str,
    config: &CorpusConfig,
) -> Result<Vec<Document>, CorpusLoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| CorpusLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let is_csv = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    if is_csv {
        parse_csv(&content, path, relative_path, config)
    } else {
        Ok(parse_text(&content, relative_path, config.include_metadata)
            .into_iter()
            .collect())
    }
}

fn parse_text(content: &str, relative_path: &str, include_metadata: bool) -> Option<Document> {
    let text = content.trim();
    if text.is_empty() {
        return None;
    }
    Some(make_document(
        relative_path,
        None,
        text.to_string(),
        include_metadata,
    ))
}

fn parse_csv(
    content: &str,
    path: &Path,
    relative_path: &str,
    config: &CorpusConfig,
) -> Result<Vec<Document>, CorpusLoadError> {
    let csv_err = |source| CorpusLoadError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| h.to_string())
        .collect();

    // Rows keep their 1-based position even when empty records are skipped.
    let mut rows: Vec<(usize, csv::StringRecord)> = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(csv_err)?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        rows.push((idx + 1, record));
    }

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let documents = match config.csv_grain {
        CsvGrain::Row => rows
            .iter()
            .map(|(row_number, record)| {
                make_document(
                    relative_path,
                    Some(*row_number),
                    render_row(&headers, record),
                    config.include_metadata,
                )
            })
            .collect(),
        CsvGrain::File => {
            // Re-serialised so quoted cells stay distinguishable from
            // separate ones.
            let mut writer = csv::WriterBuilder::new()
                .terminator(csv::Terminator::Any(b'\n'))
                .from_writer(Vec::new());
            writer.write_record(&headers).map_err(csv_err)?;
            for (_, record) in &rows {
                writer.write_record(record).map_err(csv_err)?;
            }
            let bytes = writer
                .into_inner()
                .map_err(|e| csv_err(csv::Error::from(e.into_error())))?;
            vec![make_document(
                relative_path,
                None,
                String::from_utf8_lossy(&bytes).trim_end().to_string(),
                config.include_metadata,
            )]
        }
    };

    Ok(documents)
}

/// `Header: value` per non-empty cell, one per line.
fn render_row(headers: &[String], row: &csv::StringRecord) -> String {
    headers
        .iter()
        .zip(row.iter())
        .filter(|(_, value)| !value.is_empty())
        .map(|(header, value)| format!("{}: {}", header, value))
        .collect::<Vec<_>>()
        .join("\n")
}

fn make_document(
    relative_path: &str,
    row: Option<usize>,
    text: String,
    include_metadata: bool,
) -> Document {
    let mut hasher = Sha256::new();
    hasher.update(relative_path.as_bytes());
    if let Some(row) = row {
        hasher.update(b"#");
        hasher.update(row.to_string().as_bytes());
    }
    let id = format!("{:x}", hasher.finalize());

    let mut metadata = BTreeMap::new();
    if include_metadata {
        let file_name = Path::new(relative_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        metadata.insert("file_name".to_string(), file_name);
        metadata.insert("file_path".to_string(), relative_path.to_string());
        if let Some(row) = row {
            metadata.insert("row".to_string(), row.to_string());
        }
    }

    Document {
        id,
        source: relative_path.to_string(),
        text,
        row,
        metadata,
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, CorpusLoadError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
