use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::parser::listing::{ListingRecord, LISTING_HEADERS, LISTING_KEY_COLUMNS};

/// A CSV row type with a fixed column schema and an identity.
pub trait Row: Serialize {
    const HEADERS: &'static [&'static str];
    /// Columns whose first non-empty value identifies a persisted row.
    const KEY_COLUMNS: &'static [&'static str];

    fn key(&self) -> &str;
}

/// Append-only CSV output that remembers which keys it already holds.
///
/// Keys are read once at open; afterwards the index only grows through
/// `append`. Each row is flushed as soon as it is written.
pub struct ResumableStore<R> {
    path: PathBuf,
    keys: HashSet<String>,
    writer: csv::Writer<File>,
    _row: PhantomData<R>,
}

impl<R: Row> ResumableStore<R> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let existing = scan_existing(&path, R::HEADERS, R::KEY_COLUMNS)?;
        if !existing.keys.is_empty() {
            info!("Resuming {}: {} rows already present", path.display(), existing.keys.len());
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let len = file.metadata()?.len();
        if existing.complete_len < len {
            // A crash mid-write left a torn record; cut it off before appending.
            warn!(
                "Dropping {} bytes of incomplete trailing record from {}",
                len - existing.complete_len,
                path.display()
            );
            file.set_len(existing.complete_len)
                .with_context(|| format!("Failed to truncate {}", path.display()))?;
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if existing.complete_len == 0 {
            writer.write_record(R::HEADERS)?;
            writer.flush()?;
        }

        Ok(ResumableStore {
            path,
            keys: existing.keys,
            writer,
            _row: PhantomData,
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Write and flush one row. Rows without a key are refused.
    pub fn append(&mut self, row: &R) -> Result<()> {
        let key = row.key();
        if key.is_empty() {
            bail!("Refusing to persist a row without identity");
        }
        self.writer
            .serialize(row)
            .with_context(|| format!("Failed to write row to {}", self.path.display()))?;
        self.writer.flush()?;
        self.keys.insert(key.to_string());
        debug!("Persisted {}", key);
        Ok(())
    }
}

/// What an existing output file holds up to its last complete record.
struct Existing {
    keys: HashSet<String>,
    /// Byte length of the header plus every complete record.
    complete_len: u64,
}

/// A record is complete once its terminator is written outside any quoted
/// field. Quotes in a finished record always pair up (`""` escapes one).
fn is_complete(raw: &[u8]) -> bool {
    matches!(raw.last(), Some(b'\n' | b'\r')) && raw.iter().filter(|&&b| b == b'"').count() % 2 == 0
}

/// Read the next record into `record` if it is complete, advancing `start`
/// past it.
fn read_complete(
    rdr: &mut csv::Reader<&[u8]>,
    bytes: &[u8],
    start: &mut usize,
    record: &mut csv::ByteRecord,
) -> Result<bool> {
    if !rdr.read_byte_record(record)? {
        return Ok(false);
    }
    let end = rdr.position().byte() as usize;
    if !is_complete(&bytes[*start..end]) {
        return Ok(false);
    }
    *start = end;
    Ok(true)
}

/// Identity of every complete row in an existing output file.
fn scan_existing(path: &Path, headers: &[&str], key_columns: &[&str]) -> Result<Existing> {
    let mut existing = Existing {
        keys: HashSet::new(),
        complete_len: 0,
    };
    if !path.exists() {
        return Ok(existing);
    }
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if bytes.is_empty() {
        return Ok(existing);
    }

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes.as_slice());
    let mut record = csv::ByteRecord::new();
    let mut start = 0usize;

    if !read_complete(&mut rdr, &bytes, &mut start, &mut record)? {
        if !headers.join(",").as_bytes().starts_with(&bytes) {
            bail!(
                "{} does not start with a complete header; refusing to append",
                path.display()
            );
        }
        return Ok(existing);
    }
    let positions: Vec<usize> = key_columns
        .iter()
        .filter_map(|col| record.iter().position(|h| h == col.as_bytes()))
        .collect();
    if positions.is_empty() {
        bail!(
            "{} has none of the key columns {:?}; refusing to append",
            path.display(),
            key_columns
        );
    }

    while read_complete(&mut rdr, &bytes, &mut start, &mut record)? {
        let key = positions
            .iter()
            .filter_map(|&i| record.get(i))
            .find(|v| !v.is_empty());
        if let Some(key) = key {
            existing.keys.insert(String::from_utf8_lossy(key).into_owned());
        }
    }

    existing.complete_len = start as u64;
    Ok(existing)
}

// ── Rows ──

impl Row for ListingRecord {
    const HEADERS: &'static [&'static str] = LISTING_HEADERS;
    const KEY_COLUMNS: &'static [&'static str] = LISTING_KEY_COLUMNS;

    fn key(&self) -> &str {
        self.dedup_key()
    }
}

/// One product detail page, keyed by its URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PageRecord {
    pub product_page_url: String,
    pub product_name: String,
    pub price: String,
    pub star_rating: Option<f64>,
    pub review_count: Option<u64>,
    #[serde(serialize_with = "join_list")]
    pub image_urls: Vec<String>,
    /// Best-effort aligned with `image_urls`; failed downloads are absent.
    #[serde(serialize_with = "join_list")]
    pub downloaded_images: Vec<String>,
}

impl Row for PageRecord {
    const HEADERS: &'static [&'static str] = &[
        "product_page_url",
        "product_name",
        "price",
        "star_rating",
        "review_count",
        "image_urls",
        "downloaded_images",
    ];
    const KEY_COLUMNS: &'static [&'static str] = &["product_page_url"];

    fn key(&self) -> &str {
        &self.product_page_url
    }
}

fn join_list<S: Serializer>(items: &[String], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&items.join(" | "))
}
