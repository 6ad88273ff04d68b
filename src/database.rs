// Copyright (c) 2024-present, sondage-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The top-level database facade (spec §6, §4.6): ties the table set,
//! inverter and matcher together into the read-only [`Database`] and
//! read-write [`WritableDatabase`] handles a caller actually opens,
//! plus the horizontal-union [`MultiDatabase`] facade.
//!
//! Grounded on the original engine's `Database`/`WritableDatabase`
//! pair (`database.h`): a read-only handle wraps a [`TableSet`] and
//! answers point queries and searches; a writable handle additionally
//! owns an [`Inverter`] and the directory's advisory write lock. This
//! port keeps the same two-struct split rather than one struct with a
//! `read_only: bool` flag, since only the writer needs the lock file
//! and the inverter at all — per design notes §9 "global state... should
//! become explicit context-structs", the lock and the inverter live on
//! the type that needs them instead of being optional fields on a type
//! that doesn't.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::file::{LOCK_FILE, MAGIC_BYTES, MARKER_FILE};
use crate::fs::{FileSystem, StdFileSystem};
use crate::inverter::Inverter;
use crate::mset::MSet;
use crate::position;
use crate::postlist::reader::PostingListReader;
use crate::query::collector::CollectorSpec;
use crate::query::matcher::{self, CollectionStats};
use crate::query::weight::RelevanceCounts;
use crate::query::{Query, WeightingScheme};
use crate::record::{self, DocumentRecord};
use crate::table::TableSet;
use crate::termlist::{self, TermList};
use crate::version::Version;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Reserved single-byte key in the `record` table holding the next
/// docid to assign, big-endian `u32` (spec §3: "assigned monotonically
/// on insert"). This key can never collide with a document's own key
/// (`encode_docid` always emits at least two bytes: a length byte
/// followed by ≥1 value byte) or with the user-metadata namespace
/// (prefixed `0x00`, see [`METADATA_PREFIX`]).
const NEXT_DOCID_KEY: [u8; 1] = [0x01];

/// Prefix byte for user-metadata keys stored in the `record` table
/// (spec §6: "`xapian-metadata get|list|set`"). No document key or the
/// [`NEXT_DOCID_KEY`] counter ever starts with this byte.
const METADATA_PREFIX: u8 = 0x00;

fn metadata_key(user_key: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(user_key.len() + 1);
    key.push(METADATA_PREFIX);
    key.extend_from_slice(user_key);
    key
}

/// Writes the marker file (spec §6: "a marker file whose name encodes
/// the engine variant... containing magic bytes and a format-version
/// integer") if this is a brand-new database directory, or validates
/// an existing one.
fn open_or_create_marker<F: FileSystem>(dir: &Path, read_only: bool) -> Result<()> {
    let marker_path = dir.join(MARKER_FILE);
    match F::exists(&marker_path)? {
        true => {
            let bytes = F::read(&marker_path)?;
            if bytes.len() != 5 || bytes[..4] != MAGIC_BYTES {
                return Err(Error::DatabaseOpening(format!(
                    "{} is not a sondage-core database marker",
                    marker_path.display()
                )));
            }
            match Version::try_from(bytes[4]) {
                Ok(Version::V1) => Ok(()),
                Err(()) => Err(Error::DatabaseVersion {
                    found: Version::try_from(bytes[4]).unwrap_or(Version::V1),
                }),
            }
        }
        false => {
            if read_only {
                return Err(Error::DatabaseOpening(format!(
                    "{} does not exist",
                    dir.display()
                )));
            }
            let mut content = Vec::with_capacity(5);
            content.extend_from_slice(&MAGIC_BYTES);
            content.push(u8::from(Version::V1));
            std::fs::create_dir_all(dir)?;
            std::fs::write(&marker_path, content)?;
            Ok(())
        }
    }
}

/// Advisory exclusive lock on a database directory, held for the
/// lifetime of a [`WritableDatabase`] (spec §5: "a writer acquires an
/// exclusive file lock on the database directory for its lifetime").
///
/// Grounded on `create_new`'s atomicity: the first writer to create the
/// lock file wins, and the file is removed on drop so a later writer
/// can take over once this handle goes away. This is not crash-safe
/// (a killed process leaves the lock file behind); a production
/// deployment would pair this with an OS-level `flock`, but the
/// [`FileSystem`] abstraction here has no such primitive and the spec
/// only asks for "a process-wide lock file held by the writer", not
/// crash recovery of the lock itself.
struct WriterLock<F: FileSystem> {
    path: PathBuf,
    _fs: std::marker::PhantomData<F>,
}

impl<F: FileSystem> WriterLock<F> {
    fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        match F::create_new(&path) {
            Ok(_file) => Ok(Self {
                path,
                _fs: std::marker::PhantomData,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(Error::DatabaseLock),
            Err(e) => Err(e.into()),
        }
    }
}

impl<F: FileSystem> Drop for WriterLock<F> {
    fn drop(&mut self) {
        let _ = F::remove_file(&self.path);
    }
}

/// One term-and-position entry in a [`NewDocument`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PostingEntry {
    pub wdf: u32,
    pub positions: Vec<u32>,
}

/// A document as presented to [`WritableDatabase::add_document`] /
/// [`WritableDatabase::replace_document`]: opaque data, value slots,
/// and a term → (wdf, positions) map. Document length is derived as
/// the sum of wdfs (spec §3: "doclen list... wdf field holds document
/// length").
#[derive(Clone, Debug, Default)]
pub struct NewDocument {
    pub data: Vec<u8>,
    pub values: BTreeMap<u32, Vec<u8>>,
    pub terms: BTreeMap<Vec<u8>, PostingEntry>,
}

impl NewDocument {
    /// Adds (or increments, if already present) a term with the given
    /// wdf contribution and no position information.
    pub fn add_term(&mut self, term: impl Into<Vec<u8>>, wdf: u32) -> &mut Self {
        let entry = self.terms.entry(term.into()).or_default();
        entry.wdf += wdf;
        self
    }

    /// Adds a single occurrence of `term` at `position`, incrementing
    /// its wdf by one (spec §4.4/§4.5: position lists back PHRASE/NEAR).
    pub fn add_posting(&mut self, term: impl Into<Vec<u8>>, position: u32) -> &mut Self {
        let entry = self.terms.entry(term.into()).or_default();
        entry.wdf += 1;
        entry.positions.push(position);
        entry.positions.sort_unstable();
        entry.positions.dedup();
        self
    }

    /// Sets a value slot.
    pub fn set_value(&mut self, slot: u32, value: impl Into<Vec<u8>>) -> &mut Self {
        self.values.insert(slot, value.into());
        self
    }

    fn doclen(&self) -> u32 {
        self.terms.values().map(|e| e.wdf).sum()
    }
}

/// A read-only handle onto one database directory (spec §6).
pub struct Database<F: FileSystem = StdFileSystem> {
    tables: TableSet<F>,
    config: Config,
}

impl<F: FileSystem> Database<F> {
    /// Opens the database at `config.path` read-only. Fails with
    /// [`Error::DatabaseOpening`] if the directory has no marker file.
    pub fn open(config: Config) -> Result<Self> {
        open_or_create_marker::<F>(&config.path, true)?;
        let tables = TableSet::open(&config.path, &config, true)?;
        Ok(Self { tables, config })
    }

    pub(crate) fn from_tables(tables: TableSet<F>, config: Config) -> Self {
        Self { tables, config }
    }

    /// Re-opens every table at the most recent consistent revision
    /// (spec §5: "subsequent opens see the new revision"). A reader
    /// that never calls this continues to observe the revision it was
    /// opened at.
    pub fn reopen(&mut self) -> Result<()> {
        self.tables = TableSet::open(&self.config.path, &self.config, true)?;
        Ok(())
    }

    /// Current consistent revision.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.tables.revision()
    }

    #[must_use]
    pub fn tables(&self) -> &TableSet<F> {
        &self.tables
    }

    /// Document length of `docid` (spec §3/§8). Fails with
    /// [`Error::DocNotFound`] if the document has no doclen entry.
    pub fn get_doclength(&self, docid: u32) -> Result<u32> {
        let Some(mut reader) = PostingListReader::open(self.tables.postlist(), b"")? else {
            return Err(Error::DocNotFound(docid));
        };
        if let Some((d, len)) = reader.current() {
            if d == docid {
                return Ok(len);
            }
        }
        if reader.seek(docid)? {
            if let Some((d, len)) = reader.current() {
                if d == docid {
                    return Ok(len);
                }
            }
        }
        Err(Error::DocNotFound(docid))
    }

    /// Total number of documents whose doclen is recorded (spec §4.5:
    /// "collection-wide statistics").
    pub fn doc_count(&self) -> Result<u32> {
        Ok(self.collection_stats()?.doc_count)
    }

    /// Sum of every document's length divided by [`Self::doc_count`]
    /// (spec §4.5: "avgdl").
    pub fn avg_doclength(&self) -> Result<f64> {
        Ok(self.collection_stats()?.avgdl)
    }

    fn collection_stats(&self) -> Result<CollectionStats> {
        matcher::collection_stats(&self.tables)
    }

    /// Number of documents containing `term` (spec §3: "termfreq"). 0
    /// if the term has never been indexed.
    pub fn get_termfreq(&self, term: &[u8]) -> Result<u32> {
        Ok(PostingListReader::open(self.tables.postlist(), term)?.map_or(0, |r| r.termfreq))
    }

    /// Total occurrences of `term` across the collection (spec §3:
    /// "collfreq").
    pub fn get_collection_freq(&self, term: &[u8]) -> Result<u32> {
        Ok(PostingListReader::open(self.tables.postlist(), term)?.map_or(0, |r| r.collfreq))
    }

    /// Whether `term` appears in at least one document.
    pub fn term_exists(&self, term: &[u8]) -> Result<bool> {
        Ok(self.get_termfreq(term)? > 0)
    }

    /// Document data and value slots for `docid`.
    pub fn get_document(&self, docid: u32) -> Result<DocumentRecord> {
        record::get_record(self.tables.table("record")?, docid)?.ok_or(Error::DocNotFound(docid))
    }

    /// The term → wdf map last written for `docid` (spec §2: termlist
    /// table).
    pub fn get_termlist(&self, docid: u32) -> Result<TermList> {
        termlist::get_termlist(self.tables.table("termlist")?, docid)?.ok_or(Error::DocNotFound(docid))
    }

    /// Word positions `term` occurred at within `docid`, or an empty
    /// list if none were recorded.
    pub fn get_positions(&self, docid: u32, term: &[u8]) -> Result<Vec<u32>> {
        Ok(position::read_positions(self.tables.table("position")?, term, docid)?.unwrap_or_default())
    }

    /// Reads one user-metadata value (spec §6: "`xapian-metadata
    /// get`"). `None` if never set.
    pub fn get_metadata(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.tables.table("record")?.get(&metadata_key(key))
    }

    /// Lists every user-metadata key currently set (spec §6:
    /// "`xapian-metadata list`").
    pub fn metadata_keys(&self) -> Result<Vec<Vec<u8>>> {
        let tree = self.tables.table("record")?;
        let mut cursor = tree.cursor(&[METADATA_PREFIX])?;
        let mut keys = Vec::new();
        loop {
            let Some((key, _)) = cursor.current_entry()? else {
                break;
            };
            match key.first() {
                Some(&b) if b == METADATA_PREFIX => keys.push(key[1..].to_vec()),
                _ => break,
            }
            if !cursor.next()? {
                break;
            }
        }
        Ok(keys)
    }

    /// Runs `query` and returns the top-ranked [`MSet`] (spec §4.5).
    ///
    /// `decider` is consulted on every candidate before it is
    /// considered for the result heap (spec §4.5: "match_decider
    /// hook"); a document it rejects still counts toward
    /// `matches_estimated` but can never appear in `items`.
    pub fn enquire(
        &self,
        query: &Query,
        scheme: WeightingScheme,
        relevance: Option<RelevanceCounts>,
        spec: &CollectorSpec,
    ) -> Result<MSet> {
        matcher::get_mset(query, &self.tables, scheme, relevance, spec, None)
    }

    /// As [`Self::enquire`], but with an explicit match decider.
    pub fn enquire_with_decider(
        &self,
        query: &Query,
        scheme: WeightingScheme,
        relevance: Option<RelevanceCounts>,
        spec: &CollectorSpec,
        decider: &dyn Fn(u32) -> bool,
    ) -> Result<MSet> {
        matcher::get_mset(query, &self.tables, scheme, relevance, spec, Some(decider))
    }
}

/// A read-write handle onto one database directory (spec §6). Only one
/// `WritableDatabase` may exist for a given directory at a time (spec
/// §5: enforced by [`WriterLock`]).
pub struct WritableDatabase<F: FileSystem = StdFileSystem> {
    db: Database<F>,
    inverter: Inverter,
    next_docid: u32,
    _lock: WriterLock<F>,
}

impl<F: FileSystem> WritableDatabase<F> {
    /// Opens (creating if necessary) the database at `config.path` for
    /// writing, acquiring the directory's writer lock.
    pub fn create_or_open(config: Config) -> Result<Self> {
        let lock = WriterLock::acquire(&config.path)?;
        open_or_create_marker::<F>(&config.path, false)?;
        let tables = TableSet::open(&config.path, &config, false)?;
        let next_docid = read_next_docid(tables.table("record")?)?;
        Ok(Self {
            db: Database::from_tables(tables, config),
            inverter: Inverter::new(),
            next_docid,
            _lock: lock,
        })
    }

    /// Borrows the read-only view (stats, point lookups, search) of
    /// this handle.
    #[must_use]
    pub fn reader(&self) -> &Database<F> {
        &self.db
    }

    /// Adds a new document, returning its freshly assigned docid (spec
    /// §3: "assigned monotonically on insert").
    pub fn add_document(&mut self, doc: NewDocument) -> Result<u32> {
        let docid = self.next_docid;
        self.next_docid += 1;
        self.write_document(docid, &doc, None)?;
        Ok(docid)
    }

    /// Replaces the document at `docid` with `doc`, diffing against
    /// whatever termlist is currently on file to compute the minimal
    /// set of posting changes (spec §4.4: `update_posting` for terms
    /// that survive with a new wdf, `add_posting`/`remove_posting` for
    /// terms that only appear in the new or old version). If `docid`
    /// has no existing document this behaves like `add_document` at
    /// that specific id.
    pub fn replace_document(&mut self, docid: u32, doc: NewDocument) -> Result<()> {
        let old = termlist::get_termlist(self.db.tables.table("termlist")?, docid)?;
        self.write_document(docid, &doc, old.as_ref())?;
        self.next_docid = self.next_docid.max(docid + 1);
        Ok(())
    }

    fn write_document(&mut self, docid: u32, doc: &NewDocument, old: Option<&TermList>) -> Result<()> {
        let empty = TermList::default();
        let old = old.unwrap_or(&empty);

        for (term, &old_wdf) in &old.terms {
            if !doc.terms.contains_key(term) {
                self.inverter.remove_posting(docid, term, old_wdf);
                self.inverter.delete_positions(docid, term);
            }
        }
        for (term, entry) in &doc.terms {
            match old.terms.get(term) {
                Some(&old_wdf) if old_wdf != entry.wdf => {
                    self.inverter.update_posting(docid, term, old_wdf, entry.wdf);
                }
                Some(_) => {}
                None => self.inverter.add_posting(docid, term, entry.wdf),
            }
            if !entry.positions.is_empty() {
                self.inverter.set_positions(docid, term, entry.positions.clone());
            } else {
                self.inverter.delete_positions(docid, term);
            }
        }
        self.inverter.set_doclength(docid, doc.doclen());

        let new_termlist = TermList {
            terms: doc.terms.iter().map(|(t, e)| (t.clone(), e.wdf)).collect(),
        };
        termlist::put_termlist(self.db.tables.table_mut("termlist")?, docid, &new_termlist)?;

        let record = DocumentRecord {
            data: doc.data.clone(),
            values: doc.values.clone(),
        };
        record::put_record(self.db.tables.table_mut("record")?, docid, &record)?;
        Ok(())
    }

    /// Deletes `docid`. A no-op (not an error) if the document does
    /// not exist (spec §8 scenario 5: "a second delete_document(11) is
    /// a no-op").
    pub fn delete_document(&mut self, docid: u32) -> Result<()> {
        let Some(old) = termlist::get_termlist(self.db.tables.table("termlist")?, docid)? else {
            return Ok(());
        };
        for (term, &wdf) in &old.terms {
            self.inverter.remove_posting(docid, term, wdf);
            self.inverter.delete_positions(docid, term);
        }
        self.inverter.delete_doclength(docid);
        termlist::delete_termlist(self.db.tables.table_mut("termlist")?, docid)?;
        record::delete_record(self.db.tables.table_mut("record")?, docid)?;
        Ok(())
    }

    /// Sets (or clears, with an empty value) a user-metadata key (spec
    /// §6: "`xapian-metadata set`").
    pub fn set_metadata(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let full_key = metadata_key(key);
        if value.is_empty() {
            self.db.tables.table_mut("record")?.del(&full_key)?;
        } else {
            self.db.tables.table_mut("record")?.add(&full_key, value)?;
        }
        Ok(())
    }

    /// Flushes buffered changes to the posting-list tables without
    /// publishing a new revision (spec §4.4: `flush_all`). Not
    /// visible to other readers until [`Self::commit`] also runs.
    pub fn flush(&mut self) -> Result<()> {
        self.inverter.flush_all(&mut self.db.tables)
    }

    /// Flushes then commits a new revision, persisting the docid
    /// counter alongside everything else in the same transaction
    /// (spec §4.2: "atomic commit publishes a new revision").
    pub fn commit(&mut self) -> Result<()> {
        self.flush()?;
        write_next_docid(self.db.tables.table_mut("record")?, self.next_docid)?;
        let new_revision = self.db.tables.revision() + 1;
        self.db.tables.commit(new_revision)
    }

    /// Discards every buffered and uncommitted change; on-disk state
    /// is unaffected (spec §4.2: `cancel`). The in-memory docid
    /// counter is *not* rewound, so a cancelled batch's docids are
    /// never reused even within this process (spec §3: "reused only
    /// after database recreation" — see DESIGN.md).
    pub fn cancel(&mut self) {
        self.inverter.cancel();
        self.db.tables.cancel();
    }

    #[must_use]
    pub fn reader_mut(&mut self) -> &mut Database<F> {
        &mut self.db
    }
}

fn read_next_docid<F: FileSystem>(tree: &crate::btree::Btree<F>) -> Result<u32> {
    match tree.get(&NEXT_DOCID_KEY)? {
        Some(bytes) if bytes.len() == 4 => {
            Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).max(1))
        }
        _ => Ok(1),
    }
}

fn write_next_docid<F: FileSystem>(tree: &mut crate::btree::Btree<F>, next: u32) -> Result<()> {
    tree.add(&NEXT_DOCID_KEY, &next.to_be_bytes())
}

/// Horizontal union of several sub-databases (spec §4.6): outer docid
/// `(realdid − 1)·M + (i+1)` where `M` is the number of subs.
///
/// Grounded on the original engine's `MultiDatabase`/`ValueList`
/// remapping scheme. Rather than generalising the query-compilation
/// machinery in [`crate::query`] to run one evaluation tree across
/// several [`TableSet`]s at once (the "leaf posting iterators are
/// created per sub and combined via OR" wording in spec §4.6), this
/// port runs the full query independently against each sub-database
/// and remaps + merges the resulting [`MSet`]s, exactly matching
/// [`MSet::merge`]'s own grounding note ("MSet aggregation interleaves
/// sub-results by the same weight heap"). See DESIGN.md for why this
/// trade was made.
pub struct MultiDatabase<F: FileSystem = StdFileSystem> {
    subs: Vec<Database<F>>,
}

impl<F: FileSystem> MultiDatabase<F> {
    /// Opens every sub-database in `configs`, in the order sub-indices
    /// are assigned.
    pub fn open(configs: Vec<Config>) -> Result<Self> {
        let subs = configs.into_iter().map(Database::open).collect::<Result<Vec<_>>>()?;
        Ok(Self { subs })
    }

    /// Number of sub-databases (the `M` in the docid-mapping formula).
    #[must_use]
    pub fn sub_count(&self) -> u32 {
        self.subs.len() as u32
    }

    /// Maps a sub-database's local docid to the outer, combined docid.
    #[must_use]
    pub fn outer_docid(&self, sub_index: u32, real_docid: u32) -> u32 {
        (real_docid - 1) * self.sub_count() + sub_index + 1
    }

    /// Splits an outer docid back into `(sub_index, real_docid)`.
    #[must_use]
    pub fn split_docid(&self, outer_docid: u32) -> (u32, u32) {
        let m = self.sub_count();
        let sub_index = (outer_docid - 1) % m;
        let real_docid = (outer_docid - 1) / m + 1;
        (sub_index, real_docid)
    }

    pub fn get_doclength(&self, outer_docid: u32) -> Result<u32> {
        let (sub, real) = self.split_docid(outer_docid);
        self.subs[sub as usize].get_doclength(real)
    }

    pub fn get_document(&self, outer_docid: u32) -> Result<DocumentRecord> {
        let (sub, real) = self.split_docid(outer_docid);
        self.subs[sub as usize].get_document(real)
    }

    /// Summed termfreq across every sub (spec §4.6: "termfreq/collfreq
    /// are summed").
    pub fn get_termfreq(&self, term: &[u8]) -> Result<u32> {
        self.subs.iter().try_fold(0u32, |acc, sub| Ok(acc + sub.get_termfreq(term)?))
    }

    /// Summed collfreq across every sub.
    pub fn get_collection_freq(&self, term: &[u8]) -> Result<u32> {
        self.subs.iter().try_fold(0u32, |acc, sub| Ok(acc + sub.get_collection_freq(term)?))
    }

    pub fn doc_count(&self) -> Result<u32> {
        self.subs.iter().try_fold(0u32, |acc, sub| Ok(acc + sub.doc_count()?))
    }

    /// Runs `query` against every sub-database and merges the results
    /// by weight, remapping each item's docid into the outer numbering
    /// (spec §4.6).
    pub fn enquire(
        &self,
        query: &Query,
        scheme: WeightingScheme,
        relevance: Option<RelevanceCounts>,
        spec: &CollectorSpec,
    ) -> Result<MSet> {
        let mut per_sub = Vec::with_capacity(self.subs.len());
        for (i, sub) in self.subs.iter().enumerate() {
            let mut mset = sub.enquire(query, scheme, relevance, spec)?;
            for item in &mut mset.items {
                item.docid = self.outer_docid(i as u32, item.docid);
            }
            per_sub.push(mset);
        }
        let mut iter = per_sub.into_iter();
        let first = iter.next().unwrap_or_default();
        let mut merged = first.merge(iter);
        merged.items.truncate(spec.maxitems as usize);
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::WeightingScheme;

    fn config(dir: &tempfile::TempDir) -> Config {
        Config::new(dir.path()).block_size(2048)
    }

    #[test]
    fn add_commit_reopen_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let docid = {
            let mut db = WritableDatabase::<StdFileSystem>::create_or_open(config(&dir)).unwrap();
            let mut doc = NewDocument::default();
            doc.add_term("cat", 2);
            doc.add_term("sat", 1);
            let docid = db.add_document(doc).unwrap();
            db.commit().unwrap();
            docid
        };

        let reader = Database::<StdFileSystem>::open(config(&dir)).unwrap();
        assert_eq!(reader.get_doclength(docid).unwrap(), 3);
        assert_eq!(reader.get_termfreq(b"cat").unwrap(), 1);
        assert_eq!(reader.get_collection_freq(b"cat").unwrap(), 2);
    }

    #[test]
    fn second_delete_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = WritableDatabase::<StdFileSystem>::create_or_open(config(&dir)).unwrap();
        let mut doc = NewDocument::default();
        doc.add_term("x", 1);
        let docid = db.add_document(doc).unwrap();
        db.commit().unwrap();

        db.delete_document(docid).unwrap();
        db.commit().unwrap();
        assert!(matches!(
            db.reader().get_doclength(docid),
            Err(Error::DocNotFound(_))
        ));

        // Second delete must not error.
        db.delete_document(docid).unwrap();
        db.commit().unwrap();
    }

    #[test]
    fn replace_document_updates_postings_and_termlist() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = WritableDatabase::<StdFileSystem>::create_or_open(config(&dir)).unwrap();
        let mut doc = NewDocument::default();
        doc.add_term("cat", 2);
        let docid = db.add_document(doc).unwrap();
        db.commit().unwrap();

        let mut replacement = NewDocument::default();
        replacement.add_term("dog", 5);
        db.replace_document(docid, replacement).unwrap();
        db.commit().unwrap();

        assert_eq!(db.reader().get_termfreq(b"cat").unwrap(), 0);
        assert_eq!(db.reader().get_termfreq(b"dog").unwrap(), 1);
        assert_eq!(db.reader().get_doclength(docid).unwrap(), 5);
    }

    #[test]
    fn metadata_roundtrip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = WritableDatabase::<StdFileSystem>::create_or_open(config(&dir)).unwrap();
        db.set_metadata(b"schema_version", b"3").unwrap();
        db.set_metadata(b"lang", b"en").unwrap();
        db.commit().unwrap();

        assert_eq!(db.reader().get_metadata(b"schema_version").unwrap(), Some(b"3".to_vec()));
        let mut keys = db.reader().metadata_keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec![b"lang".to_vec(), b"schema_version".to_vec()]);
    }

    #[test]
    fn second_writer_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let _first = WritableDatabase::<StdFileSystem>::create_or_open(config(&dir)).unwrap();
        let second = WritableDatabase::<StdFileSystem>::create_or_open(config(&dir));
        assert!(matches!(second, Err(Error::DatabaseLock)));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _first = WritableDatabase::<StdFileSystem>::create_or_open(config(&dir)).unwrap();
        }
        let second = WritableDatabase::<StdFileSystem>::create_or_open(config(&dir));
        assert!(second.is_ok());
    }

    #[test]
    fn multi_database_docid_mapping_roundtrips() {
        let dirs: Vec<_> = (0..3).map(|_| tempfile::tempdir().unwrap()).collect();
        for dir in &dirs {
            let mut db = WritableDatabase::<StdFileSystem>::create_or_open(config(dir)).unwrap();
            let mut doc = NewDocument::default();
            doc.add_term("shared", 1);
            db.add_document(doc).unwrap();
            db.commit().unwrap();
        }

        let multi = MultiDatabase::<StdFileSystem>::open(dirs.iter().map(config).collect()).unwrap();
        assert_eq!(multi.sub_count(), 3);
        for sub in 0..3u32 {
            let outer = multi.outer_docid(sub, 1);
            assert_eq!(multi.split_docid(outer), (sub, 1));
        }
        assert_eq!(multi.get_termfreq(b"shared").unwrap(), 3);

        let mset = multi
            .enquire(
                &Query::term(b"shared".to_vec()),
                WeightingScheme::default(),
                None,
                &CollectorSpec { first: 0, maxitems: 10, ..Default::default() },
            )
            .unwrap();
        assert_eq!(mset.items.len(), 3);
        let mut docids: Vec<u32> = mset.items.iter().map(|i| i.docid).collect();
        docids.sort_unstable();
        assert_eq!(docids, vec![1, 2, 3]);
    }
}
