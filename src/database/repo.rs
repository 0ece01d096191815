use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use reqwest::Url;
use rusqlite::{params, Connection, OptionalExtension, Row};
use scraper::Html;
use tracing::{debug, info};

use crate::database::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::media::thumbnail;
use crate::search::client::PageFetcher;
use crate::search::parser::{parse_result_page, MatchStatus};
use crate::search::provider::SearchPlace;
use crate::tags::challenge::ChallengeSolver;
use crate::tags::extractor::TagExtractor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: i64,
    pub fingerprint: String,
    pub original_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub id: i64,
    pub image_id: i64,
    pub width: u32,
    pub height: u32,
    pub path: PathBuf,
}

/// The remote post a match links to, shared by every query that hits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub id: i64,
    pub link: String,
    pub thumbnail_link: Option<String>,
}

/// One provider's hit for one queried image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMatch {
    pub id: i64,
    pub image_id: i64,
    pub place: SearchPlace,
    pub result: MatchResult,
    pub similarity: f64,
    pub status: MatchStatus,
    pub size: Option<String>,
    pub rating: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    pub id: i64,
    pub namespace: String,
    pub name: String,
}

impl Tag {
    /// `namespace:name`, or just `name` for untyped tags.
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}:{}", self.namespace, self.name)
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// SQLite backed cache of images, their matches and the tags of matched posts.
///
/// Every `get_or_create_*` call is idempotent: the row is inserted the first
/// time and read back afterwards. Nothing is ever deleted.
pub struct MatchStore {
    conn: Connection,
    thumb_folder: PathBuf,
}

impl MatchStore {
    pub fn open(path: &Path, thumb_folder: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "opened match store");
        Self::init(conn, thumb_folder)
    }

    #[cfg(test)]
    pub fn open_in_memory(thumb_folder: &Path) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, thumb_folder)
    }

    fn init(conn: Connection, thumb_folder: &Path) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            thumb_folder: thumb_folder.to_path_buf(),
        })
    }

    pub fn get_or_create_image(&self, fingerprint: &str, path: &Path) -> Result<(Image, bool)> {
        let created = self.conn.execute(
            "INSERT OR IGNORE INTO images (fingerprint, original_path) VALUES (?1, ?2)",
            params![fingerprint, path.to_string_lossy()],
        )? > 0;

        let image = self.conn.query_row(
            "SELECT id, fingerprint, original_path FROM images WHERE fingerprint = ?1",
            params![fingerprint],
            |row| {
                Ok(Image {
                    id: row.get(0)?,
                    fingerprint: row.get(1)?,
                    original_path: row.get(2)?,
                })
            },
        )?;
        Ok((image, created))
    }

    /// Returns the thumbnail of `image` at `size`, rendering it from `source`
    /// into the thumbnail folder only when no such row exists yet.
    pub fn get_or_create_thumbnail(
        &self,
        image: &Image,
        source: &Path,
        size: (u32, u32),
    ) -> Result<(Thumbnail, bool)> {
        if let Some(existing) = self.find_thumbnail(image, size)? {
            if existing.path.exists() {
                return Ok((existing, false));
            }
            debug!(path = %existing.path.display(), "thumbnail file missing, regenerating");
            thumbnail::generate(source, &existing.path, size)?;
            return Ok((existing, false));
        }

        std::fs::create_dir_all(&self.thumb_folder).map_err(|e| Error::io(&self.thumb_folder, e))?;
        let path = self
            .thumb_folder
            .join(format!("{}-{}x{}.jpg", image.fingerprint, size.0, size.1));
        thumbnail::generate(source, &path, size)?;

        self.conn.execute(
            "INSERT INTO thumbnails (image_id, width, height, path) VALUES (?1, ?2, ?3, ?4)",
            params![image.id, size.0, size.1, path.to_string_lossy()],
        )?;
        let thumb = Thumbnail {
            id: self.conn.last_insert_rowid(),
            image_id: image.id,
            width: size.0,
            height: size.1,
            path,
        };
        Ok((thumb, true))
    }

    fn find_thumbnail(&self, image: &Image, size: (u32, u32)) -> Result<Option<Thumbnail>> {
        let thumb = self
            .conn
            .query_row(
                "SELECT id, image_id, width, height, path FROM thumbnails
                 WHERE image_id = ?1 AND width = ?2 AND height = ?3",
                params![image.id, size.0, size.1],
                |row| {
                    Ok(Thumbnail {
                        id: row.get(0)?,
                        image_id: row.get(1)?,
                        width: row.get(2)?,
                        height: row.get(3)?,
                        path: PathBuf::from(row.get::<_, String>(4)?),
                    })
                },
            )
            .optional()?;
        Ok(thumb)
    }

    /// Stored matches of `image` against `place`, in the order they were found.
    pub fn find_matches(&self, image: &Image, place: SearchPlace) -> Result<Vec<ImageMatch>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT m.id, m.image_id, m.search_place, m.similarity, m.status, m.size, m.rating,
                    r.id, r.link, r.thumbnail_link
             FROM image_matches m JOIN match_results r ON r.id = m.match_result_id
             WHERE m.image_id = ?1 AND m.search_place = ?2
             ORDER BY m.id",
        )?;
        let rows = stmt.query_map(params![image.id, place.as_str()], image_match_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Parses a results page and stores each record, reusing rows already
    /// stored for the same (image, place, link). Records stored before a
    /// malformed row stay in the store.
    pub fn get_or_create_matches(
        &self,
        image: &Image,
        place: SearchPlace,
        page: &str,
        base: &Url,
    ) -> Result<Vec<(ImageMatch, bool)>> {
        let doc = Html::parse_document(page);
        let mut stored = Vec::new();

        for record in parse_result_page(&doc, base) {
            let record = record?;

            self.conn.execute(
                "INSERT OR IGNORE INTO match_results (link, thumbnail_link) VALUES (?1, ?2)",
                params![record.link, record.thumbnail],
            )?;
            let result_id: i64 = self.conn.query_row(
                "SELECT id FROM match_results WHERE link = ?1",
                params![record.link],
                |row| row.get(0),
            )?;

            let created = self.conn.execute(
                "INSERT OR IGNORE INTO image_matches
                 (image_id, search_place, match_result_id, similarity, status, size, rating)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    image.id,
                    place.as_str(),
                    result_id,
                    record.similarity,
                    record.status.as_str(),
                    record.size,
                    record.rating,
                ],
            )? > 0;

            let image_match = self.conn.query_row(
                "SELECT m.id, m.image_id, m.search_place, m.similarity, m.status, m.size, m.rating,
                        r.id, r.link, r.thumbnail_link
                 FROM image_matches m JOIN match_results r ON r.id = m.match_result_id
                 WHERE m.image_id = ?1 AND m.search_place = ?2 AND m.match_result_id = ?3",
                params![image.id, place.as_str(), result_id],
                image_match_from_row,
            )?;
            stored.push((image_match, created));
        }

        debug!(image = %image.fingerprint, %place, n = stored.len(), "stored matches");
        Ok(stored)
    }

    pub fn tags_for(&self, result: &MatchResult) -> Result<Vec<Tag>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT t.id, t.namespace, t.name FROM tags t
             JOIN match_tags mt ON mt.tag_id = t.id
             WHERE mt.match_result_id = ?1
             ORDER BY t.id",
        )?;
        let rows = stmt.query_map(params![result.id], tag_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_or_create_tag(&self, namespace: &str, name: &str) -> Result<Tag> {
        self.conn.execute(
            "INSERT OR IGNORE INTO tags (namespace, name) VALUES (?1, ?2)",
            params![namespace, name],
        )?;
        let tag = self.conn.query_row(
            "SELECT id, namespace, name FROM tags WHERE namespace = ?1 AND name = ?2",
            params![namespace, name],
            tag_from_row,
        )?;
        Ok(tag)
    }

    /// Tags of the post behind `result`.
    ///
    /// Already tagged results are answered from the store without touching
    /// the network. Denylisted hosts yield no tags and are never fetched.
    pub fn get_or_create_tags(
        &self,
        result: &MatchResult,
        extractor: &TagExtractor,
        fetcher: &dyn PageFetcher,
        solver: Option<&dyn ChallengeSolver>,
    ) -> Result<Vec<Tag>> {
        let cached = self.tags_for(result)?;
        if !cached.is_empty() {
            debug!(url = %result.link, n = cached.len(), "tags from store");
            return Ok(cached);
        }

        if extractor.is_denied(&result.link) {
            debug!(url = %result.link, "host denylisted, no tag fetched");
            return Ok(Vec::new());
        }

        let page = fetcher.fetch(&result.link)?;
        let raw_tags = extractor.extract(&page, &result.link, solver)?;
        if raw_tags.is_empty() {
            debug!(url = %result.link, "no tags found");
        }

        let mut tags = Vec::with_capacity(raw_tags.len());
        for raw in raw_tags {
            let tag = self.get_or_create_tag(&raw.namespace, &raw.name)?;
            self.conn.execute(
                "INSERT OR IGNORE INTO match_tags (match_result_id, tag_id) VALUES (?1, ?2)",
                params![result.id, tag.id],
            )?;
            tags.push(tag);
        }
        Ok(tags)
    }

    pub fn count(&self, table: StoreTable) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }
}

/// Tables whose sizes are reported after a run.
#[derive(Debug, Clone, Copy)]
pub enum StoreTable {
    Images,
    Matches,
    Tags,
}

impl StoreTable {
    fn name(self) -> &'static str {
        match self {
            StoreTable::Images => "images",
            StoreTable::Matches => "image_matches",
            StoreTable::Tags => "tags",
        }
    }
}

fn parse_column<T: FromStr<Err = Error>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|e: Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn image_match_from_row(row: &Row<'_>) -> rusqlite::Result<ImageMatch> {
    Ok(ImageMatch {
        id: row.get(0)?,
        image_id: row.get(1)?,
        place: parse_column(row, 2)?,
        similarity: row.get(3)?,
        status: parse_column(row, 4)?,
        size: row.get(5)?,
        rating: row.get(6)?,
        result: MatchResult {
            id: row.get(7)?,
            link: row.get(8)?,
            thumbnail_link: row.get(9)?,
        },
    })
}

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        namespace: row.get(1)?,
        name: row.get(2)?,
    })
}
