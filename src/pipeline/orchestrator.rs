use std::fs::{self, File};
use std::io;
use std::path::Path;
use reqwest::Url;
use tempfile::NamedTempFile;
use tracing::{debug, error, info_span, warn};

use crate::database::repo::{Image, ImageMatch, MatchResult, MatchStore, Tag};
use crate::error::{Error, Result};
use crate::ingest::hasher::fingerprint_file;
use crate::pipeline::output;
use crate::search::client::{PageFetcher, Uploader};
use crate::search::parser::MatchStatus;
use crate::tags::challenge::ChallengeSolver;
use crate::tags::extractor::TagExtractor;
use crate::utils::config::{Config, MatchFilter};

/// Where an image is in its search. Only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fingerprinted,
    CacheChecked,
    Submitted,
    Parsed,
    Filtered,
    TagsResolved,
    Done,
    Failed,
}

#[derive(Debug, Default)]
pub struct SearchOutcome {
    /// Per-match failures; they never stop the other matches.
    pub errors: Vec<Error>,
    pub matches: Vec<ImageMatch>,
    pub tagged_results: Vec<(MatchResult, Vec<Tag>)>,
}

/// The network side of a search.
pub struct Collaborators<'a> {
    pub uploader: &'a dyn Uploader,
    pub fetcher: &'a dyn PageFetcher,
    pub solver: Option<&'a dyn ChallengeSolver>,
}

pub struct SearchOrchestrator<'a> {
    config: Config,
    store: MatchStore,
    extractor: TagExtractor,
    net: Collaborators<'a>,
}

impl<'a> SearchOrchestrator<'a> {
    pub fn new(config: Config, store: MatchStore, net: Collaborators<'a>) -> Self {
        let extractor = TagExtractor::with_default_rules(config.denylist.iter().cloned());
        Self {
            config,
            store,
            extractor,
            net,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &MatchStore {
        &self.store
    }

    /// Searches one image. Errors returned here are fatal for the image:
    /// reading it, submitting it, or a results page we can no longer parse.
    pub fn run(&self, image: &Path) -> Result<SearchOutcome> {
        let span = info_span!("search", path = %image.display(), place = %self.config.place);
        let _guard = span.enter();

        self.search(image).inspect_err(|e| {
            warn!(stage = ?Stage::Failed, error = %e, "search failed");
        })
    }

    fn search(&self, image: &Path) -> Result<SearchOutcome> {
        // Removed on drop, whichever way this function returns.
        let copy = scoped_copy(image)?;
        let fingerprint = fingerprint_file(copy.path())?;
        debug!(stage = ?Stage::Fingerprinted, fingerprint = %fingerprint);

        let (stored_image, _) = self.store.get_or_create_image(&fingerprint, image)?;
        let cached = self.store.find_matches(&stored_image, self.config.place)?;
        debug!(stage = ?Stage::CacheChecked, hit = !cached.is_empty());

        let matches = if !cached.is_empty() {
            cached
        } else {
            let provider = self.config.providers.get(self.config.place)?;
            let (file_name, bytes) = self.upload_payload(image, copy.path(), &stored_image)?;
            let page = self.net.uploader.submit(provider, &file_name, bytes)?;
            debug!(stage = ?Stage::Submitted, dialect = ?provider.dialect, bytes = page.len());

            let base = Url::parse(&provider.endpoint).map_err(|e| Error::Submit {
                provider: provider.place.to_string(),
                reason: format!("invalid endpoint {:?}: {e}", provider.endpoint),
            })?;
            self.store
                .get_or_create_matches(&stored_image, self.config.place, &page, &base)?
                .into_iter()
                .map(|(m, _)| m)
                .collect()
        };
        debug!(stage = ?Stage::Parsed, n = matches.len());

        let matches = apply_filters(matches, self.config.match_filter, self.config.minimum_similarity);
        debug!(stage = ?Stage::Filtered, n = matches.len(), "valid results");

        let mut outcome = SearchOutcome::default();
        for item in &matches {
            debug!(
                similarity = item.similarity,
                status = %item.status,
                url = %item.result.link,
                "match"
            );
            match self.resolve_tags(image, &item.result) {
                Ok(tags) => outcome.tagged_results.push((item.result.clone(), tags)),
                Err(e) => {
                    if e.is_recoverable() {
                        warn!(url = %item.result.link, error = %e, "tag lookup failed");
                    } else {
                        error!(url = %item.result.link, error = %e, "tag lookup failed");
                    }
                    outcome.errors.push(e);
                }
            }
        }
        debug!(stage = ?Stage::TagsResolved, errors = outcome.errors.len());

        outcome.matches = matches;
        debug!(stage = ?Stage::Done);
        Ok(outcome)
    }

    /// The bytes sent to the provider: the image itself, or its thumbnail
    /// when resizing is on.
    fn upload_payload(
        &self,
        image: &Path,
        copy: &Path,
        stored_image: &Image,
    ) -> Result<(String, Vec<u8>)> {
        let (name, path) = match self.config.upload_size() {
            Some(size) => {
                let (thumb, created) = self.store.get_or_create_thumbnail(stored_image, copy, size)?;
                debug!(path = %thumb.path.display(), width = thumb.width, height = thumb.height, created, "upload thumbnail");
                (file_name_of(&thumb.path), thumb.path)
            }
            None => (file_name_of(image), copy.to_path_buf()),
        };
        let bytes = fs::read(&path).map_err(|e| Error::io(&path, e))?;
        Ok((name, bytes))
    }

    fn resolve_tags(&self, image: &Path, result: &MatchResult) -> Result<Vec<Tag>> {
        let tags = self.store.get_or_create_tags(
            result,
            &self.extractor,
            self.net.fetcher,
            self.net.solver,
        )?;
        debug!("{} tag(s) found", tags.len());

        if !tags.is_empty() && self.config.print_tags {
            for tag in &tags {
                println!("{tag}");
            }
        }
        if !tags.is_empty() && self.config.write_tags {
            output::append_tags(image, &tags)?;
            debug!("tags written");
        }
        if self.config.write_url {
            let folder = image.parent().unwrap_or_else(|| Path::new(""));
            output::append_url(&result.link, folder)?;
        }
        Ok(tags)
    }
}

/// Post-filters over stored matches; they never change what was stored.
pub fn apply_filters(
    matches: Vec<ImageMatch>,
    filter: MatchFilter,
    minimum_similarity: Option<f64>,
) -> Vec<ImageMatch> {
    matches
        .into_iter()
        .filter(|m| filter == MatchFilter::All || m.status == MatchStatus::BestMatch)
        .filter(|m| minimum_similarity.map_or(true, |min| m.similarity >= min))
        .collect()
}

fn scoped_copy(image: &Path) -> Result<NamedTempFile> {
    let mut source = File::open(image).map_err(|e| Error::io(image, e))?;
    // Keep the extension so format sniffing by name still works on the copy.
    let suffix = image
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let mut copy = tempfile::Builder::new()
        .prefix("iqdb-")
        .suffix(&suffix)
        .tempfile()
        .map_err(|e| Error::io(image, e))?;
    io::copy(&mut source, copy.as_file_mut()).map_err(|e| Error::io(image, e))?;
    Ok(copy)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}
