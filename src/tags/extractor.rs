use std::collections::HashSet;
use reqwest::Url;
use scraper::Html;
use tracing::debug;

use crate::error::{Error, Result};
use crate::tags::challenge::{is_challenge, ChallengeSolver};
use crate::tags::rules::{
    BooruRule, EShuushuuRule, TagRule, ZerochanRule, DANBOORU_CATEGORIES, E621_CATEGORIES,
    NAMED_CATEGORIES,
};
use crate::tags::RawTag;

/// Hosts that refuse non-browser clients.
pub const DEFAULT_DENYLIST: [&str; 2] = ["anime-pictures.net", "www.theanimegallery.com"];

/// Registry of host pattern -> extraction rule.
///
/// A pattern matches the host itself and any of its subdomains. Hosts with no
/// rule yield no tags.
pub struct TagExtractor {
    rules: Vec<(String, Box<dyn TagRule>)>,
    denylist: HashSet<String>,
}

impl TagExtractor {
    pub fn new<I, S>(denylist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rules: Vec::new(),
            denylist: denylist.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_default_rules<I, S>(denylist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut extractor = Self::new(denylist);
        extractor.register("danbooru.donmai.us", BooruRule::new(DANBOORU_CATEGORIES));
        extractor.register("gelbooru.com", BooruRule::new(NAMED_CATEGORIES));
        extractor.register("konachan.com", BooruRule::new(NAMED_CATEGORIES));
        extractor.register("konachan.net", BooruRule::new(NAMED_CATEGORIES));
        extractor.register("yande.re", BooruRule::new(NAMED_CATEGORIES));
        extractor.register(
            "sankakucomplex.com",
            BooruRule::new(NAMED_CATEGORIES).behind_challenge(),
        );
        extractor.register("e621.net", BooruRule::new(E621_CATEGORIES));
        extractor.register("e-shuushuu.net", EShuushuuRule);
        extractor.register("zerochan.net", ZerochanRule);
        extractor
    }

    pub fn register(&mut self, host: &str, rule: impl TagRule + 'static) {
        self.rules.push((host.to_lowercase(), Box::new(rule)));
    }

    pub fn is_denied(&self, url: &str) -> bool {
        host_of(url).is_some_and(|host| self.denylist.contains(&host))
    }

    fn rule_for(&self, host: &str) -> Option<&dyn TagRule> {
        self.rules
            .iter()
            .find(|(pattern, _)| {
                host == pattern
                    || host
                        .strip_suffix(pattern.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            })
            .map(|(_, rule)| rule.as_ref())
    }

    /// Reads the tags off `page`, fetched from `source_url`.
    ///
    /// When the host is challenge fronted and `page` is the interstitial, the
    /// solver is asked for the real page first. Without a solver that is a
    /// [`Error::Challenge`].
    pub fn extract(
        &self,
        page: &str,
        source_url: &str,
        solver: Option<&dyn ChallengeSolver>,
    ) -> Result<Vec<RawTag>> {
        let Some(host) = host_of(source_url) else {
            return Ok(Vec::new());
        };
        let Some(rule) = self.rule_for(&host) else {
            debug!(host, "no tag rule for host");
            return Ok(Vec::new());
        };

        let solved;
        let page = if rule.challenge_fronted() && is_challenge(page) {
            let solver = solver.ok_or_else(|| Error::Challenge {
                url: source_url.to_string(),
            })?;
            solved = solver.solve(source_url)?;
            solved.as_str()
        } else {
            page
        };

        let doc = Html::parse_document(page);
        let mut tags = rule.extract(&doc);
        let mut seen = HashSet::new();
        tags.retain(|tag| seen.insert(tag.clone()));
        Ok(tags)
    }
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_lowercase)
}
