use std::sync::LazyLock;
use scraper::{ElementRef, Html, Selector};

use super::RawTag;

static BOORU_TAG: LazyLock<Selector> = LazyLock::new(|| css(r#"li[class*="tag-type-"], li[data-category]"#));
static SEARCH_LINK: LazyLock<Selector> = LazyLock::new(|| css(r#"a[href*="tags="]"#));
static META_LABEL: LazyLock<Selector> = LazyLock::new(|| css("div.meta dl dt"));
static SHUUSHUU_TAG: LazyLock<Selector> = LazyLock::new(|| css("span.tag a"));
static ZEROCHAN_TAG: LazyLock<Selector> = LazyLock::new(|| css("ul#tags li"));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| css("a"));

fn css(selector: &str) -> Selector {
    Selector::parse(selector).expect("static selector is valid")
}

/// Site specific reading of a post page's tag taxonomy.
pub trait TagRule: Send + Sync {
    fn extract(&self, page: &Html) -> Vec<RawTag>;

    /// Whether the site fronts its pages with a bot challenge.
    fn challenge_fronted(&self) -> bool {
        false
    }
}

/// Category names as they appear in markup, paired with the namespace we store.
type CategoryMap = &'static [(&'static str, &'static str)];

pub const DANBOORU_CATEGORIES: CategoryMap = &[
    ("0", ""),
    ("1", "creator"),
    ("3", "series"),
    ("4", "character"),
    ("5", "meta"),
];

pub const E621_CATEGORIES: CategoryMap = &[
    ("0", ""),
    ("1", "creator"),
    ("3", "series"),
    ("4", "character"),
    ("5", "species"),
    ("6", "invalid"),
    ("7", "meta"),
    ("8", "lore"),
];

/// Word categories used by gelbooru, moebooru and sankaku.
pub const NAMED_CATEGORIES: CategoryMap = &[
    ("general", ""),
    ("tag", ""),
    ("artist", "creator"),
    ("studio", "studio"),
    ("circle", "circle"),
    ("copyright", "series"),
    ("character", "character"),
    ("medium", "medium"),
    ("meta", "meta"),
    ("metadata", "meta"),
    ("genre", "genre"),
    ("faults", "faults"),
];

/// `<li class="tag-type-N">` tag lists shared by most booru engines.
pub struct BooruRule {
    categories: CategoryMap,
    challenge: bool,
}

impl BooruRule {
    pub fn new(categories: CategoryMap) -> Self {
        Self {
            categories,
            challenge: false,
        }
    }

    pub fn behind_challenge(mut self) -> Self {
        self.challenge = true;
        self
    }

    fn namespace(&self, item: ElementRef<'_>) -> Option<&'static str> {
        let el = item.value();
        let category = el.attr("data-category").or_else(|| {
            el.classes()
                .find_map(|class| class.strip_prefix("tag-type-"))
        })?;
        self.categories
            .iter()
            .find(|(key, _)| *key == category)
            .map(|(_, namespace)| *namespace)
    }
}

impl TagRule for BooruRule {
    fn extract(&self, page: &Html) -> Vec<RawTag> {
        page.select(&BOORU_TAG)
            .filter_map(|item| {
                let namespace = self.namespace(item)?;
                let el = item.value();
                let name = match el.attr("data-tag-name").or_else(|| el.attr("data-name")) {
                    Some(name) => name.to_string(),
                    None => item.select(&SEARCH_LINK).last().map(text_of)?,
                };
                RawTag::new(namespace, &name)
            })
            .collect()
    }

    fn challenge_fronted(&self) -> bool {
        self.challenge
    }
}

/// e-shuushuu lists tags in a `<dl>` of label / value pairs.
pub struct EShuushuuRule;

impl EShuushuuRule {
    fn namespace(label: &str) -> Option<&'static str> {
        match label.trim().trim_end_matches(':') {
            "Tags" => Some(""),
            "Source" => Some("series"),
            "Characters" => Some("character"),
            "Artist" => Some("creator"),
            _ => None,
        }
    }
}

impl TagRule for EShuushuuRule {
    fn extract(&self, page: &Html) -> Vec<RawTag> {
        let mut tags = Vec::new();
        for dt in page.select(&META_LABEL) {
            let Some(namespace) = Self::namespace(&text_of(dt)) else {
                continue;
            };
            let dd = dt
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|el| el.value().name() == "dd");
            if let Some(dd) = dd {
                tags.extend(
                    dd.select(&SHUUSHUU_TAG)
                        .filter_map(|a| RawTag::new(namespace, &text_of(a))),
                );
            }
        }
        tags
    }
}

/// Zerochan marks the tag kind with the `<li>` class.
pub struct ZerochanRule;

impl TagRule for ZerochanRule {
    fn extract(&self, page: &Html) -> Vec<RawTag> {
        page.select(&ZEROCHAN_TAG)
            .filter_map(|li| {
                let namespace = match li.value().classes().next().unwrap_or_default() {
                    "mangaka" | "artist" | "studio" => "creator",
                    "series" | "game" | "source" | "visual-novel" => "series",
                    "character" => "character",
                    _ => "",
                };
                let name = li.select(&ANCHOR).next().map(text_of)?;
                RawTag::new(namespace, &name)
            })
            .collect()
    }
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>()
}
