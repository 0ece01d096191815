use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use serde::Deserialize;

use crate::error::Error;

/// The iqdb-family backends a query can be sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPlace {
    Iqdb,
    Danbooru,
    E621,
    AnimePictures,
    EShuushuu,
    Gelbooru,
    Konachan,
    Sankaku,
    #[serde(rename = "theanimegallery")]
    TheAnimeGallery,
    Yandere,
    Zerochan,
}

impl SearchPlace {
    pub const ALL: [SearchPlace; 11] = [
        SearchPlace::Iqdb,
        SearchPlace::Danbooru,
        SearchPlace::E621,
        SearchPlace::AnimePictures,
        SearchPlace::EShuushuu,
        SearchPlace::Gelbooru,
        SearchPlace::Konachan,
        SearchPlace::Sankaku,
        SearchPlace::TheAnimeGallery,
        SearchPlace::Yandere,
        SearchPlace::Zerochan,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SearchPlace::Iqdb => "iqdb",
            SearchPlace::Danbooru => "danbooru",
            SearchPlace::E621 => "e621",
            SearchPlace::AnimePictures => "anime_pictures",
            SearchPlace::EShuushuu => "e_shuushuu",
            SearchPlace::Gelbooru => "gelbooru",
            SearchPlace::Konachan => "konachan",
            SearchPlace::Sankaku => "sankaku",
            SearchPlace::TheAnimeGallery => "theanimegallery",
            SearchPlace::Yandere => "yandere",
            SearchPlace::Zerochan => "zerochan",
        }
    }
}

impl fmt::Display for SearchPlace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchPlace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SearchPlace::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| Error::UnknownProvider(s.to_string()))
    }
}

/// How the query image reaches the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Bare multipart POST of the `file` field to the endpoint.
    Upload,
    /// Load the endpoint page first, then fill in and submit its form.
    FormSession,
}

/// Markup flavour of the results page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Iqdb,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    pub place: SearchPlace,
    pub endpoint: String,
    pub submission: Submission,
    pub dialect: Dialect,
}

#[derive(Debug, Clone)]
pub struct ProviderTable {
    providers: HashMap<SearchPlace, Provider>,
}

impl ProviderTable {
    pub fn get(&self, place: SearchPlace) -> Result<&Provider, Error> {
        self.providers
            .get(&place)
            .ok_or_else(|| Error::UnknownProvider(place.to_string()))
    }

    /// Points `place` at a different endpoint, keeping its submission mode.
    pub fn set_endpoint(&mut self, place: SearchPlace, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        self.providers
            .entry(place)
            .and_modify(|p| p.endpoint = endpoint.clone())
            .or_insert_with(|| Provider {
                place,
                endpoint,
                submission: Submission::Upload,
                dialect: Dialect::Iqdb,
            });
    }
}

impl Default for ProviderTable {
    fn default() -> Self {
        let endpoints = [
            (SearchPlace::Iqdb, "http://iqdb.org"),
            (SearchPlace::Danbooru, "http://danbooru.iqdb.org"),
            (SearchPlace::E621, "http://iqdb.harry.lu"),
            (SearchPlace::AnimePictures, "https://anime-pictures.iqdb.org"),
            (SearchPlace::EShuushuu, "https://e-shuushuu.iqdb.org"),
            (SearchPlace::Gelbooru, "https://gelbooru.iqdb.org"),
            (SearchPlace::Konachan, "https://konachan.iqdb.org"),
            (SearchPlace::Sankaku, "https://sankaku.iqdb.org"),
            (SearchPlace::TheAnimeGallery, "https://theanimegallery.iqdb.org"),
            (SearchPlace::Yandere, "https://yandere.iqdb.org"),
            (SearchPlace::Zerochan, "https://zerochan.iqdb.org"),
        ];

        let providers = endpoints
            .into_iter()
            .map(|(place, endpoint)| {
                let submission = match place {
                    SearchPlace::E621 => Submission::FormSession,
                    _ => Submission::Upload,
                };
                let provider = Provider {
                    place,
                    endpoint: endpoint.to_string(),
                    submission,
                    dialect: Dialect::Iqdb,
                };
                (place, provider)
            })
            .collect();

        Self { providers }
    }
}
