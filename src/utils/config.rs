use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, Context, anyhow};
use serde::Deserialize;
use tracing::info;

use crate::search::provider::{ProviderTable, SearchPlace};
use crate::tags::challenge::{DEFAULT_CHALLENGE_ATTEMPTS, DEFAULT_CHALLENGE_DELAY};
use crate::tags::extractor::DEFAULT_DENYLIST;
use crate::media::thumbnail::DEFAULT_SIZE;

const APP_DIR: &str = "iqdb_tagger";
const DB_FILE: &str = "iqdb_tagger.db";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchFilter {
    #[default]
    All,
    BestMatch,
}

/// Everything a run needs, passed explicitly into the orchestrator.
#[derive(Debug, Clone)]
pub struct Config {
    pub place: SearchPlace,
    pub minimum_similarity: Option<f64>,
    pub match_filter: MatchFilter,
    pub resize: bool,
    pub size: Option<(u32, u32)>,
    pub abort_on_error: bool,
    pub write_tags: bool,
    pub write_url: bool,
    pub print_tags: bool,
    pub db_path: PathBuf,
    pub thumb_folder: PathBuf,
    pub providers: ProviderTable,
    pub denylist: Vec<String>,
    /// Re-fetches tried against a bot challenge, and the wait before each.
    pub challenge_attempts: usize,
    pub challenge_delay: Duration,
}

impl Config {
    /// Size of the image sent when resizing is on.
    pub fn upload_size(&self) -> Option<(u32, u32)> {
        self.resize.then(|| self.size.unwrap_or(DEFAULT_SIZE))
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = user_data_dir();
        Self {
            place: SearchPlace::Iqdb,
            minimum_similarity: None,
            match_filter: MatchFilter::All,
            resize: false,
            size: None,
            abort_on_error: false,
            write_tags: false,
            write_url: false,
            print_tags: true,
            db_path: data_dir.join(DB_FILE),
            thumb_folder: data_dir.join("thumbs"),
            providers: ProviderTable::default(),
            denylist: DEFAULT_DENYLIST.iter().map(|h| h.to_string()).collect(),
            challenge_attempts: DEFAULT_CHALLENGE_ATTEMPTS,
            challenge_delay: DEFAULT_CHALLENGE_DELAY,
        }
    }
}

/// Per-user data directory, falling back to the working directory.
pub fn user_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(APP_DIR))
}

pub fn default_config_path() -> PathBuf {
    user_data_dir().join(CONFIG_FILE)
}

/// On-disk settings. Every key is optional and overrides the default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    place: Option<SearchPlace>,
    minimum_similarity: Option<f64>,
    match_filter: Option<MatchFilter>,
    resize: Option<bool>,
    size: Option<[u32; 2]>,
    abort_on_error: Option<bool>,
    write_tags: Option<bool>,
    write_url: Option<bool>,
    db_path: Option<PathBuf>,
    thumb_folder: Option<PathBuf>,
    denylist: Option<Vec<String>>,
    challenge_attempts: Option<usize>,
    challenge_delay_secs: Option<u64>,
    #[serde(default)]
    providers: HashMap<SearchPlace, String>,
}

/// Loads `path` if given, else the default config file if it exists, else defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let explicit = path.is_some();
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);

    let mut config = Config::default();
    if !path.exists() {
        if explicit {
            return Err(anyhow!("Config file {:?} does not exist", path));
        }
        return Ok(config);
    }

    let text = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let file: ConfigFile = toml::from_str(&text)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    apply(&mut config, file)?;
    info!("Loaded config from {:?}", path);
    Ok(config)
}

fn apply(config: &mut Config, file: ConfigFile) -> Result<()> {
    if let Some(place) = file.place {
        config.place = place;
    }
    if let Some(similarity) = file.minimum_similarity {
        check_similarity(similarity)?;
        config.minimum_similarity = Some(similarity);
    }
    if let Some(filter) = file.match_filter {
        config.match_filter = filter;
    }
    if let Some(resize) = file.resize {
        config.resize = resize;
    }
    if let Some([w, h]) = file.size {
        config.size = Some((w, h));
    }
    if let Some(abort) = file.abort_on_error {
        config.abort_on_error = abort;
    }
    if let Some(write_tags) = file.write_tags {
        config.write_tags = write_tags;
    }
    if let Some(write_url) = file.write_url {
        config.write_url = write_url;
    }
    if let Some(db_path) = file.db_path {
        config.db_path = db_path;
    }
    if let Some(thumb_folder) = file.thumb_folder {
        config.thumb_folder = thumb_folder;
    }
    if let Some(denylist) = file.denylist {
        config.denylist = denylist;
    }
    if let Some(attempts) = file.challenge_attempts {
        config.challenge_attempts = attempts;
    }
    if let Some(secs) = file.challenge_delay_secs {
        config.challenge_delay = Duration::from_secs(secs);
    }
    for (place, endpoint) in file.providers {
        config.providers.set_endpoint(place, endpoint);
    }
    Ok(())
}

pub fn check_similarity(value: f64) -> Result<()> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(anyhow!("Minimum similarity must be within 0..=100, got {}", value))
    }
}

/// Parses `WIDTHxHEIGHT`.
pub fn parse_size(s: &str) -> Result<(u32, u32)> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("Size must look like 150x150, got {:?}", s))?;
    let w: u32 = w.trim().parse().with_context(|| format!("Invalid width in {:?}", s))?;
    let h: u32 = h.trim().parse().with_context(|| format!("Invalid height in {:?}", s))?;
    if w == 0 || h == 0 {
        return Err(anyhow!("Size must be non-zero, got {:?}", s));
    }
    Ok((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_and_apply_config_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
place = "danbooru"
minimum_similarity = 80.0
match_filter = "best-match"
resize = true
size = [300, 300]
db_path = "/tmp/iqdb.db"
denylist = ["example.org"]
challenge_attempts = 4
challenge_delay_secs = 1

[providers]
danbooru = "http://localhost:9000"
"#,
        )?;

        let config = load_config(Some(&path))?;
        assert_eq!(config.place, SearchPlace::Danbooru);
        assert_eq!(config.minimum_similarity, Some(80.0));
        assert_eq!(config.match_filter, MatchFilter::BestMatch);
        assert_eq!(config.upload_size(), Some((300, 300)));
        assert_eq!(config.db_path, PathBuf::from("/tmp/iqdb.db"));
        assert_eq!(config.denylist, vec!["example.org".to_string()]);
        assert_eq!(config.providers.get(SearchPlace::Danbooru)?.endpoint, "http://localhost:9000");
        assert_eq!(config.challenge_attempts, 4);
        assert_eq!(config.challenge_delay, Duration::from_secs(1));
        assert!(!config.abort_on_error);
        Ok(())
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(load_config(Some(Path::new("no/such/config.toml"))).is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(&path, "minsim = 75\n")?;
        assert!(load_config(Some(&path)).is_err());
        Ok(())
    }

    #[test]
    fn test_out_of_range_similarity_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(&path, "minimum_similarity = 150.0\n")?;
        assert!(load_config(Some(&path)).is_err());
        Ok(())
    }

    #[test]
    fn test_resize_without_size_uses_default() {
        let config = Config {
            resize: true,
            ..Config::default()
        };
        assert_eq!(config.upload_size(), Some(DEFAULT_SIZE));
        assert_eq!(Config::default().upload_size(), None);
    }

    #[test]
    fn test_parse_size() -> Result<()> {
        assert_eq!(parse_size("150x150")?, (150, 150));
        assert_eq!(parse_size("640X480")?, (640, 480));
        assert!(parse_size("150").is_err());
        assert!(parse_size("0x10").is_err());
        Ok(())
    }
}
