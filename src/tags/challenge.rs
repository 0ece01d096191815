use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::search::client::PageFetcher;

const CHALLENGE_MARKERS: [&str; 4] = [
    "cf-browser-verification",
    "challenge-platform",
    "cf_chl_opt",
    "<title>Just a moment...</title>",
];

pub const DEFAULT_CHALLENGE_ATTEMPTS: usize = 2;
pub const DEFAULT_CHALLENGE_DELAY: Duration = Duration::from_secs(5);

/// True when `page` is an anti-bot interstitial instead of the real content.
pub fn is_challenge(page: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|marker| page.contains(marker))
}

/// Gets past a bot challenge and returns the real page for `url`.
pub trait ChallengeSolver {
    fn solve(&self, url: &str) -> Result<String>;
}

/// Re-requests the page through a cookie-keeping session. Hosts that only
/// want to see a returning visitor hand out the clearance cookie on the first
/// hit, so a delayed retry usually gets through.
pub struct SessionRetrySolver<F> {
    fetcher: F,
    attempts: usize,
    delay: Duration,
}

impl<F: PageFetcher> SessionRetrySolver<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            attempts: DEFAULT_CHALLENGE_ATTEMPTS,
            delay: DEFAULT_CHALLENGE_DELAY,
        }
    }

    pub fn with_retries(mut self, attempts: usize, delay: Duration) -> Self {
        self.attempts = attempts;
        self.delay = delay;
        self
    }
}

impl<F: PageFetcher> ChallengeSolver for SessionRetrySolver<F> {
    fn solve(&self, url: &str) -> Result<String> {
        for attempt in 1..=self.attempts {
            thread::sleep(self.delay);
            match self.fetcher.fetch(url) {
                Ok(page) if !is_challenge(&page) => {
                    debug!(url, attempt, "challenge cleared");
                    return Ok(page);
                }
                Ok(_) => debug!(url, attempt, "challenge served again"),
                Err(e) if e.is_recoverable() => warn!(url, attempt, error = %e, "retry failed"),
                Err(e) => return Err(e),
            }
        }
        warn!(url, attempts = self.attempts, "challenge still present");
        Err(Error::Challenge { url: url.to_string() })
    }
}
