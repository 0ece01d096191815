use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

use crate::error::{Error, Result};

static RESULT_TABLE: LazyLock<Selector> = LazyLock::new(|| css(".pages table"));
static HEADER: LazyLock<Selector> = LazyLock::new(|| css("th"));
static CELL: LazyLock<Selector> = LazyLock::new(|| css("td"));
static LINK: LazyLock<Selector> = LazyLock::new(|| css("a"));
static THUMB: LazyLock<Selector> = LazyLock::new(|| css("img"));

fn css(selector: &str) -> Selector {
    Selector::parse(selector).expect("static selector is valid")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchStatus {
    BestMatch,
    ProbableMatch,
    PossibleMatch,
    YourImage,
    Unknown,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::BestMatch => "best_match",
            MatchStatus::ProbableMatch => "probable_match",
            MatchStatus::PossibleMatch => "possible_match",
            MatchStatus::YourImage => "your_image",
            MatchStatus::Unknown => "unknown",
        }
    }

    fn from_header(text: &str) -> Self {
        match text.trim().trim_end_matches(':') {
            "Best match" | "Additional match" => MatchStatus::BestMatch,
            "Probable match" => MatchStatus::ProbableMatch,
            "Possible match" => MatchStatus::PossibleMatch,
            "Your image" => MatchStatus::YourImage,
            _ => MatchStatus::Unknown,
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        [
            MatchStatus::BestMatch,
            MatchStatus::ProbableMatch,
            MatchStatus::PossibleMatch,
            MatchStatus::YourImage,
            MatchStatus::Unknown,
        ]
        .into_iter()
        .find(|status| status.as_str() == s)
        .ok_or_else(|| Error::MalformedPage(format!("unknown match status {s:?}")))
    }
}

/// One hit reported on a results page.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    pub link: String,
    pub thumbnail: Option<String>,
    /// Percentage, always within 0..=100.
    pub similarity: f64,
    pub status: MatchStatus,
    /// e.g. `500×700`
    pub size: Option<String>,
    /// e.g. `Safe`
    pub rating: Option<String>,
}

/// Single pass over the result tables of an iqdb page.
///
/// A table with two outbound links yields two records that share similarity
/// and status: iqdb lists the same image as hosted on two sites. A table with
/// more than two links means the page layout changed; the iterator yields
/// [`Error::MalformedPage`] and then ends.
pub struct MatchRecords<'a> {
    tables: std::vec::IntoIter<ElementRef<'a>>,
    base: Url,
    pending: Option<MatchRecord>,
    halted: bool,
}

pub fn parse_result_page<'a>(doc: &'a Html, base: &Url) -> MatchRecords<'a> {
    MatchRecords {
        tables: doc.select(&RESULT_TABLE).collect::<Vec<_>>().into_iter(),
        base: base.clone(),
        pending: None,
        halted: false,
    }
}

impl Iterator for MatchRecords<'_> {
    type Item = Result<MatchRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(record) = self.pending.take() {
            return Some(Ok(record));
        }
        if self.halted {
            return None;
        }

        for table in self.tables.by_ref() {
            let Some(row) = parse_table(table) else {
                continue;
            };

            let anchors: Vec<ElementRef<'_>> = table.select(&LINK).collect();
            if anchors.len() > 2 {
                self.halted = true;
                return Some(Err(Error::MalformedPage(format!(
                    "result table has {} links, expected at most 2",
                    anchors.len()
                ))));
            }

            // Anchors without a target count toward the limit but yield no record.
            let links: Vec<&str> = anchors.iter().filter_map(|a| a.value().attr("href")).collect();
            match links.as_slice() {
                [] => continue,
                [first] => return Some(Ok(row.into_record(&self.base, first))),
                [first, second, ..] => {
                    self.pending = Some(row.clone().into_record(&self.base, second));
                    return Some(Ok(row.into_record(&self.base, first)));
                }
            }
        }

        None
    }
}

#[derive(Debug, Clone)]
struct ParsedRow {
    status: MatchStatus,
    similarity: f64,
    thumbnail: Option<String>,
    size: Option<String>,
    rating: Option<String>,
}

impl ParsedRow {
    fn into_record(self, base: &Url, href: &str) -> MatchRecord {
        MatchRecord {
            link: resolve(base, href),
            thumbnail: self.thumbnail.map(|src| resolve(base, &src)),
            similarity: self.similarity,
            status: self.status,
            size: self.size,
            rating: self.rating,
        }
    }
}

fn parse_table(table: ElementRef<'_>) -> Option<ParsedRow> {
    let status = table
        .select(&HEADER)
        .next()
        .map(|th| MatchStatus::from_header(&text_of(th)))
        .unwrap_or(MatchStatus::Unknown);

    let cells: Vec<ElementRef<'_>> = table.select(&CELL).collect();
    let last = cells.last()?;
    let similarity = parse_similarity(&text_of(*last))?;

    let (size, rating) = match cells.len() {
        n if n >= 2 => parse_size(&text_of(cells[n - 2])),
        _ => (None, None),
    };

    let thumbnail = table
        .select(&THUMB)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(str::to_string);

    Some(ParsedRow {
        status,
        similarity,
        thumbnail,
        size,
        rating,
    })
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// `"92% similarity"` -> 92.0
fn parse_similarity(text: &str) -> Option<f64> {
    let (number, rest) = text.split_once('%')?;
    if !rest.contains("similarity") {
        return None;
    }
    let value: f64 = number.trim().parse().ok()?;
    (0.0..=100.0).contains(&value).then_some(value)
}

/// `"500×700 [Safe]"` -> (`500×700`, `Safe`)
fn parse_size(text: &str) -> (Option<String>, Option<String>) {
    let (size, rating) = match text.split_once('[') {
        Some((size, rest)) => (size, rest.split(']').next()),
        None => (text, None),
    };
    let non_empty = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_string())
    };
    (non_empty(size), rating.and_then(non_empty))
}

fn resolve(base: &Url, href: &str) -> String {
    base.join(href)
        .map(String::from)
        .unwrap_or_else(|_| href.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn table(header: &str, links: &[&str], size: &str, similarity: &str) -> String {
        let mut anchors = String::new();
        for (i, href) in links.iter().enumerate() {
            if i == 0 {
                anchors.push_str(&format!(
                    r#"<tr><td class="image"><a href="{href}"><img src="/thumbs/{i}.jpg"></a></td></tr>"#
                ));
            } else {
                anchors.push_str(&format!(r#"<tr><td><a href="{href}">Alt</a></td></tr>"#));
            }
        }
        format!(
            "<div><table><tr><th>{header}</th></tr>{anchors}<tr><td>{size}</td></tr><tr><td>{similarity}</td></tr></table></div>"
        )
    }

    pub(crate) fn page(tables: &[String]) -> String {
        format!(
            r#"<html><body><form></form><div class="pages">{}</div></body></html>"#,
            tables.concat()
        )
    }

    fn base() -> Url {
        Url::parse("https://danbooru.iqdb.org/").unwrap()
    }

    fn parse(html: &str) -> Vec<Result<MatchRecord>> {
        let doc = Html::parse_document(html);
        parse_result_page(&doc, &base()).collect()
    }

    #[test]
    fn test_row_without_links_is_skipped() {
        let html = page(&[
            table("Best match", &[], "100×100 [Safe]", "88% similarity"),
            table("Best match", &["//danbooru.donmai.us/posts/1"], "500×700 [Safe]", "92% similarity"),
        ]);
        let records: Vec<MatchRecord> = parse(&html).into_iter().map(Result::unwrap).collect();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].similarity, 92.0);
        assert_eq!(records[0].status, MatchStatus::BestMatch);
        assert_eq!(records[0].link, "https://danbooru.donmai.us/posts/1");
        assert_eq!(records[0].thumbnail.as_deref(), Some("https://danbooru.iqdb.org/thumbs/0.jpg"));
        assert_eq!(records[0].size.as_deref(), Some("500×700"));
        assert_eq!(records[0].rating.as_deref(), Some("Safe"));
    }

    #[test]
    fn test_two_links_yield_two_records() {
        let html = page(&[table(
            "Possible match",
            &["//danbooru.donmai.us/posts/1", "https://gelbooru.com/index.php?id=2"],
            "500×700 [Questionable]",
            "71% similarity",
        )]);
        let records: Vec<MatchRecord> = parse(&html).into_iter().map(Result::unwrap).collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].link, "https://danbooru.donmai.us/posts/1");
        assert_eq!(records[1].link, "https://gelbooru.com/index.php?id=2");
        for record in &records {
            assert_eq!(record.similarity, 71.0);
            assert_eq!(record.status, MatchStatus::PossibleMatch);
        }
    }

    #[test]
    fn test_three_links_halt_parsing() {
        let html = page(&[
            table("Best match", &["//a.example/1", "//b.example/2", "//c.example/3"], "1×1", "90% similarity"),
            table("Best match", &["//d.example/4"], "1×1", "80% similarity"),
        ]);
        let results = parse(&html);

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(Error::MalformedPage(_))));
    }

    #[test]
    fn test_anchor_without_href_counts_toward_limit() {
        let html = page(&[
            r#"<div><table><tr><th>Best match</th></tr><tr><td><a href="//a.example/1"><img src="/t.jpg"></a></td></tr><tr><td><a href="//b.example/2">Alt</a> <a name="more">more</a></td></tr><tr><td>1×1</td></tr><tr><td>90% similarity</td></tr></table></div>"#.to_string(),
        ]);
        let results = parse(&html);

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(Error::MalformedPage(_))));
    }

    #[test]
    fn test_rows_without_similarity_are_skipped() {
        let html = page(&[
            table("Your image", &["//iqdb.org/your"], "640×480", "no similarity here"),
            "<div><table><tr><th>No relevant matches</th></tr></table></div>".to_string(),
        ]);
        assert!(parse(&html).is_empty());
    }

    #[test]
    fn test_status_headers() {
        assert_eq!(MatchStatus::from_header("Best match"), MatchStatus::BestMatch);
        assert_eq!(MatchStatus::from_header("Additional match"), MatchStatus::BestMatch);
        assert_eq!(MatchStatus::from_header("Probable match:"), MatchStatus::ProbableMatch);
        assert_eq!(MatchStatus::from_header("Possible match"), MatchStatus::PossibleMatch);
        assert_eq!(MatchStatus::from_header("Your image"), MatchStatus::YourImage);
        assert_eq!(MatchStatus::from_header("Something new"), MatchStatus::Unknown);
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(parse_similarity("92% similarity"), Some(92.0));
        assert_eq!(parse_similarity("87.5% similarity"), Some(87.5));
        assert_eq!(parse_similarity("120% similarity"), None);
        assert_eq!(parse_similarity("92%"), None);
        assert_eq!(parse_similarity("Safe"), None);
    }
}
