use std::sync::LazyLock;
use std::time::Duration;
use reqwest::blocking::{multipart, Client};
use reqwest::Url;
use scraper::{Html, Selector};
use tracing::debug;

use crate::error::{Error, Result};
use crate::media::mimetype::detect_mimetype;
use crate::search::provider::{Provider, Submission};
use crate::tags::challenge::is_challenge;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("iqdb-tagger/", env!("CARGO_PKG_VERSION"));

static FORM: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("form").expect("static selector is valid"));
static FORM_INPUT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input[name]").expect("static selector is valid"));

/// Sends a query image to a provider and returns the results page.
pub trait Uploader {
    fn submit(&self, provider: &Provider, file_name: &str, bytes: Vec<u8>) -> Result<String>;
}

/// Fetches a matched page so its tags can be read.
pub trait PageFetcher {
    fn fetch(&self, url: &str) -> Result<String>;
}

/// Blocking HTTP session shared by a whole run. Cookies persist between
/// requests, which the form submission and challenge retries rely on.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Submit {
                provider: "http client".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }

    fn upload(&self, provider: &Provider, file_name: &str, bytes: Vec<u8>) -> reqwest::Result<String> {
        let form = multipart::Form::new().part("file", file_part(file_name, bytes)?);
        self.client
            .post(&provider.endpoint)
            .multipart(form)
            .send()?
            .error_for_status()?
            .text()
    }

    /// Loads the provider page, then posts its first form with the image
    /// attached to the form's file input.
    fn submit_form(&self, provider: &Provider, file_name: &str, bytes: Vec<u8>) -> Result<String> {
        let submit_err = |reason: String| Error::Submit {
            provider: provider.place.to_string(),
            reason,
        };

        let landing = self
            .client
            .get(&provider.endpoint)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| submit_err(e.to_string()))?;
        let page_url = landing.url().clone();
        let body = landing.text().map_err(|e| submit_err(e.to_string()))?;

        let spec = FormSpec::from_page(&body, &page_url).ok_or_else(|| submit_err("no upload form on page".to_string()))?;
        debug!(action = %spec.action, file_field = %spec.file_field, "submitting form");

        let mut form = multipart::Form::new();
        for (name, value) in spec.fields {
            form = form.text(name, value);
        }
        let part = file_part(file_name, bytes).map_err(|e| submit_err(e.to_string()))?;
        form = form.part(spec.file_field, part);

        self.client
            .post(spec.action)
            .multipart(form)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.text())
            .map_err(|e| submit_err(e.to_string()))
    }
}

fn file_part(file_name: &str, bytes: Vec<u8>) -> reqwest::Result<multipart::Part> {
    let mime = detect_mimetype(&bytes);
    multipart::Part::bytes(bytes)
        .file_name(file_name.to_string())
        .mime_str(mime)
}

impl Uploader for HttpClient {
    fn submit(&self, provider: &Provider, file_name: &str, bytes: Vec<u8>) -> Result<String> {
        debug!(provider = %provider.place, endpoint = %provider.endpoint, size = bytes.len(), "uploading");
        match provider.submission {
            Submission::Upload => self.upload(provider, file_name, bytes).map_err(|e| Error::Submit {
                provider: provider.place.to_string(),
                reason: e.to_string(),
            }),
            Submission::FormSession => self.submit_form(provider, file_name, bytes),
        }
    }
}

impl PageFetcher for HttpClient {
    /// Returns the body of a 2xx reply. Bot interstitials come back as 403 or
    /// 503 and are returned as pages so the tag extractor can hand them to a
    /// challenge solver.
    fn fetch(&self, url: &str) -> Result<String> {
        debug!(url, "fetching");
        let fetch_err = |reason: String| Error::Fetch {
            url: url.to_string(),
            reason,
        };

        let response = self.client.get(url).send().map_err(|e| fetch_err(e.to_string()))?;
        let status = response.status();
        let body = response.text().map_err(|e| fetch_err(e.to_string()))?;
        if status.is_success() {
            return Ok(body);
        }
        if is_challenge(&body) {
            debug!(url, %status, "challenge page served");
            return Ok(body);
        }
        Err(fetch_err(format!("HTTP status {status}")))
    }
}

/// What a browser would send for the first form on a page.
#[derive(Debug, PartialEq)]
struct FormSpec {
    action: Url,
    file_field: String,
    fields: Vec<(String, String)>,
}

impl FormSpec {
    fn from_page(html: &str, page_url: &Url) -> Option<Self> {
        let doc = Html::parse_document(html);
        let form = doc.select(&FORM).next()?;

        let action = match form.value().attr("action") {
            Some(action) if !action.is_empty() => page_url.join(action).ok()?,
            _ => page_url.clone(),
        };

        let mut file_field = None;
        let mut fields = Vec::new();
        for input in form.select(&FORM_INPUT) {
            let el = input.value();
            let Some(name) = el.attr("name") else { continue };
            match el.attr("type").unwrap_or("text") {
                "file" => {
                    file_field.get_or_insert_with(|| name.to_string());
                }
                "submit" | "button" | "image" | "reset" => {}
                "checkbox" | "radio" if el.attr("checked").is_none() => {}
                _ => fields.push((name.to_string(), el.attr("value").unwrap_or_default().to_string())),
            }
        }

        Some(Self {
            action,
            file_field: file_field?,
            fields,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use crate::search::provider::{Dialect, SearchPlace};

    /// Requests seen by a [`serve`] server, lowercased, in arrival order.
    pub(crate) type Seen = Arc<Mutex<Vec<String>>>;

    /// Answers one connection per scripted `(status, body)` reply on a local
    /// port, then stops. Returns the `http://127.0.0.1:port` base.
    pub(crate) fn serve(replies: Vec<(u16, String)>) -> (String, Seen) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let seen: Seen = Arc::default();
        let log = Arc::clone(&seen);
        thread::spawn(move || {
            for (status, body) in replies {
                let Ok((mut stream, _)) = listener.accept() else { return };
                let request = read_request(&mut stream).unwrap_or_default();
                log.lock().unwrap().push(request.to_lowercase());
                let reason = match status {
                    200 => "OK",
                    403 => "Forbidden",
                    404 => "Not Found",
                    503 => "Service Unavailable",
                    _ => "Status",
                };
                let reply = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(reply.as_bytes());
                let _ = stream.flush();
            }
        });
        (base, seen)
    }

    fn read_request(stream: &mut TcpStream) -> std::io::Result<String> {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            if let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&data[..end]).to_lowercase();
                let length = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok());
                let complete = match length {
                    Some(len) => data.len() >= end + 4 + len,
                    None if head.contains("transfer-encoding: chunked") => data.ends_with(b"0\r\n\r\n"),
                    None => true,
                };
                if complete {
                    break;
                }
            }
            let n = stream.read(&mut buf)?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
        }
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    fn provider(endpoint: String, submission: Submission) -> Provider {
        Provider {
            place: SearchPlace::E621,
            endpoint,
            submission,
            dialect: Dialect::Iqdb,
        }
    }

    fn png_bytes() -> Vec<u8> {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(&[0; 32]);
        bytes
    }

    #[test]
    fn test_upload_sends_file_field() -> anyhow::Result<()> {
        let (base, seen) = serve(vec![(200, "<div class=\"pages\"></div>".to_string())]);
        let client = HttpClient::new(DEFAULT_TIMEOUT)?;

        let page = client.submit(&provider(format!("{base}/"), Submission::Upload), "query.png", png_bytes())?;

        assert_eq!(page, "<div class=\"pages\"></div>");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("post / http/1.1"));
        assert!(seen[0].contains(r#"name="file"; filename="query.png""#));
        assert!(seen[0].contains("content-type: image/png"));
        Ok(())
    }

    #[test]
    fn test_form_session_posts_to_form_action() -> anyhow::Result<()> {
        let landing = r#"<form action="/upload" method="post" enctype="multipart/form-data">
            <input type="hidden" name="MAX_FILE_SIZE" value="8388608">
            <input type="file" name="file"><input type="submit" value="go"></form>"#;
        let (base, seen) = serve(vec![
            (200, landing.to_string()),
            (200, "results".to_string()),
        ]);
        let client = HttpClient::new(DEFAULT_TIMEOUT)?;

        let page = client.submit(&provider(format!("{base}/"), Submission::FormSession), "query.png", png_bytes())?;

        assert_eq!(page, "results");
        let seen = seen.lock().unwrap();
        assert!(seen[0].starts_with("get / http/1.1"));
        assert!(seen[1].starts_with("post /upload http/1.1"));
        assert!(seen[1].contains(r#"name="max_file_size""#));
        assert!(seen[1].contains(r#"name="file"; filename="query.png""#));
        Ok(())
    }

    #[test]
    fn test_submission_error_status_is_fatal() -> anyhow::Result<()> {
        let (base, _) = serve(vec![(503, "down".to_string())]);
        let client = HttpClient::new(DEFAULT_TIMEOUT)?;

        let err = client
            .submit(&provider(format!("{base}/"), Submission::Upload), "query.png", png_bytes())
            .unwrap_err();
        assert!(matches!(err, Error::Submit { .. }));
        assert!(!err.is_recoverable());
        Ok(())
    }

    #[test]
    fn test_fetch_returns_challenge_page_behind_error_status() -> anyhow::Result<()> {
        let interstitial = "<html><head><title>Just a moment...</title></head></html>";
        let (base, _) = serve(vec![(503, interstitial.to_string())]);
        let client = HttpClient::new(DEFAULT_TIMEOUT)?;

        let page = client.fetch(&format!("{base}/post/show/1"))?;
        assert!(is_challenge(&page));
        Ok(())
    }

    #[test]
    fn test_fetch_error_status_is_recoverable() -> anyhow::Result<()> {
        let (base, _) = serve(vec![(404, "<p>gone</p>".to_string())]);
        let client = HttpClient::new(DEFAULT_TIMEOUT)?;

        let err = client.fetch(&format!("{base}/post/show/1")).unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
        assert!(err.to_string().contains("404"));
        assert!(err.is_recoverable());
        Ok(())
    }

    #[test]
    fn test_fetch_connection_refused_is_recoverable() -> anyhow::Result<()> {
        let addr = TcpListener::bind("127.0.0.1:0")?.local_addr()?;
        let client = HttpClient::new(DEFAULT_TIMEOUT)?;

        let err = client.fetch(&format!("http://{addr}/post/show/1")).unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
        assert!(err.is_recoverable());
        Ok(())
    }

    #[test]
    fn test_fetch_timeout_is_recoverable() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                thread::sleep(Duration::from_secs(2));
                drop(stream);
            }
        });
        let client = HttpClient::new(Duration::from_millis(200))?;

        let err = client.fetch(&format!("http://{addr}/post/show/1")).unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
        assert!(err.is_recoverable());
        Ok(())
    }

    #[test]
    fn test_form_spec_reads_first_form() {
        let html = r#"
            <form action="/upload" method="post" enctype="multipart/form-data">
              <input type="hidden" name="MAX_FILE_SIZE" value="8388608">
              <input type="file" name="file">
              <input type="checkbox" name="service[]" value="1" checked>
              <input type="checkbox" name="service[]" value="2">
              <input type="text" name="url" value="">
              <input type="submit" value="submit">
            </form>
            <form action="/other"><input type="file" name="ignored"></form>
        "#;
        let page_url = Url::parse("http://iqdb.harry.lu/").unwrap();
        let spec = FormSpec::from_page(html, &page_url).unwrap();

        assert_eq!(spec.action.as_str(), "http://iqdb.harry.lu/upload");
        assert_eq!(spec.file_field, "file");
        assert_eq!(
            spec.fields,
            vec![
                ("MAX_FILE_SIZE".to_string(), "8388608".to_string()),
                ("service[]".to_string(), "1".to_string()),
                ("url".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_form_without_action_posts_to_page() {
        let html = r#"<form><input type="file" name="img"></form>"#;
        let page_url = Url::parse("http://iqdb.harry.lu/search").unwrap();
        let spec = FormSpec::from_page(html, &page_url).unwrap();
        assert_eq!(spec.action, page_url);
        assert_eq!(spec.file_field, "img");
    }

    #[test]
    fn test_page_without_file_input_has_no_form() {
        let page_url = Url::parse("http://iqdb.harry.lu/").unwrap();
        assert!(FormSpec::from_page("<form><input name='q'></form>", &page_url).is_none());
        assert!(FormSpec::from_page("<p>maintenance</p>", &page_url).is_none());
    }
}
