use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use reqwest::Url;

use crate::database::repo::Tag;
use crate::error::{Error, Result};

/// `<image>.txt`, the hydrus sidecar for `image`.
pub fn tag_file_for(image: &Path) -> PathBuf {
    let mut name = OsString::from(image.as_os_str());
    name.push(".txt");
    PathBuf::from(name)
}

/// `<folder>/<host>.txt` with every non alphanumeric host character replaced by `_`.
pub fn url_file_for(link: &str, folder: &Path) -> PathBuf {
    let host = Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());
    let sanitized: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    folder.join(format!("{sanitized}.txt"))
}

/// Appends the display form of each tag, one per line.
pub fn append_tags(image: &Path, tags: &[Tag]) -> Result<()> {
    let lines: Vec<String> = tags.iter().map(Tag::full_name).collect();
    append_lines(&tag_file_for(image), &lines)
}

pub fn append_url(link: &str, folder: &Path) -> Result<()> {
    append_lines(&url_file_for(link, folder), &[link.to_string()])
}

fn append_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::io(path, e))?;
    for line in lines {
        writeln!(file, "{line}").map_err(|e| Error::io(path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tag(id: i64, namespace: &str, name: &str) -> Tag {
        Tag {
            id,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_sidecar_names() {
        assert_eq!(tag_file_for(Path::new("/pics/a.png")), PathBuf::from("/pics/a.png.txt"));
        assert_eq!(
            url_file_for("https://danbooru.donmai.us/posts/1", Path::new("/pics")),
            PathBuf::from("/pics/danbooru_donmai_us.txt")
        );
        assert_eq!(
            url_file_for("https://e-shuushuu.net/image/1", Path::new("")),
            PathBuf::from("e_shuushuu_net.txt")
        );
    }

    #[test]
    fn test_files_are_appended() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let image = dir.path().join("a.png");

        append_tags(&image, &[tag(1, "creator", "kantoku"), tag(2, "", "dress")])?;
        append_tags(&image, &[tag(3, "series", "original")])?;
        assert_eq!(
            fs::read_to_string(tag_file_for(&image))?,
            "creator:kantoku\ndress\nseries:original\n"
        );

        append_url("https://yande.re/post/show/1", dir.path())?;
        append_url("https://yande.re/post/show/2", dir.path())?;
        assert_eq!(
            fs::read_to_string(dir.path().join("yande_re.txt"))?,
            "https://yande.re/post/show/1\nhttps://yande.re/post/show/2\n"
        );
        Ok(())
    }
}
