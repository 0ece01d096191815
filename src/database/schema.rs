pub const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS images (
        id INTEGER PRIMARY KEY,
        fingerprint TEXT UNIQUE NOT NULL,
        original_path TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS thumbnails (
        id INTEGER PRIMARY KEY,
        image_id INTEGER NOT NULL,
        width INTEGER NOT NULL,
        height INTEGER NOT NULL,
        path TEXT NOT NULL,
        FOREIGN KEY(image_id) REFERENCES images(id),
        UNIQUE(image_id, width, height)
    );

    CREATE TABLE IF NOT EXISTS match_results (
        id INTEGER PRIMARY KEY,
        link TEXT UNIQUE NOT NULL,
        thumbnail_link TEXT
    );

    CREATE TABLE IF NOT EXISTS image_matches (
        id INTEGER PRIMARY KEY,
        image_id INTEGER NOT NULL,
        search_place TEXT NOT NULL,
        match_result_id INTEGER NOT NULL,
        similarity REAL NOT NULL CHECK (similarity >= 0 AND similarity <= 100),
        status TEXT NOT NULL,
        size TEXT,
        rating TEXT,
        FOREIGN KEY(image_id) REFERENCES images(id),
        FOREIGN KEY(match_result_id) REFERENCES match_results(id),
        UNIQUE(image_id, search_place, match_result_id)
    );

    CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY,
        namespace TEXT NOT NULL DEFAULT '',
        name TEXT NOT NULL,
        UNIQUE(namespace, name)
    );

    CREATE TABLE IF NOT EXISTS match_tags (
        match_result_id INTEGER NOT NULL,
        tag_id INTEGER NOT NULL,
        FOREIGN KEY(match_result_id) REFERENCES match_results(id),
        FOREIGN KEY(tag_id) REFERENCES tags(id),
        PRIMARY KEY(match_result_id, tag_id)
    );

    CREATE INDEX IF NOT EXISTS idx_image_matches_lookup ON image_matches(image_id, search_place);
";
