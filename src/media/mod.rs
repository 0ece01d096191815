pub mod mimetype;
pub mod thumbnail;
