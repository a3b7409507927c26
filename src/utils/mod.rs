pub mod constants;
pub mod string_utils;
pub mod url_utils;

pub use constants::*;
pub use string_utils::{char_len, comparable, normalize_whitespace};
pub use url_utils::{destination_key, is_valid_url, resolve_link};
