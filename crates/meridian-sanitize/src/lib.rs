mod structured;
pub use structured::{sanitize_structured, sanitize_webhook};

mod text;
pub use text::sanitize_text;

mod url_check;
pub use url_check::validate_url;
