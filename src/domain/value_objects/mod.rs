//! Value objects - Immutable objects defined by their attributes

mod cursor;
mod ids;
mod version_token;

pub use cursor::PageCursor;
pub use ids::*;
pub use version_token::VersionToken;
