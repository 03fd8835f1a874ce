pub mod library;
pub mod metadata;

pub use library::{Category, Library, Series, SubGroup, Volume};
pub use metadata::{PublicationStatus, SeriesMetadata};
