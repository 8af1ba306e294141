// Concrete implementations of the domain ports plus SQLite persistence.

pub mod google_places;
pub mod openai;
pub mod pdf;
pub mod sqlite;
pub mod stripe;

pub use google_places::GooglePlacesClient;
pub use openai::OpenAiClient;
pub use pdf::CommandPdfRenderer;
pub use sqlite::SqliteStore;
pub use stripe::StripeClient;
