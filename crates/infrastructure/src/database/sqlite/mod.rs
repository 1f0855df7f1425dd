pub mod sqlite_blacklist_repository;
pub mod sqlite_preference_repository;
pub mod sqlite_registration_repository;

pub use sqlite_blacklist_repository::SqliteBlacklistRepository;
pub use sqlite_preference_repository::SqlitePreferenceRepository;
pub use sqlite_registration_repository::SqliteRegistrationRepository;
