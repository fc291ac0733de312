pub mod browser;
pub mod config_repository;
pub mod configuration;
pub mod credentials;
pub mod fs;
pub mod network;
pub mod precheck;
pub mod system_browser;
pub mod telemetry;

// Re-exports for convenience
pub use browser::default_engine;
pub use config_repository::FileConfigRepository;
pub use credentials::EncryptedCredentialStore;
pub use precheck::HttpOauthPrecheck;
pub use system_browser::OpenerSystemBrowser;
