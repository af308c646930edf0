//! Services talking to collaborators outside the gateway

pub mod cognito_directory;
pub mod nightscout_client;
pub mod user_directory;

pub use cognito_directory::CognitoUserDirectory;
pub use nightscout_client::{NightscoutClient, NightscoutError, DEFAULT_ENTRY_LIMIT};
pub use user_directory::{DirectoryError, StaticUserDirectory, UserDirectory};
