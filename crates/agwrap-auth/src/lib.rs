pub mod accounts;
pub mod credentials;
pub mod keystore;
pub mod store;
pub mod token;

mod fsutil;

pub use accounts::{Account, AccountManager, AccountsError};
pub use credentials::Credentials;
pub use keystore::{ApiKey, KeyStore, KeyStoreError};
pub use store::{CredentialStore, StoreError};
pub use token::{TokenError, TokenManager};
