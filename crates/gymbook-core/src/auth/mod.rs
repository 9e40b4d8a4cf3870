//! Authentication: credential storage, single-flight refresh and the session facade.
//!
//! This module provides:
//! - `SecureStorage` backends: OS keychain, encrypted file, in-memory
//! - `CredentialStore`: the one live bearer credential plus the session blob
//! - `RefreshCoordinator`: coalesces concurrent refreshes into one backend call
//! - `SessionFacade`: login, logout and startup restore for the UI layer

pub mod credentials;
pub mod refresh;
pub mod session;
pub mod storage;

pub use credentials::{Credential, CredentialStore, PersistedSession};
pub use refresh::RefreshCoordinator;
pub use session::{Session, SessionFacade};
pub use storage::{EncryptedFileStorage, KeyringStorage, MemoryStorage, SecureStorage};
