//! Persistent backends for Safekeep.
//! AES-GCM encryption with keys from the OS keyring, plus an obfuscated fallback
//! that keeps plaintext off disk when no keystore is usable.

mod blob;
pub mod encrypted_file_store;
pub mod key_provider;
pub mod obfuscated_file_store;

pub use encrypted_file_store::EncryptedFileStore;
pub use obfuscated_file_store::ObfuscatedFileStore;
