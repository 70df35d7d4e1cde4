//! `LocalZure`: an Azure-style cloud service emulator for local development.
//!
//! The state/data layer (pluggable key/value backend, snapshot/restore, an
//! OAuth token authority, and a Key Vault secret engine) is shared by every
//! emulated service; the HTTP facade in [`http`] is a thin REST mapping on
//! top of it.

pub mod config;
pub mod error;
pub mod http;
pub mod keyvault;
pub mod logging;
pub mod oauth;
pub mod serializer;
pub mod snapshot;
pub mod state;
