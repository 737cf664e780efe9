//! Chain definition repository trait.
//!
//! The engine only reads definitions. Saving and publishing exist so that
//! chains can be imported; editing chains is the job of the definition store.

use skillchain_types::chain::{ChainId, ChainRecord};
use skillchain_types::error::RepositoryError;

/// Repository trait for chain definitions.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ChainRepository: Send + Sync {
    /// Upsert a chain definition (insert or replace by ID).
    fn save_chain(
        &self,
        chain: &ChainRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a chain definition by its UUID.
    fn get_chain(
        &self,
        id: &ChainId,
    ) -> impl std::future::Future<Output = Result<Option<ChainRecord>, RepositoryError>> + Send;

    /// Get a chain definition by its unique name.
    fn get_chain_by_name(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<ChainRecord>, RepositoryError>> + Send;

    /// List all chain definitions ordered by name.
    fn list_chains(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ChainRecord>, RepositoryError>> + Send;

    /// Flip the published flag. Returns `false` if the chain does not exist.
    fn set_published(
        &self,
        id: &ChainId,
        published: bool,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
