//! Whole-value resolution strategies.

use async_trait::async_trait;
use tracing::info;

use super::{ConflictResolver, LocalSide, RemoteSide, Resolution};
use crate::errors::ConflictError;

/// Resolve by keeping the local edit and overwriting the remote.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepLocal;

/// Resolve by discarding the local edit in favour of the remote.
#[derive(Debug, Clone, Copy, Default)]
pub struct TakeRemote;

#[async_trait]
impl ConflictResolver for KeepLocal {
    async fn resolve(
        &self,
        local: LocalSide<'_>,
        _remote: RemoteSide,
    ) -> Result<Resolution, ConflictError> {
        info!(path = local.path(), "resolving conflict: keep local");
        let content = local.content()?;
        Ok(Resolution::new(content, local.node().content_type.clone()))
    }
}

#[async_trait]
impl ConflictResolver for TakeRemote {
    async fn resolve(
        &self,
        local: LocalSide<'_>,
        remote: RemoteSide,
    ) -> Result<Resolution, ConflictError> {
        info!(path = local.path(), "resolving conflict: take remote");
        let content_type = remote.node().content_type.clone();
        let content = remote.content().await?;
        Ok(Resolution::new(content, content_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalCache;
    use crate::models::Node;
    use crate::remote::RemoteContent;

    fn sides(cache: &LocalCache) -> (LocalSide<'_>, RemoteSide) {
        cache.set_file("notes", "mine").unwrap();
        (
            LocalSide::new("notes", Node::unconfirmed(Some("v1".into()), "text/plain"), cache),
            RemoteSide::new(Node::confirmed("v2", "text/markdown"), RemoteContent::ready("theirs")),
        )
    }

    #[tokio::test]
    async fn test_keep_local() {
        let cache = LocalCache::in_memory();
        let (local, remote) = sides(&cache);
        let resolved = KeepLocal.resolve(local, remote).await.unwrap();
        assert_eq!(resolved, Resolution::new("mine", "text/plain"));
    }

    #[tokio::test]
    async fn test_take_remote() {
        let cache = LocalCache::in_memory();
        let (local, remote) = sides(&cache);
        let resolved = TakeRemote.resolve(local, remote).await.unwrap();
        assert_eq!(resolved, Resolution::new("theirs", "text/markdown"));
    }
}
