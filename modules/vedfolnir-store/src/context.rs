use uuid::Uuid;
use vedfolnir_common::VedfolnirError;

tokio::task_local! {
    static CURRENT: PlatformContext;
}

/// The ambient (user, platform_connection) binding used to filter every
/// platform-scoped query and stamp every platform-scoped insert.
///
/// Bound per-task via `tokio::task_local!` — the async analogue of a
/// thread-local, correct under a multi-threaded executor where a "thread"
/// doesn't correspond to one logical request. Contexts are immutable
/// values: `switch_platform` produces a new one rather than mutating in
/// place, so concurrent tasks never observe each other's bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformContext {
    pub user_id: Uuid,
    pub platform_connection_id: Uuid,
}

impl PlatformContext {
    pub fn new(user_id: Uuid, platform_connection_id: Uuid) -> Self {
        Self {
            user_id,
            platform_connection_id,
        }
    }

    /// Run `fut` with `ctx` bound as the current context for its duration.
    /// Equivalent to the reference's `with_context` scoping helper —
    /// preferred over a bare set/clear pair because it cannot be forgotten.
    pub async fn scope<F, T>(ctx: PlatformContext, fut: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        CURRENT.scope(ctx, fut).await
    }

    /// The currently bound context, or `PlatformContextError` if none is
    /// bound — a programming error, since every platform-scoped operation
    /// must run inside `PlatformContext::scope`.
    pub fn current() -> Result<PlatformContext, VedfolnirError> {
        CURRENT
            .try_with(|ctx| *ctx)
            .map_err(|_| VedfolnirError::PlatformContext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn current_fails_outside_scope() {
        assert!(PlatformContext::current().is_err());
    }

    #[tokio::test]
    async fn current_succeeds_inside_scope() {
        let user_id = Uuid::new_v4();
        let conn_id = Uuid::new_v4();
        let ctx = PlatformContext::new(user_id, conn_id);
        PlatformContext::scope(ctx, async {
            let current = PlatformContext::current().unwrap();
            assert_eq!(current.user_id, user_id);
            assert_eq!(current.platform_connection_id, conn_id);
        })
        .await;
    }

    #[tokio::test]
    async fn nested_scopes_see_innermost_binding() {
        let outer = PlatformContext::new(Uuid::new_v4(), Uuid::new_v4());
        let inner = PlatformContext::new(Uuid::new_v4(), Uuid::new_v4());
        PlatformContext::scope(outer, async {
            PlatformContext::scope(inner, async {
                assert_eq!(PlatformContext::current().unwrap(), inner);
            })
            .await;
            assert_eq!(PlatformContext::current().unwrap(), outer);
        })
        .await;
    }
}
