// src/engine/build.rs

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::target::{BoxFuture, BuildContext, Target};

/// What the build visit did for one vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitResult {
    /// Not buildable.
    Skipped,
    LocalHit,
    RemoteHit,
    Built,
}

/// The standard visit for `ark run`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildWalker {
    /// Ignore every cache read.
    pub force: bool,
    /// Try the remote cache on a local miss.
    pub pull: bool,
    /// Upload cacheable artifacts after building.
    pub push: bool,
    /// Treat a failed upload as a failed visit.
    pub push_errors_fatal: bool,
}

impl BuildWalker {
    pub async fn visit(&self, target: &Target, ctx: &BuildContext) -> Result<VisitResult> {
        let Some(buildable) = target.as_buildable() else {
            debug!(address = %target.address_str(), "not buildable; nothing to do");
            return Ok(VisitResult::Skipped);
        };

        ctx.ensure_not_cancelled()?;
        buildable.pre_build(ctx)?;

        let cacheable = target.as_cacheable();

        if let (Some(cacheable), false) = (cacheable, self.force) {
            if cacheable.check_local_build_cache(ctx)? {
                info!(
                    address = %target.address_str(),
                    hash = %buildable.short_hash()?,
                    "up to date (local cache)"
                );
                return Ok(VisitResult::LocalHit);
            }

            if self.pull && ctx.remote_cache.is_some() {
                match cacheable.check_remote_cache(ctx).await {
                    Ok(true) => {
                        cacheable.pull_remote_cache(ctx).await?;
                        return Ok(VisitResult::RemoteHit);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(address = %target.address_str(), error = %e, "remote cache unavailable; building locally");
                    }
                }
            }
        }

        buildable.build(ctx).await?;

        if let (Some(cacheable), true) = (cacheable, self.push && ctx.remote_cache.is_some()) {
            if let Err(e) = cacheable.push_remote_cache(ctx).await {
                if self.push_errors_fatal {
                    return Err(e);
                }
                warn!(address = %target.address_str(), error = %e, "push to remote cache failed");
            }
        }

        Ok(VisitResult::Built)
    }

    /// Closure suitable for [`topo_walk`](crate::engine::topo_walk).
    pub fn visitor(
        self,
        ctx: Arc<BuildContext>,
    ) -> impl Fn(Arc<Target>) -> BoxFuture<'static, Result<VisitResult>> + Send + Sync + 'static
    {
        move |target: Arc<Target>| -> BoxFuture<'static, Result<VisitResult>> {
            let ctx = Arc::clone(&ctx);
            Box::pin(async move { self.visit(&target, &ctx).await })
        }
    }
}
