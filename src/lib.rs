#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod server;

use std::sync::Arc;

use config::Config;
use engine::auth::{AuthAgent, IauthChild};
use engine::registry::{AuditLog, Registry};
use engine::resolver::Resolver;
use engine::sendq::Pool;
use engine::Core;

/// Builds the single owned [`Core`] from configuration, then hands it to
/// the server loop — and, when the `api` feature is enabled, to the
/// diagnostics HTTP endpoint running alongside it. Kept as a thin,
/// directly-reusable-from-integration-tests function.
pub async fn server_main(config: Arc<Config>) -> anyhow::Result<()> {
    let pool = Pool::new();
    for class in &config.sendq {
        pool.register_class(class.name.clone(), class.cap);
    }

    let audit = AuditLog::new(config.auth.user_log.clone(), config.auth.conn_log.clone());
    let registry = Registry::new(audit);

    let resolver = Resolver::bind(config.resolver.bind, config.resolver.nameservers.clone()).await?;

    let iauth = match &config.auth.iauth_path {
        Some(path) => match IauthChild::spawn(path).await {
            Ok(child) => Some(child),
            Err(e) => {
                log::warn!("failed to spawn iauth helper at {path}: {e}");
                None
            }
        },
        None => None,
    };
    let auth = AuthAgent::new(iauth, config.auth.ident_max_username_len);

    let core = Core::new(registry, pool, resolver, auth);
    let stats = server::new_shared_stats();

    #[cfg(feature = "api")]
    {
        let api_config = config.clone();
        let api_stats = stats.clone();
        tokio::spawn(async move {
            if let Err(e) = api::start(&api_config, api_stats).await {
                log::error!("diagnostics http endpoint failed: {e}");
            }
        });
    }

    server::run(config, core, stats).await
}
