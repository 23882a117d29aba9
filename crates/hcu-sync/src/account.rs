//! Provider registration: verify a credential, store it, trigger a first sync.

use chrono::Utc;
use hcu_core::error::{HcuError, Result};
use hcu_core::types::Provider;
use hcu_db::Db;
use hcu_plugins::{PROVIDER_CLASS, PluginRegistry};
use hcu_scheduler::{JobArgs, Scheduler};
use uuid::Uuid;

use crate::resource_sync::RESOURCE_SYNC;

/// Credential submitted for a new provider binding.
#[derive(Debug, Clone)]
pub struct NewProvider {
    pub member_email: String,
    pub provider: String,
    pub user: String,
    pub pass: String,
}

/// Check the account with the provider's plugin, persist the binding and
/// queue a ResourceSync limited to it.
pub async fn register_provider(
    db: &Db,
    plugins: &PluginRegistry,
    scheduler: &Scheduler,
    req: NewProvider,
) -> Result<Provider> {
    HcuError::require(&req.provider, "Provider")?;
    let plugin = plugins.get(&req.provider, PROVIDER_CLASS).await?;
    let account = plugin.check_account(&req.user, &req.pass).await?;
    tracing::debug!("account {} checked: subject {}", req.user, account.subject_id);

    let member = db.insert_member(&req.member_email)?;
    let provider = Provider {
        id: Uuid::new_v4(),
        member_id: member.id,
        provider: req.provider,
        user: req.user,
        pass: req.pass,
        group_id: account.group_id,
        user_id: account.subject_id,
        created_at: Utc::now(),
    };
    db.insert_provider(&provider)?;
    tracing::info!("🔌 Provider {provider} registered for {}", member.email);

    scheduler.run(RESOURCE_SYNC, JobArgs::sync(Some(provider.id.to_string())))?;
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_sync::ResourceSync;
    use crate::testing::FakePlugin;
    use hcu_core::config::{SchedulerConfig, SyncConfig};
    use hcu_scheduler::TokioQueue;
    use std::sync::Arc;

    fn request(pass: &str) -> NewProvider {
        NewProvider {
            member_email: "ops@example.com".into(),
            provider: "fake".into(),
            user: "api-user".into(),
            pass: pass.into(),
        }
    }

    #[tokio::test]
    async fn test_register_queues_first_sync() {
        let db = Arc::new(Db::open_in_memory().unwrap());
        let plugins = Arc::new(PluginRegistry::new("/nonexistent/hcu/plugins"));
        plugins
            .register(PROVIDER_CLASS, Arc::new(FakePlugin::new("fake")))
            .unwrap();
        let (queue, mut rx) = TokioQueue::new();
        let scheduler = Scheduler::new(SchedulerConfig::default(), Arc::new(queue));
        scheduler
            .register_workers(vec![Arc::new(ResourceSync::new(
                db.clone(),
                plugins.clone(),
                &SyncConfig::default(),
            ))])
            .unwrap();

        let provider = register_provider(&db, &plugins, &scheduler, request("secret"))
            .await
            .unwrap();
        assert_eq!(provider.user_id, "subject-api-user");
        assert_eq!(provider.group_id, "group-1");
        assert_eq!(db.provider(provider.id).unwrap().user, "api-user");

        let job = rx.recv().await.unwrap();
        assert_eq!(job.worker, RESOURCE_SYNC);
        assert_eq!(job.args.provider_id(), Some(provider.id.to_string().as_str()));
    }

    #[tokio::test]
    async fn test_bad_credential_stores_nothing() {
        let db = Db::open_in_memory().unwrap();
        let plugins = PluginRegistry::new("/nonexistent/hcu/plugins");
        plugins
            .register(PROVIDER_CLASS, Arc::new(FakePlugin::new("fake")))
            .unwrap();
        let (queue, _rx) = TokioQueue::new();
        let scheduler = Scheduler::new(SchedulerConfig::default(), Arc::new(queue));

        assert!(register_provider(&db, &plugins, &scheduler, request("wrong")).await.is_err());
        assert!(db.providers().unwrap().is_empty());
    }
}
