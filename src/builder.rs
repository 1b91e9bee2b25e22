//! Connector assembly
//!
//! Wires the stock plugins named in [`ConnectorConfig`] ahead of any caller plugins,
//! with the audit log last so it records what actually reached the wallet.

use crate::config::ConnectorConfig;
use crate::connector::{BannedAddressCheck, ConnectorServices, NearConnector};
use crate::manifest::ManifestFetcher;
use crate::plugins::{AuditLogPlugin, CooldownPlugin, MethodPolicyPlugin, Plugin, PluginManager, PolicyConfig};
use crate::prompt::WalletPicker;
use crate::storage::DataStorage;
use crate::wallet::SandboxHost;
use crate::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub struct ConnectorBuilder {
    config: ConnectorConfig,
    services: ConnectorServices,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl ConnectorBuilder {
    pub fn new(config: ConnectorConfig) -> Self {
        Self {
            config,
            services: ConnectorServices::default(),
            plugins: Vec::new(),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn DataStorage>) -> Self {
        self.services.storage = storage;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ManifestFetcher>) -> Self {
        self.services.fetcher = fetcher;
        self
    }

    pub fn with_sandbox_host(mut self, host: Arc<dyn SandboxHost>) -> Self {
        self.services.sandbox_host = host;
        self
    }

    pub fn with_picker(mut self, picker: Arc<dyn WalletPicker>) -> Self {
        self.services.picker = Some(picker);
        self
    }

    pub fn with_banned_check(mut self, check: Arc<dyn BannedAddressCheck>) -> Self {
        self.services.banned = Some(check);
        self
    }

    /// Caller plugins run after the configured guards, in the order given
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Build the connector; manifest loading starts immediately
    pub async fn build(self) -> Result<NearConnector> {
        let plugins = PluginManager::new();

        // 1. Method policy
        if let Some(policy_path) = &self.config.policy_path {
            let policy = PolicyConfig::load(Path::new(policy_path)).await?;
            plugins.use_plugin(Arc::new(MethodPolicyPlugin::new(policy)));
            info!(policy_path = %policy_path, "Added method policy plugin");
        }

        // 2. Cooldown
        if let Some(cooldown_seconds) = self.config.cooldown_seconds {
            plugins.use_plugin(Arc::new(CooldownPlugin::new(cooldown_seconds)));
            info!(cooldown_seconds, "Added cooldown plugin");
        }

        for plugin in self.plugins {
            info!(plugin = plugin.name(), "Added plugin");
            plugins.use_plugin(plugin);
        }

        // 3. Audit log
        if let Some(audit_path) = &self.config.audit_log_path {
            plugins.use_plugin(Arc::new(AuditLogPlugin::new(audit_path)));
            info!(audit_path = %audit_path, "Added audit log plugin");
        }

        info!(
            network = %self.config.network,
            plugins = plugins.len(),
            "Building connector"
        );
        Ok(NearConnector::with_plugins(self.config, self.services, plugins))
    }
}
