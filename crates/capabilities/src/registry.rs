//! Capability registry — every provider channel, its catalog, and dispatch
//! by name.
//!
//! The registry is the only owner of provider channels. Callers hand it an
//! invocation and get back exactly one [`ToolResult`]; an absent or dead
//! provider and an unadvertised operation come back as failures, never as
//! errors, so one bad tool call cannot abort a turn.

use mcbridge_config::AppConfig;
use mcbridge_core::error::CapabilityError;
use mcbridge_core::process::ProcessSpec;
use mcbridge_core::tool::qualified_name;
use mcbridge_core::{
    OperationDescriptor, ProviderChannel, ProviderId, ProviderNotification, ToolDefinition,
    ToolFailure, ToolInvocation, ToolResult,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::stdio::StdioProvider;

/// How to (re)start one external provider.
#[derive(Debug, Clone)]
pub struct ProviderLaunch {
    pub spec: ProcessSpec,
    pub handshake_timeout: Duration,
    /// Startup failure is tolerated
    pub optional: bool,
}

/// Provider launches from configuration, keyed by id. The game provider gets
/// the `MC_*` connection parameters in its environment.
pub fn launches_from_config(config: &AppConfig) -> BTreeMap<ProviderId, ProviderLaunch> {
    let mut launches = BTreeMap::new();
    for (id, provider) in &config.providers {
        let Some(command) = &provider.command else {
            continue;
        };
        let mut spec = ProcessSpec::new(command.clone());
        spec.args = provider.args.clone();
        if provider.game {
            spec.env.extend(config.minecraft.provider_env());
        }
        spec.env
            .extend(provider.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        launches.insert(
            ProviderId::new(id.clone()),
            ProviderLaunch {
                spec,
                handshake_timeout: Duration::from_secs(provider.handshake_timeout_secs),
                optional: provider.optional,
            },
        );
    }
    launches
}

pub struct CapabilityRegistry {
    channels: RwLock<HashMap<ProviderId, Arc<dyn ProviderChannel>>>,
    launches: RwLock<BTreeMap<ProviderId, ProviderLaunch>>,
    notify_tx: mpsc::UnboundedSender<ProviderNotification>,
    notify_rx: Mutex<Option<mpsc::UnboundedReceiver<ProviderNotification>>>,
    /// Held for a whole revival pass so two callers never respawn the same
    /// provider.
    revival: tokio::sync::Mutex<()>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        Self {
            channels: RwLock::new(HashMap::new()),
            launches: RwLock::new(BTreeMap::new()),
            notify_tx,
            notify_rx: Mutex::new(Some(notify_rx)),
            revival: tokio::sync::Mutex::new(()),
        }
    }

    /// Register an already-established channel (in-process providers).
    /// Replaces any existing channel with the same id.
    pub fn register(&self, channel: Arc<dyn ProviderChannel>) {
        let id = channel.id().clone();
        debug!(provider = %id, operations = channel.catalog().len(), "Provider registered");
        if let Ok(mut channels) = self.channels.write() {
            channels.insert(id, channel);
        }
    }

    /// Spawn and register one external provider, remembering how to start it
    /// again.
    pub async fn start_provider(
        &self,
        id: ProviderId,
        launch: ProviderLaunch,
    ) -> Result<(), CapabilityError> {
        if let Ok(mut launches) = self.launches.write() {
            launches.insert(id.clone(), launch.clone());
        }
        let provider = StdioProvider::connect(
            id,
            &launch.spec,
            launch.handshake_timeout,
            self.notify_tx.clone(),
        )
        .await?;
        self.register(Arc::new(provider));
        Ok(())
    }

    /// Start every configured provider. A failing optional provider is
    /// logged and left absent; a failing required one aborts startup.
    pub async fn start_all(
        &self,
        launches: BTreeMap<ProviderId, ProviderLaunch>,
    ) -> Result<(), CapabilityError> {
        for (id, launch) in launches {
            let optional = launch.optional;
            match self.start_provider(id.clone(), launch).await {
                Ok(()) => {}
                Err(e) if optional => {
                    warn!(provider = %id, error = %e, "Optional provider unavailable, continuing without it");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Respawn external providers whose channel is missing or dead. Returns
    /// how many came back. Concurrent calls run one after another, and each
    /// only sees providers still dead once it gets its turn.
    pub async fn revive(&self) -> usize {
        let _pass = self.revival.lock().await;
        let dead: Vec<(ProviderId, ProviderLaunch)> = match self.launches.read() {
            Ok(launches) => launches
                .iter()
                .filter(|(id, _)| !self.is_available(id))
                .map(|(id, l)| (id.clone(), l.clone()))
                .collect(),
            Err(_) => return 0,
        };

        let mut revived = 0;
        for (id, launch) in dead {
            if let Some(old) = self.channel(&id) {
                old.shutdown().await;
            }
            match StdioProvider::connect(
                id.clone(),
                &launch.spec,
                launch.handshake_timeout,
                self.notify_tx.clone(),
            )
            .await
            {
                Ok(provider) => {
                    info!(provider = %id, "Capability provider revived");
                    self.register(Arc::new(provider));
                    revived += 1;
                }
                Err(e) => debug!(provider = %id, error = %e, "Provider still unavailable"),
            }
        }
        revived
    }

    fn channel(&self, id: &ProviderId) -> Option<Arc<dyn ProviderChannel>> {
        self.channels.read().ok()?.get(id).cloned()
    }

    /// Whether `id` has a live channel.
    pub fn is_available(&self, id: &ProviderId) -> bool {
        self.channel(id).is_some_and(|c| c.is_alive())
    }

    /// Registered provider ids, sorted.
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self
            .channels
            .read()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn catalog(&self, id: &ProviderId) -> Option<Vec<OperationDescriptor>> {
        self.channel(id).map(|c| c.catalog())
    }

    /// Every advertised operation as an engine tool, with qualified names,
    /// sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let channels: Vec<Arc<dyn ProviderChannel>> = self
            .channels
            .read()
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default();

        let mut defs: Vec<ToolDefinition> = channels
            .iter()
            .flat_map(|channel| {
                let id = channel.id().clone();
                channel.catalog().into_iter().map(move |op| ToolDefinition {
                    name: qualified_name(&id, &op.name),
                    description: op.description,
                    parameters: op.input_schema,
                })
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Dispatch one invocation. Always yields a result for its correlation id.
    pub async fn invoke(&self, invocation: &ToolInvocation) -> ToolResult {
        let correlation_id = invocation.correlation_id.clone();

        let channel = match self.channel(&invocation.provider) {
            Some(c) if c.is_alive() => c,
            _ => {
                debug!(provider = %invocation.provider, "Invocation for unavailable provider");
                return ToolResult::failure(
                    correlation_id,
                    ToolFailure::ProviderUnavailable {
                        provider: invocation.provider.to_string(),
                    },
                );
            }
        };

        if !channel
            .catalog()
            .iter()
            .any(|op| op.name == invocation.operation)
        {
            return ToolResult::failure(
                correlation_id,
                ToolFailure::UnknownOperation {
                    provider: invocation.provider.to_string(),
                    operation: invocation.operation.clone(),
                },
            );
        }

        ToolResult {
            correlation_id,
            outcome: channel.call(invocation).await,
        }
    }

    /// Notifications from every provider, including `provider_exited`. Can be
    /// taken once.
    pub fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<ProviderNotification>> {
        self.notify_rx.lock().ok()?.take()
    }

    /// Close every channel. Pending calls resolve as unavailable.
    pub async fn shutdown_all(&self) {
        let channels: Vec<Arc<dyn ProviderChannel>> = match self.channels.write() {
            Ok(mut c) => c.drain().map(|(_, ch)| ch).collect(),
            Err(_) => return,
        };
        for channel in channels {
            debug!(provider = %channel.id(), "Closing provider channel");
            channel.shutdown().await;
        }
        if let Ok(mut launches) = self.launches.write() {
            launches.clear();
        }
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcbridge_core::ToolOutcome;
    use serde_json::json;

    struct EchoChannel {
        id: ProviderId,
    }

    #[async_trait]
    impl ProviderChannel for EchoChannel {
        fn id(&self) -> &ProviderId {
            &self.id
        }
        fn catalog(&self) -> Vec<OperationDescriptor> {
            vec![
                OperationDescriptor::new("chat", "Send a chat message"),
                OperationDescriptor::new("dig", "Break a block"),
            ]
        }
        fn is_alive(&self) -> bool {
            true
        }
        async fn call(&self, invocation: &ToolInvocation) -> ToolOutcome {
            ToolOutcome::Success(invocation.arguments.clone())
        }
    }

    fn registry() -> CapabilityRegistry {
        let registry = CapabilityRegistry::new();
        registry.register(Arc::new(EchoChannel {
            id: ProviderId::new("minecraft"),
        }));
        registry
    }

    #[tokio::test]
    async fn invoke_known_operation() {
        let registry = registry();
        let inv = ToolInvocation::new(ProviderId::new("minecraft"), "chat", json!({"message": "hi"}));
        let result = registry.invoke(&inv).await;
        assert_eq!(result.correlation_id, inv.correlation_id);
        assert_eq!(result.outcome, ToolOutcome::Success(json!({"message": "hi"})));
    }

    #[tokio::test]
    async fn unconfigured_provider_is_unavailable() {
        let registry = registry();
        let inv = ToolInvocation::new(ProviderId::new("admin"), "whitelist_add", json!({}));
        let result = registry.invoke(&inv).await;
        assert_eq!(result.correlation_id, inv.correlation_id);
        assert_eq!(
            result.outcome,
            ToolOutcome::Failure(ToolFailure::ProviderUnavailable {
                provider: "admin".into()
            })
        );
    }

    #[tokio::test]
    async fn unadvertised_operation_is_unknown() {
        let registry = registry();
        let inv = ToolInvocation::new(ProviderId::new("minecraft"), "fly", json!({}));
        assert!(matches!(
            registry.invoke(&inv).await.outcome,
            ToolOutcome::Failure(ToolFailure::UnknownOperation { .. })
        ));
    }

    #[test]
    fn definitions_use_qualified_names() {
        let names: Vec<String> = registry().definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["mcp__minecraft__chat", "mcp__minecraft__dig"]);
    }

    #[tokio::test]
    async fn optional_provider_failure_is_tolerated() {
        let registry = registry();
        let mut launches = BTreeMap::new();
        launches.insert(
            ProviderId::new("admin"),
            ProviderLaunch {
                spec: ProcessSpec::new("/nonexistent/admin-provider"),
                handshake_timeout: Duration::from_secs(1),
                optional: true,
            },
        );
        registry.start_all(launches).await.unwrap();
        assert!(!registry.is_available(&ProviderId::new("admin")));
        assert_eq!(registry.provider_ids(), vec![ProviderId::new("minecraft")]);
        // Still unavailable on revival, and nothing breaks.
        assert_eq!(registry.revive().await, 0);
    }

    #[tokio::test]
    async fn required_provider_failure_aborts() {
        let registry = CapabilityRegistry::new();
        let mut launches = BTreeMap::new();
        launches.insert(
            ProviderId::new("minecraft"),
            ProviderLaunch {
                spec: ProcessSpec::new("/nonexistent/minecraft-provider"),
                handshake_timeout: Duration::from_secs(1),
                optional: false,
            },
        );
        assert!(matches!(
            registry.start_all(launches).await,
            Err(CapabilityError::Spawn { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn concurrent_revivals_spawn_one_process() {
        let dir = tempfile::tempdir().unwrap();
        let spawns = dir.path().join("spawns");
        // The first run exits right after its catalog; later runs stay up.
        let script = format!(
            r#"echo x >> '{log}'
echo '{{"type":"catalog","operations":[{{"name":"connect","description":"Join"}}]}}'
if [ "$(wc -l < '{log}')" -eq 1 ]; then exit 0; fi
exec sleep 60"#,
            log = spawns.display()
        );
        let id = ProviderId::new("minecraft");
        let registry = CapabilityRegistry::new();
        registry
            .start_provider(
                id.clone(),
                ProviderLaunch {
                    spec: ProcessSpec::new("sh").arg("-c").arg(script),
                    handshake_timeout: Duration::from_secs(5),
                    optional: false,
                },
            )
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.is_available(&id) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let (a, b) = tokio::join!(registry.revive(), registry.revive());
        assert_eq!(a + b, 1);
        assert!(registry.is_available(&id));
        let runs = std::fs::read_to_string(&spawns).unwrap();
        assert_eq!(runs.lines().count(), 2);
        registry.shutdown_all().await;
    }

    #[test]
    fn game_provider_gets_connection_env() {
        let config = sample_config();
        let launches = launches_from_config(&config);
        let game = &launches[&ProviderId::new("minecraft")];
        assert_eq!(game.spec.env["MC_HOST"], "mc.example.net");
        assert_eq!(game.spec.env["MC_USERNAME"], "HaksBot");
        assert_eq!(game.spec.env["EXTRA"], "1");

        let admin = &launches[&ProviderId::new("admin")];
        assert!(admin.optional);
        assert!(!admin.spec.env.contains_key("MC_HOST"));
    }

    fn sample_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.minecraft.host = Some("mc.example.net".into());
        config.minecraft.username = Some("HaksBot".into());
        config.minecraft.version = Some("1.21.8".into());
        config.providers.insert(
            "minecraft".into(),
            mcbridge_config::ProviderConfig {
                command: Some("node".into()),
                game: true,
                env: [("EXTRA".to_string(), "1".to_string())].into_iter().collect(),
                ..Default::default()
            },
        );
        config.providers.insert(
            "admin".into(),
            mcbridge_config::ProviderConfig {
                command: Some("node".into()),
                optional: true,
                ..Default::default()
            },
        );
        config
    }
}
