use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use agent_runtime::agent::{ReactAgent, ReactAgentConfig};
use agent_runtime::config::{Config, SessionType};
use agent_runtime::conversation::ConversationHandler;
use agent_runtime::grpc::proto::runtime_service_server::RuntimeServiceServer;
use agent_runtime::grpc::RuntimeServer;
use agent_runtime::health;
use agent_runtime::llm::create_chat_model;
use agent_runtime::pack::PromptPack;
use agent_runtime::session::{CacheSessionStore, InMemorySessionStore, SessionStore};
use agent_runtime::tools::{load_tools_config, ToolDispatcher};
use agent_runtime::tracing::{init_tracing, shutdown_tracing};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    // Local development convenience; missing .env is fine
    let _ = dotenvy::dotenv();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_tracing(&config.agent_name, config.otlp_endpoint.as_deref()) {
        eprintln!("failed to initialize tracing: {e}");
        std::process::exit(1);
    }

    let code = match run(config).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "Runtime failed");
            1
        }
    };

    shutdown_tracing();
    std::process::exit(code);
}

async fn run(config: Config) -> Result<(), BoxError> {
    info!(
        agent = %config.agent_name,
        namespace = %config.namespace,
        provider = %config.provider_type,
        "Starting agent runtime"
    );

    let store: Arc<dyn SessionStore> = match config.session_type {
        SessionType::Memory => {
            let store = Arc::new(InMemorySessionStore::new(config.session_ttl, config.session_max));
            // Expiry stays lazy unless a sweep interval is configured
            if let Some(every) = config.session_sweep_interval {
                info!(interval_secs = every.as_secs(), "Starting session sweeper");
                InMemorySessionStore::spawn_sweeper(store.clone(), every);
            }
            store
        }
        SessionType::Redis => {
            let url = config.session_url.as_deref().unwrap_or_default();
            Arc::new(CacheSessionStore::redis(url, config.session_ttl)?)
        }
    };

    let pack = Arc::new(PromptPack::load(&config.promptpack_path)?);
    if !pack.is_ready(&config.prompt_name) {
        warn!(prompt = %config.prompt_name, "Prompt not found in pack; runtime will report not ready");
    }

    let tools = match &config.tools_config_path {
        Some(path) => {
            let dispatcher = Arc::new(ToolDispatcher::new(load_tools_config(path)?));
            dispatcher.initialize().await;
            info!(tools = ?dispatcher.tool_names(), "Tools initialized");
            Some(dispatcher)
        }
        None => None,
    };

    let model = create_chat_model(&config)?;
    let agent = Arc::new(ReactAgent::new(
        model,
        tools.clone(),
        pack.clone(),
        ReactAgentConfig {
            prompt_name: config.prompt_name.clone(),
            max_rounds: config.max_tool_rounds,
        },
    ));
    let handler = Arc::new(ConversationHandler::new(
        store.clone(),
        agent,
        tools.clone(),
        pack,
        config.prompt_name.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let health_addr = SocketAddr::from(([0, 0, 0, 0], config.health_port));
    let mut health_shutdown = shutdown_rx.clone();
    let health_task = tokio::spawn(async move {
        let signal = async move {
            let _ = health_shutdown.changed().await;
        };
        if let Err(e) = health::serve(health_addr, signal).await {
            error!(error = %e, "Health server stopped");
        }
    });

    let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.grpc_port));
    info!(addr = %grpc_addr, "gRPC server listening");

    let mut grpc_shutdown = shutdown_rx;
    let served = tonic::transport::Server::builder()
        .add_service(RuntimeServiceServer::new(RuntimeServer::new(handler)))
        .serve_with_shutdown(grpc_addr, async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
                _ = grpc_shutdown.changed() => {}
            }
        })
        .await;

    let _ = shutdown_tx.send(true);
    let _ = health_task.await;

    if let Some(tools) = tools {
        tools.close().await;
    }
    if let Err(e) = store.close().await {
        warn!(error = %e, "Failed to close session store");
    }

    served?;
    info!("Agent runtime stopped");
    Ok(())
}
