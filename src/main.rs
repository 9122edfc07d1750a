//! Chat Relay 入口
//!
//! 从环境变量读取出站代理（`proxy`）与后端凭据（`token`），加载配置，打开暂停状态库，
//! 然后以控制台通道运行，直到输入结束或收到 Ctrl+C / SIGTERM。

use std::sync::Arc;

use anyhow::Context;
use chat_relay::config::load_config;
use chat_relay::core::{run_with_graceful_shutdown, FreezeStoreCleanup, ShutdownCoordinator, ShutdownManager};
use chat_relay::exporter::ChatDbExporter;
use chat_relay::integrations::{run_console, stdin_lines, ConsoleTransport};
use chat_relay::llm::OpenAiBackend;
use chat_relay::observability;
use chat_relay::store::{FreezeStore, SqliteFreezeStore};
use chat_relay::{Dispatcher, DispatcherSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let proxy = std::env::var("proxy").context("environment variable `proxy` is required")?;
    let token = std::env::var("token").context("environment variable `token` is required")?;

    let cfg = load_config(None).context("Failed to load config")?;

    let store: Arc<dyn FreezeStore> = Arc::new(
        SqliteFreezeStore::open(&cfg.app.db_path)
            .with_context(|| format!("Failed to open freeze store {}", cfg.app.db_path.display()))?,
    );
    let backend = OpenAiBackend::new(cfg.llm.clone(), &token, Some(&proxy))
        .context("Failed to create backend")?;
    let exporter = ChatDbExporter::new(cfg.exporter.home_dir(), cfg.exporter.key.clone());

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(backend),
        Arc::new(ConsoleTransport::stdout()),
        Arc::clone(&store),
        Arc::new(exporter),
        DispatcherSettings::from_config(&cfg),
    ));
    tracing::info!(db = %cfg.app.db_path.display(), model = %cfg.llm.model, "relay started");

    let manager = Arc::new(ShutdownManager::new());

    let mut coordinator = ShutdownCoordinator::new();
    coordinator.register(FreezeStoreCleanup::new(store));

    let input = stdin_lines();
    let token = manager.token();
    let app = async move {
        let received = run_console(dispatcher, input, token).await;
        tracing::info!(received, "console closed");
    };
    run_with_graceful_shutdown(manager, app, coordinator).await;

    Ok(())
}
