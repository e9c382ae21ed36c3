use anyhow::{Context as _, Result};
use fairguess::config::AppConfig;
use fairguess::engine::GameEngine;
use fairguess::handler::GuessBot;
use fairguess::log::{self, Level};
use fairguess::notify::ChannelSink;
use fairguess::store::{MemoryStore, SqliteStore, Store};
use fairguess::{adapters, info, warn};
use std::sync::Arc;

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load(CONFIG_PATH)
        .await
        .with_context(|| format!("loading {}", CONFIG_PATH))?;

    match config.log_level.parse::<Level>() {
        Ok(level) => log::set_level(level),
        Err(e) => warn!(target: "Main", "{}，使用默认级别 info", e),
    }
    info!(target: "Main", "配置已加载: {}", CONFIG_PATH);

    // ================= 存储 =================
    let store: Arc<dyn Store> = if config.database.url == "memory" {
        info!(target: "Main", "使用进程内存储，退出后数据不会保留");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            SqliteStore::open(&config.database)
                .await
                .context("opening database")?,
        )
    };

    // ================= 引擎 =================
    let (sink, events) = ChannelSink::channel();
    let engine = GameEngine::new(store, Arc::new(sink), config.game.clone());
    let config = Arc::new(config);
    let bot = Arc::new(GuessBot::new(engine.clone(), config.clone()));

    let result = adapters::console::run(bot, config.console.clone(), events).await;

    engine.shutdown();
    info!(target: "Main", "已退出");
    result
}
