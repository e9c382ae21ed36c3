use anyhow::{Context as _, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    // 全局指令前缀（支持多个，如 ["/", "#"]）
    #[serde(default = "default_prefix")]
    pub command_prefix: Vec<String>,

    // 管理员用户 ID，为空时所有人都可以管理游戏
    #[serde(default)]
    pub admins: Vec<i64>,

    // debug / info / warn / error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub console: ConsoleConfig,

    #[serde(default)]
    pub game: GameRules,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    // "memory" 表示仅使用进程内存储
    #[serde(default = "default_db_url")]
    pub url: String,

    // SQLite 写入串行化，默认单连接
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// 控制台适配器模拟的聊天与用户
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConsoleConfig {
    #[serde(default = "default_console_chat")]
    pub chat_id: i64,
    #[serde(default = "default_console_user")]
    pub user_id: i64,
    #[serde(default = "default_console_username")]
    pub username: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            chat_id: default_console_chat(),
            user_id: default_console_user(),
            username: default_console_username(),
        }
    }
}

/// 恢复暂停回合时计时器的处理方式
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// 重新开始完整时长 (不保留已经过的时间)
    #[default]
    Restart,
}

/// 引擎使用的游戏常量
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GameRules {
    #[serde(default = "default_min_number")]
    pub min_number: i64,
    #[serde(default = "default_max_number")]
    pub max_number: i64,
    #[serde(default = "default_max_guesses")]
    pub max_guesses_per_player: u32,
    #[serde(default = "default_round_duration")]
    pub round_duration_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_min_guesses")]
    pub min_guesses_before_close: u32,
    // 第 N 回合的建议花费，超出表长的回合沿用最后一项
    #[serde(default = "default_round_costs")]
    pub round_costs: Vec<u32>,
    #[serde(default)]
    pub resume_policy: ResumePolicy,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            min_number: default_min_number(),
            max_number: default_max_number(),
            max_guesses_per_player: default_max_guesses(),
            round_duration_secs: default_round_duration(),
            poll_interval_secs: default_poll_interval(),
            min_guesses_before_close: default_min_guesses(),
            round_costs: default_round_costs(),
            resume_policy: ResumePolicy::default(),
        }
    }
}

impl GameRules {
    pub fn round_duration(&self) -> Duration {
        Duration::from_secs(self.round_duration_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn in_range(&self, value: i64) -> bool {
        (self.min_number..=self.max_number).contains(&value)
    }

    /// 回合建议花费 (单调表，超出部分饱和)
    pub fn cost_hint(&self, round_index: u32) -> u32 {
        let idx = round_index.max(1) as usize - 1;
        self.round_costs
            .get(idx)
            .or_else(|| self.round_costs.last())
            .copied()
            .unwrap_or(0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_number > self.max_number {
            bail!(
                "game.min_number ({}) must not exceed game.max_number ({})",
                self.min_number,
                self.max_number
            );
        }
        if self.round_duration_secs == 0 || self.poll_interval_secs == 0 {
            bail!("game.round_duration_secs and game.poll_interval_secs must be positive");
        }
        if self.max_guesses_per_player == 0 {
            bail!("game.max_guesses_per_player must be positive");
        }
        if self.round_costs.is_empty() {
            bail!("game.round_costs must not be empty");
        }
        Ok(())
    }
}

impl AppConfig {
    /// 加载配置，如果文件不存在则写入默认配置
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let cfg = AppConfig::default();
            cfg.save(path).await?;
            return Ok(cfg);
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let cfg: AppConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        cfg.game.validate()?;
        Ok(cfg)
    }

    /// 原子写入配置（写临时文件 -> Rename 覆盖）
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let toml_string = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, toml_string).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admins.is_empty() || self.admins.contains(&user_id)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            command_prefix: default_prefix(),
            admins: Vec::new(),
            log_level: default_log_level(),
            database: DatabaseConfig::default(),
            console: ConsoleConfig::default(),
            game: GameRules::default(),
        }
    }
}

fn default_prefix() -> Vec<String> {
    vec!["/".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_db_url() -> String {
    "sqlite:data/fairguess.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    1
}

fn default_console_chat() -> i64 {
    -1000
}

fn default_console_user() -> i64 {
    1
}

fn default_console_username() -> String {
    "console".to_string()
}

fn default_min_number() -> i64 {
    1
}

fn default_max_number() -> i64 {
    10000
}

fn default_max_guesses() -> u32 {
    10
}

fn default_round_duration() -> u64 {
    120
}

fn default_poll_interval() -> u64 {
    30
}

fn default_min_guesses() -> u32 {
    10
}

fn default_round_costs() -> Vec<u32> {
    vec![1, 5, 20, 50, 100, 200, 500, 1000]
}
