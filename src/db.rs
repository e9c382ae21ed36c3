pub mod entity;

use sea_orm::sea_query::Index;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};
use std::path::Path;
use tokio::fs;

use crate::config::DatabaseConfig;
use crate::model::{GameStatus, RoundStatus};
use crate::{info, warn};
use entity::{game, guess, participation, round};

/// 初始化数据库连接并建表
pub async fn init(cfg: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    if let Some(dir) = sqlite_parent_dir(&cfg.url)
        && !dir.exists()
        && let Err(e) = fs::create_dir_all(dir).await
    {
        warn!(target: "Database", "创建数据目录失败 {}: {}", dir.display(), e);
    }

    let db = connect(&cfg.url, cfg.max_connections).await?;
    init_schema(&db).await?;

    info!(target: "Database", "连接成功: {}", cfg.url);
    Ok(db)
}

pub async fn connect(url: &str, max_connections: u32) -> Result<DatabaseConnection, DbErr> {
    let mut opts = ConnectOptions::new(url.to_owned());
    // 内存库每个连接都是独立的数据库，只能用单连接
    let max = if url.contains(":memory:") {
        1
    } else {
        max_connections.max(1)
    };
    opts.max_connections(max).sqlx_logging(false);
    Database::connect(opts).await
}

/// 建表与索引，可重复执行
pub async fn init_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    db.execute(builder.build(schema.create_table_from_entity(game::Entity).if_not_exists()))
        .await?;
    db.execute(builder.build(schema.create_table_from_entity(round::Entity).if_not_exists()))
        .await?;
    db.execute(builder.build(schema.create_table_from_entity(guess::Entity).if_not_exists()))
        .await?;
    db.execute(
        builder.build(
            schema
                .create_table_from_entity(participation::Entity)
                .if_not_exists(),
        ),
    )
    .await?;

    let indexes = [
        Index::create()
            .name("idx_games_chat")
            .table(game::Entity)
            .col(game::Column::ChatId)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("uq_rounds_game_index")
            .table(round::Entity)
            .col(round::Column::GameId)
            .col(round::Column::RoundIndex)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_guesses_round_user")
            .table(guess::Entity)
            .col(guess::Column::RoundId)
            .col(guess::Column::UserId)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("uq_participations_user")
            .table(participation::Entity)
            .col(participation::Column::GameId)
            .col(participation::Column::RoundId)
            .col(participation::Column::UserId)
            .unique()
            .if_not_exists()
            .to_owned(),
    ];
    for idx in &indexes {
        db.execute(builder.build(idx)).await?;
    }

    // 部分唯一索引：每个聊天至多一局未结束的游戏，每局至多一个未结束的回合
    db.execute_unprepared(&format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_games_open_chat ON games (chat_id) WHERE status IN ({})",
        quoted(GameStatus::OPEN.iter().map(|s| s.as_str()))
    ))
    .await?;
    db.execute_unprepared(&format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_rounds_open_game ON rounds (game_id) WHERE status IN ({})",
        quoted(RoundStatus::OPEN.iter().map(|s| s.as_str()))
    ))
    .await?;

    Ok(())
}

fn quoted<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items
        .map(|s| format!("'{}'", s))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `sqlite:data/x.db?mode=rwc` -> `data`
fn sqlite_parent_dir(url: &str) -> Option<&Path> {
    let rest = url.strip_prefix("sqlite:")?;
    let rest = rest.trim_start_matches("//");
    let path = rest.split('?').next()?;
    if path.is_empty() || path.contains(":memory:") {
        return None;
    }
    Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
}
