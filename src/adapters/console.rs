use anyhow::{Context as _, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::announce;
use crate::config::ConsoleConfig;
use crate::handler::{GuessBot, Incoming};
use crate::notify::RoundClosed;
use crate::{info, warn};

// ================= 模拟用户 =================

#[derive(Debug, Clone, PartialEq)]
struct ConsoleUser {
    id: i64,
    name: Option<String>,
}

/// `:as <userId> [name]`
fn parse_switch(rest: &str) -> Option<ConsoleUser> {
    let mut parts = rest.split_whitespace();
    let id = parts.next()?.parse().ok()?;
    let name = parts.next().map(str::to_string);
    Some(ConsoleUser { id, name })
}

// ================= 适配器逻辑 =================

/// 控制台适配器入口：每行输入都是当前用户在配置聊天中发出的一条消息
pub async fn run(
    bot: Arc<GuessBot>,
    cfg: ConsoleConfig,
    mut events: UnboundedReceiver<RoundClosed>,
) -> Result<()> {
    info!(target: "Console", "已启动控制台模式。发送数字即为猜测，输入 /help 查看指令");
    info!(
        target: "Console",
        "模拟环境: Chat ID: {} | User ID: {} ({})，使用 :as <id> [name] 切换用户，:quit 退出",
        cfg.chat_id,
        cfg.user_id,
        cfg.username
    );

    let mut user = ConsoleUser {
        id: cfg.user_id,
        name: Some(cfg.username.clone()),
    };

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin).lines();

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                print_reply(event.chat_id, &announce::auto_closed(&event));
            }
            line = reader.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                let content = line.trim();
                if content.is_empty() {
                    continue;
                }
                if content == ":quit" || content == "/exit" {
                    break;
                }

                if let Some(rest) = content.strip_prefix(":as") {
                    match parse_switch(rest) {
                        Some(next) => {
                            info!(target: "Console", "切换到用户 {} ({:?})", next.id, next.name);
                            user = next;
                        }
                        None => warn!(target: "Console", "用法: :as <userId> [name]"),
                    }
                    continue;
                }

                let msg = Incoming {
                    chat_id: cfg.chat_id,
                    user_id: user.id,
                    username: user.name.clone(),
                    text: content.to_string(),
                };
                match bot.handle(&msg).await {
                    Ok(Some(reply)) => print_reply(msg.chat_id, &reply),
                    Ok(None) => {}
                    Err(e) => warn!(target: "Console", "处理消息时出错: {:#}", e),
                }
            }
        }
    }

    info!(target: "Console", "控制台输入结束");
    Ok(())
}

fn print_reply(chat_id: i64, text: &str) {
    println!("\x1b[36m[Bot Reply] ({}) > \x1b[0m{}", chat_id, text);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_user_switch() {
        assert_eq!(
            parse_switch(" 42 alice"),
            Some(ConsoleUser {
                id: 42,
                name: Some("alice".into())
            })
        );
        assert_eq!(parse_switch(" 7"), Some(ConsoleUser { id: 7, name: None }));
        assert_eq!(parse_switch(""), None);
        assert_eq!(parse_switch(" bob"), None);
    }
}
