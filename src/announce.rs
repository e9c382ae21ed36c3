//! 面向玩家的文本消息
//!
//! 这里只负责渲染，不做任何状态判断；所有数值都由调用方从引擎结果中取出。

use std::fmt::Write as _;

use crate::commit;
use crate::config::GameRules;
use crate::engine::{Hint, Reveal, StatusReport};
use crate::model::Sponsor;
use crate::notify::RoundClosed;

pub fn game_created(
    rules: &GameRules,
    target_hash: &str,
    prize_amount: Option<f64>,
    sponsor: &Sponsor,
) -> String {
    let mut out = String::from("New game started!\n\nProvably fair commitment:\n");
    let _ = writeln!(out, "{}", target_hash);
    if let Some(prize) = prize_amount {
        let _ = writeln!(out, "Prize: {}", format_amount(prize));
    }
    if let Some(name) = &sponsor.name {
        let _ = writeln!(out, "Sponsored by: {}", name);
    }
    let _ = write!(
        out,
        "\nRules:\n\
         - The secret number is between {} and {}\n\
         - Each player can guess up to {} times per round\n\
         - A round lasts {} (and needs at least {} guesses to close)\n\
         - Every wrong guess gets a higher/lower hint\n\
         - The first correct guess wins\n\
         - Stay for every round to keep your full reward",
        rules.min_number,
        rules.max_number,
        rules.max_guesses_per_player,
        format_duration(rules.round_duration_secs),
        rules.min_guesses_before_close,
    );
    out
}

pub fn round_started(
    rules: &GameRules,
    round_index: u32,
    cost: u32,
    sponsor_message: Option<&str>,
) -> String {
    let mut out = format!("Round {} started!\n\n", round_index);
    let _ = writeln!(out, "Suggested cost: {}", cost);
    let _ = writeln!(
        out,
        "Duration: {} (min {} guesses)",
        format_duration(rules.round_duration_secs),
        rules.min_guesses_before_close
    );
    let _ = writeln!(out, "Range: {} - {}", rules.min_number, rules.max_number);
    let _ = write!(
        out,
        "Limit: {} guesses per player\n\nGood luck!",
        rules.max_guesses_per_player
    );
    append_sponsor(&mut out, sponsor_message);
    out
}

pub fn round_paused() -> String {
    "Round paused.\n\nWaiting for an admin to resume...".to_string()
}

pub fn round_resumed(round_index: u32) -> String {
    format!("Round {} resumed! Keep guessing.", round_index)
}

pub fn round_closed(round_index: u32, next_round_index: u32, sponsor_message: Option<&str>) -> String {
    let mut out = format!(
        "Round {} closed.\n\nNo winner yet. An admin can start round {}.",
        round_index, next_round_index
    );
    append_sponsor(&mut out, sponsor_message);
    out
}

/// 计时器自动结束回合的公告
pub fn auto_closed(event: &RoundClosed) -> String {
    round_closed(
        event.round_index,
        event.next_round_index,
        event.sponsor_end_message.as_deref(),
    )
}

pub fn hint(value: i64, hint: Hint) -> String {
    match hint {
        Hint::Higher => format!("The secret number is higher than {}", value),
        Hint::Lower => format!("The secret number is lower than {}", value),
        Hint::Correct => format!("{} is correct!", value),
    }
}

/// 获胜公告：奖金按忠诚度折算，并附带可复核的证明
pub fn winner(
    display_name: &str,
    round_index: u32,
    loyalty_percent: u32,
    prize_amount: Option<f64>,
    reveal: &Reveal,
) -> String {
    let mut out = String::from("WE HAVE A WINNER!\n\n");
    let _ = writeln!(out, "Winner: {}", display_name);
    let _ = writeln!(out, "Secret number: {}", reveal.number);
    let _ = writeln!(out, "Won in round: {}", round_index);
    if let Some(prize) = prize_amount {
        let won = prize * f64::from(loyalty_percent) / 100.0;
        let _ = writeln!(out, "Prize won: {}", format_amount(won));
        if loyalty_percent < 100 {
            let _ = writeln!(
                out,
                "Loyalty penalty: {}% (missed rounds)",
                100 - loyalty_percent
            );
        }
    }
    out.push('\n');
    out.push_str(&proof(reveal));
    out.push_str("\n\nThank you for playing!");
    out
}

pub fn manual_reveal(reveal: &Reveal) -> String {
    let mut out = format!(
        "Game revealed.\n\nThe secret number was: {}\n\n",
        reveal.number
    );
    out.push_str(&proof(reveal));
    out.push_str("\n\nNo winner this time. Better luck next game!");
    out
}

/// 证明段落，校验结果在此处独立重算
pub fn proof(reveal: &Reveal) -> String {
    let valid = commit::verify(reveal.number, &reveal.salt, &reveal.target_hash);
    format!(
        "Proof (commit-reveal):\nNumber: {}\nSalt: {}\nHash: {}\n\nVerification: {}",
        reveal.number,
        reveal.salt,
        reveal.target_hash,
        if valid { "VALID" } else { "INVALID" }
    )
}

pub fn game_canceled(prefix: &str) -> String {
    format!(
        "Game canceled.\n\nA new game can be started with {}newgame",
        prefix
    )
}

pub fn status(report: &StatusReport) -> String {
    let mut out = String::from("Game status\n\n");
    let _ = writeln!(out, "Game #{}: {}", report.game.id, report.game.status);
    let _ = writeln!(out, "Commitment: {}", report.game.target_hash);
    let _ = writeln!(out, "Total rounds: {}", report.rounds.len());

    if let Some(round) = &report.active_round {
        let _ = writeln!(out, "\nRound {} ({})", round.round_index, round.status);
        let _ = writeln!(out, "Total guesses: {}", round.total_guesses);
        if let Some(cost) = round.cost_hint {
            let _ = writeln!(out, "Suggested cost: {}", cost);
        }
        if let Some(guess) = &report.last_guess {
            let _ = writeln!(out, "Last guess: {}", guess.value);
        }
    }
    out.trim_end().to_string()
}

pub fn help(rules: &GameRules, prefix: &str) -> String {
    format!(
        "Fair Guess\n\n\
         How to play:\n\
         1. A secret number between {min} and {max} is chosen and its hash is published\n\
         2. Send your guess as a number in the chat\n\
         3. You can guess up to {limit} times per round\n\
         4. Each wrong guess gets a higher/lower hint\n\
         5. Rounds last {duration} (minimum {min_guesses} guesses total)\n\
         6. The first correct guess wins the prize\n\n\
         Loyalty rewards:\n\
         - Play from round 1: 100%\n\
         - Miss round 1: -25%\n\
         - Miss any other round: -15% each\n\
         - Minimum: 50%\n\n\
         Commands:\n\
         {p}start, {p}help - show this help\n\
         {p}status - current game status\n\
         {p}newgame [prize] | [sponsor] | [start msg] | [end msg] - (admin) new game\n\
         {p}startround - (admin) start the next round\n\
         {p}pause / {p}resume - (admin) pause or resume the round\n\
         {p}closeround - (admin) close the round\n\
         {p}reveal - (admin) end the game and reveal the number\n\
         {p}cancel - (admin) cancel the game\n\
         {p}cost [round] - (admin) suggested cost of a round\n\
         {p}verify <game id> - check a finished game's proof",
        min = rules.min_number,
        max = rules.max_number,
        limit = rules.max_guesses_per_player,
        duration = format_duration(rules.round_duration_secs),
        min_guesses = rules.min_guesses_before_close,
        p = prefix,
    )
}

pub fn cost_hint(round_index: u32, cost: u32) -> String {
    format!("Round {} cost\n\nSuggested: {}", round_index, cost)
}

pub fn guess_limit_reached(limit: u32) -> String {
    format!("You've reached the maximum of {} guesses for this round.", limit)
}

pub fn invalid_guess(rules: &GameRules) -> String {
    format!(
        "Invalid guess. Please send a number between {} and {}.",
        rules.min_number, rules.max_number
    )
}

pub fn not_accepting_guesses() -> String {
    "The round is not accepting guesses right now. Please wait for an admin.".to_string()
}

pub fn no_active_game(prefix: &str) -> String {
    format!("No active game. An admin can start one with {}newgame", prefix)
}

pub fn no_active_round() -> String {
    "No active round.".to_string()
}

pub fn only_admins() -> String {
    "Only admins can use this command.".to_string()
}

pub fn group_only() -> String {
    "This command only works in group chats.".to_string()
}

pub fn active_game_exists(prefix: &str) -> String {
    format!(
        "There's already an active game. Cancel it first with {}cancel",
        prefix
    )
}

pub fn newgame_usage(prefix: &str) -> String {
    format!(
        "Usage:\n{p}newgame [prize]\n{p}newgame [prize] | [sponsor] | [start msg] | [end msg]\n\n\
         Examples:\n{p}newgame 1000\n{p}newgame 500 | TechCorp\n{p}newgame 1000 | TechCorp | Welcome! | Thanks!",
        p = prefix
    )
}

pub fn verify_result(game_id: i64, valid: bool) -> String {
    if valid {
        format!("Game #{}: commitment VALID", game_id)
    } else {
        format!("Game #{}: commitment INVALID", game_id)
    }
}

fn append_sponsor(out: &mut String, message: Option<&str>) {
    if let Some(msg) = message {
        let _ = write!(out, "\n\nSponsor message:\n{}", msg);
    }
}

fn format_duration(secs: u64) -> String {
    match secs {
        s if s % 60 == 0 && s >= 60 => {
            let m = s / 60;
            format!("{} minute{}", m, if m == 1 { "" } else { "s" })
        }
        s => format!("{} seconds", s),
    }
}

fn format_amount(amount: f64) -> String {
    format!("{:.0}", amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reveal() -> Reveal {
        let c = commit::commit(4242);
        Reveal {
            game_id: 1,
            number: 4242,
            salt: c.salt,
            target_hash: c.hash,
        }
    }

    #[test]
    fn winner_scales_prize_by_loyalty() {
        let text = winner("@alice", 3, 75, Some(1000.0), &reveal());
        assert!(text.contains("Prize won: 750"));
        assert!(text.contains("Loyalty penalty: 25%"));
        assert!(text.contains("Won in round: 3"));
        assert!(text.contains("Verification: VALID"));
    }

    #[test]
    fn full_loyalty_has_no_penalty() {
        let text = winner("bob", 1, 100, Some(500.0), &reveal());
        assert!(text.contains("Prize won: 500"));
        assert!(!text.contains("penalty"));

        let text = winner("bob", 1, 100, None, &reveal());
        assert!(!text.contains("Prize"));
    }

    #[test]
    fn tampered_proof_renders_invalid() {
        let mut r = reveal();
        r.number += 1;
        assert!(proof(&r).contains("Verification: INVALID"));
    }

    #[test]
    fn round_closed_mentions_next_round_and_sponsor() {
        let event = RoundClosed {
            game_id: 1,
            chat_id: -5,
            round_id: 10,
            round_index: 2,
            next_round_index: 3,
            sponsor_end_message: Some("See you soon".into()),
        };
        let text = auto_closed(&event);
        assert!(text.starts_with("Round 2 closed."));
        assert!(text.contains("start round 3"));
        assert!(text.ends_with("See you soon"));
    }

    #[test]
    fn durations_render_in_minutes() {
        assert_eq!(format_duration(120), "2 minutes");
        assert_eq!(format_duration(60), "1 minute");
        assert_eq!(format_duration(45), "45 seconds");
    }
}
