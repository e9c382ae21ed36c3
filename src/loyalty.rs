use std::collections::BTreeSet;

pub const FULL_PERCENT: u32 = 100;
pub const FLOOR_PERCENT: u32 = 50;
const ROUND_ONE_PENALTY: u32 = 25;
const OTHER_ROUND_PENALTY: u32 = 15;

/// 计算获胜者的忠诚度百分比 (50..=100)
///
/// `started` 为游戏中开始过的全部回合序号，`participated` 为获胜者至少猜过一次的回合序号。
/// 缺席第 1 回合扣 25，缺席其余每回合扣 15，最低 50。
pub fn loyalty_percent(started: &BTreeSet<u32>, participated: &BTreeSet<u32>) -> u32 {
    if started.is_empty() {
        return FULL_PERCENT;
    }

    let missed: BTreeSet<u32> = started.difference(participated).copied().collect();
    let missed_round_one = u32::from(missed.contains(&1));
    let other_missed = missed.iter().filter(|&&idx| idx != 1).count() as u32;

    let penalty = ROUND_ONE_PENALTY * missed_round_one + OTHER_ROUND_PENALTY * other_missed;
    FULL_PERCENT.saturating_sub(penalty).max(FLOOR_PERCENT)
}
