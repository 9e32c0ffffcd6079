//! 奖励计算
//!
//! 三种奖励模式各对应一个纯函数分支，入参是连续签到的第几天，
//! 出参是本次应发积分。引擎不关心模式细节，只调用 `compute`。

use rand::Rng;
use serde::{Deserialize, Serialize};

/// 奖励模式
///
/// 封闭的带标签变体，序列化形如 `{"mode":"fixed","amount":10}`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RewardMode {
    /// 固定奖励
    Fixed { amount: i64 },
    /// 周期内递增：base + step * 周期内已过天数
    ///
    /// cycle_length 天后增长归零重新开始（重置的是增长，不是连续天数）。
    Incremental {
        base: i64,
        step: i64,
        cycle_length: i64,
    },
    /// [min, max] 上的均匀随机整数
    Random { min: i64, max: i64 },
}

/// 计算连续签到第 day_in_streak 天（1 起始）的积分奖励
pub fn compute(mode: &RewardMode, day_in_streak: i64) -> i64 {
    match mode {
        RewardMode::Fixed { amount } => *amount,
        RewardMode::Incremental {
            base,
            step,
            cycle_length,
        } => {
            // cycle_length 由配置层保证 ≥ 1
            let elapsed_in_cycle = (day_in_streak.max(1) - 1) % (*cycle_length).max(1);
            base + step * elapsed_in_cycle
        }
        RewardMode::Random { min, max } => {
            if min >= max {
                return *min;
            }
            rand::rng().random_range(*min..=*max)
        }
    }
}
