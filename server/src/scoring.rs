//! Scoring and progression: attack power, combo tracking, lucky-event
//! rolls, experience gain and level thresholds.
//!
//! All formulas are table-driven and total; the only inputs beyond plain
//! numbers are the injectable random source used for the experience factor
//! and the bonus rolls.

use rand::Rng;
use shared::{BonusEvent, COMBO_TIMEOUT_MS};

/// Classic per-line score table, indexed by lines cleared (1..=4).
const LINE_SCORES: [u64; 5] = [0, 40, 100, 300, 1200];

/// Base experience per line count (1..=4); larger clears fall back to
/// `lines * 100`.
const EXP_BASE: [u64; 5] = [0, 100, 200, 300, 400];

/// Garbage lines sent to the attack target for a clear.
///
/// `max(0, lines - 1)` from the clear itself, plus a level bonus every
/// third level, plus a combo bonus stepping up at chains of 2/4/6/8.
pub fn attack_power(lines_cleared: u32, level: u32, combo: u32) -> u32 {
    let combo_bonus = match combo {
        c if c >= 8 => 4,
        c if c >= 6 => 3,
        c if c >= 4 => 2,
        c if c >= 2 => 1,
        _ => 0,
    };
    lines_cleared.saturating_sub(1) + level / 3 + combo_bonus
}

/// Advances the combo chain, or restarts it at 1 when the previous clear
/// is older than the combo window.
pub fn update_combo(prev_combo: u32, last_clear_ms: u64, now_ms: u64) -> u32 {
    if now_ms.saturating_sub(last_clear_ms) > COMBO_TIMEOUT_MS {
        1
    } else {
        prev_combo + 1
    }
}

/// Experience multiplier for the current combo chain.
fn combo_multiplier(combo: u32) -> f64 {
    match combo {
        c if c >= 4 => 2.0,
        c if c >= 2 => 1.5,
        _ => 1.0,
    }
}

/// Rolls the "lucky event" table: one draw, three ascending cumulative
/// thresholds. Below all of them nothing happens, which is the common case.
pub fn roll_bonus(rng: &mut impl Rng) -> Option<BonusEvent> {
    let roll: f64 = rng.gen();
    if roll < 0.01 {
        Some(BonusEvent {
            name: "jackpot".to_string(),
            color: "gold".to_string(),
            multiplier: 3.0,
        })
    } else if roll < 0.05 {
        Some(BonusEvent {
            name: "double down".to_string(),
            color: "violet".to_string(),
            multiplier: 2.0,
        })
    } else if roll < 0.10 {
        Some(BonusEvent {
            name: "hot streak".to_string(),
            color: "orange".to_string(),
            multiplier: 1.5,
        })
    } else {
        None
    }
}

/// Experience for a clear: base value per line count, a uniform random
/// factor in [0.5, 1.5], the combo multiplier, and any bonus-event
/// multiplier. Rounding down happens once, at the very end.
pub fn gained_exp(
    lines_cleared: u32,
    combo: u32,
    bonus: Option<&BonusEvent>,
    rng: &mut impl Rng,
) -> u64 {
    if lines_cleared == 0 {
        return 0;
    }
    let base = *EXP_BASE
        .get(lines_cleared as usize)
        .unwrap_or(&(lines_cleared as u64 * 100)) as f64;
    let factor: f64 = rng.gen_range(0.5..=1.5);
    let bonus_mult = bonus.map(|b| b.multiplier as f64).unwrap_or(1.0);

    (base * factor * combo_multiplier(combo) * bonus_mult) as u64
}

/// Classic display score for a clear, scaled by level.
pub fn line_score(lines_cleared: u32, level: u32) -> u64 {
    let base = *LINE_SCORES
        .get(lines_cleared as usize)
        .unwrap_or(&LINE_SCORES[4]);
    base * (level as u64 + 1)
}

/// Experience needed to go from `level` to `level + 1`.
fn exp_to_next(level: u32) -> u64 {
    500 + 250 * level as u64
}

/// Cumulative experience at which `level + 1` is reached.
fn level_threshold(level: u32) -> u64 {
    (0..=level).map(exp_to_next).sum()
}

/// Replays the threshold table against total experience. A single big gain
/// can advance several levels at once. Returns the new level, the next
/// cumulative threshold, and whether any advance happened.
pub fn check_level_up(level: u32, total_exp: u64) -> (u32, u64, bool) {
    let mut new_level = level;
    while total_exp >= level_threshold(new_level) {
        new_level += 1;
    }
    (new_level, level_threshold(new_level), new_level > level)
}

/// Ticks between forced gravity steps at a given level. The countdown
/// shortens two ticks per level and floors at 5 (100ms at the 20ms tick).
pub fn gravity_delay_ticks(level: u32) -> u32 {
    25u32.saturating_sub(2 * level).max(5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_attack_power_components() {
        // No bonus from a single line.
        assert_eq!(attack_power(1, 0, 0), 0);
        assert_eq!(attack_power(2, 0, 0), 1);
        assert_eq!(attack_power(4, 0, 0), 3);
        // Level contributes every third level.
        assert_eq!(attack_power(1, 3, 0), 1);
        assert_eq!(attack_power(1, 9, 0), 3);
        // Combo thresholds at 2/4/6/8.
        assert_eq!(attack_power(1, 0, 1), 0);
        assert_eq!(attack_power(1, 0, 2), 1);
        assert_eq!(attack_power(1, 0, 4), 2);
        assert_eq!(attack_power(1, 0, 6), 3);
        assert_eq!(attack_power(1, 0, 8), 4);
    }

    #[test]
    fn test_attack_power_reference_case() {
        // 4 lines at level 9 with an 8-chain: 3 + 3 + 4.
        assert_eq!(attack_power(4, 9, 8), 10);
    }

    #[test]
    fn test_update_combo_within_window_increments() {
        assert_eq!(update_combo(1, 1000, 1000 + COMBO_TIMEOUT_MS), 2);
        assert_eq!(update_combo(5, 2000, 2100), 6);
    }

    #[test]
    fn test_update_combo_after_window_resets() {
        assert_eq!(update_combo(5, 1000, 1001 + COMBO_TIMEOUT_MS), 1);
        // A first-ever clear starts the chain at 1.
        assert_eq!(update_combo(0, 0, 50_000), 1);
    }

    #[test]
    fn test_combo_multiplier_steps() {
        assert_approx_eq!(combo_multiplier(0), 1.0);
        assert_approx_eq!(combo_multiplier(1), 1.0);
        assert_approx_eq!(combo_multiplier(2), 1.5);
        assert_approx_eq!(combo_multiplier(3), 1.5);
        assert_approx_eq!(combo_multiplier(4), 2.0);
        assert_approx_eq!(combo_multiplier(10), 2.0);
    }

    #[test]
    fn test_roll_bonus_tiers_over_many_draws() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut hits = 0usize;
        let draws = 20_000;
        for _ in 0..draws {
            if let Some(event) = roll_bonus(&mut rng) {
                hits += 1;
                assert!(
                    ["jackpot", "double down", "hot streak"].contains(&event.name.as_str())
                );
                assert!(event.multiplier >= 1.5 && event.multiplier <= 3.0);
            }
        }
        // Expect roughly 10% of draws to produce an event.
        let rate = hits as f64 / draws as f64;
        assert!(rate > 0.07 && rate < 0.13, "bonus rate {} out of range", rate);
    }

    #[test]
    fn test_gained_exp_stays_in_band() {
        let mut rng = StdRng::seed_from_u64(8);
        for _ in 0..200 {
            // 2 lines, no combo, no bonus: 200 * [0.5, 1.5].
            let exp = gained_exp(2, 0, None, &mut rng);
            assert!((100..=300).contains(&exp), "exp {} out of band", exp);
        }
    }

    #[test]
    fn test_gained_exp_applies_combo_and_bonus_multipliers() {
        let bonus = BonusEvent {
            name: "jackpot".to_string(),
            color: "gold".to_string(),
            multiplier: 3.0,
        };
        let mut rng = StdRng::seed_from_u64(8);
        for _ in 0..200 {
            // 1 line, 4-chain, x3 bonus: 100 * [0.5, 1.5] * 2.0 * 3.0.
            let exp = gained_exp(1, 4, Some(&bonus), &mut rng);
            assert!((300..=900).contains(&exp), "exp {} out of band", exp);
        }
    }

    #[test]
    fn test_gained_exp_zero_lines() {
        let mut rng = StdRng::seed_from_u64(8);
        assert_eq!(gained_exp(0, 3, None, &mut rng), 0);
    }

    #[test]
    fn test_line_score_table() {
        assert_eq!(line_score(1, 0), 40);
        assert_eq!(line_score(4, 0), 1200);
        assert_eq!(line_score(2, 5), 600);
    }

    #[test]
    fn test_level_thresholds_are_strictly_increasing() {
        let mut prev = 0;
        for level in 0..20 {
            let t = level_threshold(level);
            assert!(t > prev);
            prev = t;
        }
    }

    #[test]
    fn test_check_level_up_single_step() {
        let (level, next, leveled) = check_level_up(0, 499);
        assert_eq!(level, 0);
        assert_eq!(next, 500);
        assert!(!leveled);

        let (level, next, leveled) = check_level_up(0, 500);
        assert_eq!(level, 1);
        assert_eq!(next, 1250);
        assert!(leveled);
    }

    #[test]
    fn test_check_level_up_can_skip_levels() {
        // 500 + 750 = 1250 reaches level 2 in one evaluation.
        let (level, _, leveled) = check_level_up(0, 1250);
        assert_eq!(level, 2);
        assert!(leveled);
    }

    #[test]
    fn test_gravity_delay_speeds_up_and_floors() {
        assert_eq!(gravity_delay_ticks(0), 25);
        assert_eq!(gravity_delay_ticks(1), 23);
        assert_eq!(gravity_delay_ticks(10), 5);
        assert_eq!(gravity_delay_ticks(30), 5);
    }
}
