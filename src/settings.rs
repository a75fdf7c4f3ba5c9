use std::ops::RangeInclusive;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const ROUNDS: RangeInclusive<u8> = 1..=15;
const TIMER_LENGTH_MS: RangeInclusive<u64> = 1..=100 * 60 * 1000;
const TIMER_BONUS_MS: RangeInclusive<u64> = 1..=60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub rounds: u8,
    pub timer_enabled: bool,
    /// Milliseconds each player starts a round with.
    pub timer_length: u64,
    /// Milliseconds credited back after every move.
    pub timer_bonus: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            rounds: 1,
            timer_enabled: true,
            timer_length: 10 * 60 * 1000,
            timer_bonus: 2 * 1000,
        }
    }
}

/// Partial settings as submitted by a client. Fields of the wrong type or
/// out of range are dropped one by one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, deserialize_with = "lenient")]
    pub rounds: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub timer_enabled: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub timer_length: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub timer_bonus: Option<i64>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl Settings {
    /// Applies every valid field of `patch` at once.
    pub fn apply(&mut self, patch: &SettingsPatch) {
        let mut next = *self;

        if let Some(rounds) = patch.rounds.and_then(|r| u8::try_from(r).ok()) {
            if ROUNDS.contains(&rounds) {
                next.rounds = rounds;
            }
        }
        if let Some(enabled) = patch.timer_enabled {
            next.timer_enabled = enabled;
        }
        if let Some(length) = patch.timer_length.and_then(|l| u64::try_from(l).ok()) {
            if TIMER_LENGTH_MS.contains(&length) {
                next.timer_length = length;
            }
        }
        if let Some(bonus) = patch.timer_bonus.and_then(|b| u64::try_from(b).ok()) {
            if TIMER_BONUS_MS.contains(&bonus) {
                next.timer_bonus = bonus;
            }
        }

        *self = next;
    }
}
