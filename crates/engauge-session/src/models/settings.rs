use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Server-wide settings, edited through the `settings` singleton resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "statsToggles", default)]
    pub stats_toggles: StatsToggles,
    /// Whether raw interactions are stored.
    #[serde(rename = "interactions", default = "default_true")]
    pub interactions_storage: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            id: None,
            stats_toggles: StatsToggles::default(),
            interactions_storage: true,
        }
    }
}

/// Which summary intervals the server computes. All on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsToggles {
    pub hourly: bool,
    pub daily: bool,
    pub weekly: bool,
    pub monthly: bool,
    pub quarterly: bool,
    pub yearly: bool,
}

impl Default for StatsToggles {
    fn default() -> Self {
        Self {
            hourly: true,
            daily: true,
            weekly: true,
            monthly: true,
            quarterly: true,
            yearly: true,
        }
    }
}

impl StatsToggles {
    /// Flip the toggle for an interval. `AllTime` has no toggle.
    pub fn toggle(&mut self, interval: Interval) {
        if let Some(flag) = self.flag_mut(interval) {
            *flag = !*flag;
        }
    }

    pub fn is_enabled(&self, interval: Interval) -> bool {
        match interval {
            Interval::AllTime => true,
            Interval::Hourly => self.hourly,
            Interval::Daily => self.daily,
            Interval::Weekly => self.weekly,
            Interval::Monthly => self.monthly,
            Interval::Quarterly => self.quarterly,
            Interval::Yearly => self.yearly,
        }
    }

    fn flag_mut(&mut self, interval: Interval) -> Option<&mut bool> {
        match interval {
            Interval::AllTime => None,
            Interval::Hourly => Some(&mut self.hourly),
            Interval::Daily => Some(&mut self.daily),
            Interval::Weekly => Some(&mut self.weekly),
            Interval::Monthly => Some(&mut self.monthly),
            Interval::Quarterly => Some(&mut self.quarterly),
            Interval::Yearly => Some(&mut self.yearly),
        }
    }
}

/// Summary interval types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    AllTime,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Interval {
    pub const ALL: [Interval; 7] = [
        Interval::AllTime,
        Interval::Hourly,
        Interval::Daily,
        Interval::Weekly,
        Interval::Monthly,
        Interval::Quarterly,
        Interval::Yearly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::AllTime => "allTime",
            Interval::Hourly => "hourly",
            Interval::Daily => "daily",
            Interval::Weekly => "weekly",
            Interval::Monthly => "monthly",
            Interval::Quarterly => "quarterly",
            Interval::Yearly => "yearly",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .into_iter()
            .find(|i| i.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown interval: {}", s))
    }
}
