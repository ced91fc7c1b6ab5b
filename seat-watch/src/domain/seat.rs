//! Seat classes, seat counts and the label table between them.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer};

/// A class of seat offered on a train.
///
/// The declaration order is the canonical order used wherever seat classes
/// are iterated (diffing, display). `Ord` follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SeatClass {
    Business,
    First,
    Second,
    AdvancedSoftSleep,
    SoftSleep,
    HardSleep,
    SoftSeat,
    HardSeat,
    NoSeat,
}

impl SeatClass {
    /// Every seat class, in canonical order.
    pub const ALL: [SeatClass; 9] = [
        SeatClass::Business,
        SeatClass::First,
        SeatClass::Second,
        SeatClass::AdvancedSoftSleep,
        SeatClass::SoftSleep,
        SeatClass::HardSleep,
        SeatClass::SoftSeat,
        SeatClass::HardSeat,
        SeatClass::NoSeat,
    ];

    /// Stable machine-readable key, e.g. `"hard_sleep"`.
    pub fn key(self) -> &'static str {
        match self {
            SeatClass::Business => "business",
            SeatClass::First => "first",
            SeatClass::Second => "second",
            SeatClass::AdvancedSoftSleep => "advanced_soft_sleep",
            SeatClass::SoftSleep => "soft_sleep",
            SeatClass::HardSleep => "hard_sleep",
            SeatClass::SoftSeat => "soft_seat",
            SeatClass::HardSeat => "hard_seat",
            SeatClass::NoSeat => "no_seat",
        }
    }

    /// The service's single-character seat type code.
    pub fn service_code(self) -> &'static str {
        match self {
            SeatClass::Business => "9",
            SeatClass::First => "7",
            SeatClass::Second => "8",
            SeatClass::AdvancedSoftSleep => "6",
            SeatClass::SoftSleep => "4",
            SeatClass::HardSleep => "3",
            SeatClass::SoftSeat => "2",
            SeatClass::HardSeat => "1",
            SeatClass::NoSeat => "0",
        }
    }

    /// Look up a seat class by its key.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.key() == key)
    }

    /// Look up a seat class by the service's seat type code.
    pub fn from_service_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.service_code() == code)
    }
}

impl fmt::Display for SeatClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl<'de> Deserialize<'de> for SeatClass {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SeatClass::from_key(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown seat class: {s}")))
    }
}

/// Available seats of one class on one train.
///
/// `Plentiful` stands for the service's "lots available" markers and
/// compares greater than any finite count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeatCount {
    Count(u32),
    Plentiful,
}

impl SeatCount {
    /// No seats.
    pub const ZERO: SeatCount = SeatCount::Count(0);

    /// Whether any seats are available.
    pub fn is_positive(self) -> bool {
        self != Self::ZERO
    }

    /// Whether this count satisfies a minimum requirement.
    pub fn at_least(self, min: u32) -> bool {
        self >= SeatCount::Count(min)
    }
}

impl Default for SeatCount {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Ord for SeatCount {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SeatCount::Count(a), SeatCount::Count(b)) => a.cmp(b),
            (SeatCount::Count(_), SeatCount::Plentiful) => Ordering::Less,
            (SeatCount::Plentiful, SeatCount::Count(_)) => Ordering::Greater,
            (SeatCount::Plentiful, SeatCount::Plentiful) => Ordering::Equal,
        }
    }
}

impl PartialOrd for SeatCount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SeatCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeatCount::Count(n) => write!(f, "{n}"),
            SeatCount::Plentiful => f.write_str("plentiful"),
        }
    }
}

/// Default tokens the service uses for "plenty of seats".
const DEFAULT_PLENTIFUL_TOKENS: &[&str] = &["有", "大量"];

/// Decodes the seat-count column tokens of a listing record.
#[derive(Debug, Clone)]
pub struct SeatCountDecoder {
    plentiful: Vec<String>,
}

impl SeatCountDecoder {
    /// Create a decoder recognising the given plentiful tokens.
    pub fn new(plentiful: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            plentiful: plentiful.into_iter().map(Into::into).collect(),
        }
    }

    /// Decode a single token.
    ///
    /// Plentiful tokens map to [`SeatCount::Plentiful`], a decimal string to
    /// its value (saturating), and anything else to zero.
    pub fn decode(&self, token: &str) -> SeatCount {
        let token = token.trim();

        if self.plentiful.iter().any(|p| p == token) {
            return SeatCount::Plentiful;
        }

        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return SeatCount::ZERO;
        }

        // All digits, so the only possible failure is overflow.
        SeatCount::Count(token.parse::<u32>().unwrap_or(u32::MAX))
    }
}

impl Default for SeatCountDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_PLENTIFUL_TOKENS.iter().copied())
    }
}

/// Built-in display labels for each seat class.
const ZH_CN_LABELS: &[(SeatClass, &str)] = &[
    (SeatClass::Business, "商务座"),
    (SeatClass::First, "一等座"),
    (SeatClass::Second, "二等座"),
    (SeatClass::AdvancedSoftSleep, "高级软卧"),
    (SeatClass::SoftSleep, "软卧"),
    (SeatClass::HardSleep, "硬卧"),
    (SeatClass::SoftSeat, "软座"),
    (SeatClass::HardSeat, "硬座"),
    (SeatClass::NoSeat, "无座"),
];

/// Bidirectional label ↔ seat class table.
///
/// Each class has one display label; any number of additional aliases may
/// resolve to a class.
#[derive(Debug, Clone, Default)]
pub struct SeatLabels {
    by_label: HashMap<String, SeatClass>,
    by_class: HashMap<SeatClass, String>,
}

impl SeatLabels {
    /// The service's own simplified Chinese labels.
    pub fn zh_cn() -> Self {
        let mut labels = Self::default();
        for (class, label) in ZH_CN_LABELS {
            labels.insert(*class, *label);
        }
        labels
    }

    /// Register `label` as the display label for `class`.
    ///
    /// The previous display label remains usable as an alias.
    pub fn insert(&mut self, class: SeatClass, label: impl Into<String>) {
        let label = label.into();
        self.by_label.insert(label.clone(), class);
        self.by_class.insert(class, label);
    }

    /// Register an extra label that resolves to `class` without changing
    /// its display label.
    pub fn alias(&mut self, label: impl Into<String>, class: SeatClass) {
        self.by_label.insert(label.into(), class);
    }

    /// Resolve a label, falling back to seat class keys and service codes.
    pub fn class_for(&self, label: &str) -> Option<SeatClass> {
        self.by_label
            .get(label)
            .copied()
            .or_else(|| SeatClass::from_key(label))
            .or_else(|| SeatClass::from_service_code(label))
    }

    /// The display label for a class, or its key when none is registered.
    pub fn label_for(&self, class: SeatClass) -> &str {
        self.by_class
            .get(&class)
            .map(String::as_str)
            .unwrap_or_else(|| class.key())
    }
}
