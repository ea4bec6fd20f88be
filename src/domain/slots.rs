use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
};

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use utoipa::ToSchema;

use super::ValidationError;

/// One bookable window for a doctor, stored as zero-padded `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(NaiveTime);

impl Slot {
    /// Accepts `09:00`, `9:00`, `10:00 AM` and `1:30pm`.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        let invalid = || ValidationError(format!("\"{}\" is not a valid time slot", raw));

        let (clock, meridiem) = match trimmed.to_ascii_uppercase() {
            upper if upper.ends_with("AM") || upper.ends_with("PM") => {
                let (clock, meridiem) = upper.split_at(upper.len() - 2);
                (clock.trim_end().to_string(), Some(meridiem.to_string()))
            }
            upper => (upper, None),
        };

        let (hours, minutes) = clock.split_once(':').ok_or_else(invalid)?;
        if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
            return Err(invalid());
        }

        let time = match meridiem {
            Some(meridiem) => {
                NaiveTime::parse_from_str(&format!("{}:{} {}", hours, minutes, meridiem), "%I:%M %p")
            }
            None => NaiveTime::parse_from_str(&clock, "%H:%M"),
        }
        .map_err(|_| invalid())?;

        Ok(Self(time))
    }

    pub fn time(&self) -> NaiveTime {
        self.0
    }

    pub fn starts_at(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.0)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

impl FromStr for Slot {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Slot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Slot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Slot::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub fn of(date: NaiveDate) -> Self {
        date.weekday().into()
    }
}

impl From<chrono::Weekday> for Weekday {
    fn from(day: chrono::Weekday) -> Self {
        match day {
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
            chrono::Weekday::Sun => Weekday::Sunday,
        }
    }
}

/// The slots a doctor offers on one weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DayAvailability {
    pub day: Weekday,
    #[schema(value_type = Vec<String>, example = json!(["09:00", "09:30"]))]
    pub slots: Vec<Slot>,
}

/// Merges entries for the same weekday, drops duplicate slots and empty
/// days, and orders everything Monday-first and by time.
pub fn normalize_availability(availability: Vec<DayAvailability>) -> Vec<DayAvailability> {
    let mut merged: BTreeMap<Weekday, BTreeSet<Slot>> = BTreeMap::new();
    for entry in availability {
        merged.entry(entry.day).or_default().extend(entry.slots);
    }

    merged
        .into_iter()
        .filter(|(_, slots)| !slots.is_empty())
        .map(|(day, slots)| DayAvailability {
            day,
            slots: slots.into_iter().collect(),
        })
        .collect()
}

/// The slots offered on the weekday `date` falls on.
pub fn slots_for(availability: &[DayAvailability], date: NaiveDate) -> Vec<Slot> {
    let day = Weekday::of(date);
    let offered: BTreeSet<Slot> = availability
        .iter()
        .filter(|entry| entry.day == day)
        .flat_map(|entry| entry.slots.iter().copied())
        .collect();
    offered.into_iter().collect()
}

/// What a client needs to render a doctor's day: bookable slots and the
/// ones already taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SlotBoard {
    #[schema(value_type = Vec<String>)]
    pub slots: Vec<Slot>,
    #[schema(value_type = Vec<String>)]
    pub booked_slots: Vec<Slot>,
}

impl SlotBoard {
    /// A booked slot stays listed as booked even when the doctor no longer
    /// offers it, so the union of both lists covers every slot in play.
    pub fn derive(offered: &[Slot], booked: impl IntoIterator<Item = Slot>) -> Self {
        let booked: BTreeSet<Slot> = booked.into_iter().collect();
        let slots = offered
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|slot| !booked.contains(slot))
            .collect();

        Self {
            slots,
            booked_slots: booked.into_iter().collect(),
        }
    }

    pub fn is_available(&self, slot: Slot) -> bool {
        self.slots.contains(&slot)
    }

    pub fn is_booked(&self, slot: Slot) -> bool {
        self.booked_slots.contains(&slot)
    }
}
