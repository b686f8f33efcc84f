// libs/appointment-cell/src/services/catalog.rs
use chrono::{NaiveTime, Timelike};
use thiserror::Error;

use shared_config::SlotSettings;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Invalid time of day: {0}")]
    InvalidTime(String),

    #[error("Slot granularity must be at least one minute")]
    ZeroGranularity,

    #[error("Business day starts at {start} but ends at {end}")]
    InvertedDay { start: String, end: String },
}

/// The fixed, ordered list of bookable `HH:MM` labels for one business day.
/// Both ends of the day are bookable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCatalog {
    slots: Vec<String>,
}

impl SlotCatalog {
    pub fn new(day_start: NaiveTime, day_end: NaiveTime, granularity_minutes: u32) -> Result<Self, CatalogError> {
        if granularity_minutes == 0 {
            return Err(CatalogError::ZeroGranularity);
        }
        if day_start > day_end {
            return Err(CatalogError::InvertedDay {
                start: format_label(day_start),
                end: format_label(day_end),
            });
        }

        let first = minute_of_day(day_start);
        let last = minute_of_day(day_end);
        let slots = (first..=last)
            .step_by(granularity_minutes as usize)
            .map(|minute| format!("{:02}:{:02}", minute / 60, minute % 60))
            .collect();

        Ok(Self { slots })
    }

    pub fn from_settings(settings: &SlotSettings) -> Result<Self, CatalogError> {
        Self::new(
            parse_label(&settings.day_start)?,
            parse_label(&settings.day_end)?,
            settings.granularity_minutes,
        )
    }

    pub fn all_slots(&self) -> &[String] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.slots.iter().any(|slot| slot == label)
    }

    /// Normalises `9:00` to `09:00` and returns it if it is a catalog slot.
    pub fn canonical_label(&self, raw: &str) -> Option<String> {
        let label = format_label(parse_label(raw).ok()?);
        self.contains(&label).then_some(label)
    }
}

fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

fn format_label(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

fn parse_label(raw: &str) -> Result<NaiveTime, CatalogError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| CatalogError::InvalidTime(raw.to_string()))
}
