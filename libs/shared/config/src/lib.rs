use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Where the booking ledger and the registries live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackend {
    Supabase,
    Memory,
}

impl FromStr for LedgerBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "supabase" => Ok(LedgerBackend::Supabase),
            "memory" | "in_memory" | "in-memory" => Ok(LedgerBackend::Memory),
            other => Err(format!("unknown ledger backend: {}", other)),
        }
    }
}

/// Business hours the slot catalog is derived from. Times are `HH:MM` labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSettings {
    pub day_start: String,
    pub day_end: String,
    pub granularity_minutes: u32,
}

impl Default for SlotSettings {
    fn default() -> Self {
        Self {
            day_start: "09:00".to_string(),
            day_end: "17:00".to_string(),
            granularity_minutes: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub ledger_backend: LedgerBackend,
    pub slots: SlotSettings,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = SlotSettings::default();

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            ledger_backend: env::var("LEDGER_BACKEND")
                .ok()
                .and_then(|raw| match raw.parse() {
                    Ok(backend) => Some(backend),
                    Err(e) => {
                        warn!("{}, falling back to supabase", e);
                        None
                    }
                })
                .unwrap_or(LedgerBackend::Supabase),
            slots: SlotSettings {
                day_start: env::var("SLOT_DAY_START")
                    .unwrap_or_else(|_| defaults.day_start.clone()),
                day_end: env::var("SLOT_DAY_END")
                    .unwrap_or_else(|_| defaults.day_end.clone()),
                granularity_minutes: env::var("SLOT_GRANULARITY_MINUTES")
                    .ok()
                    .and_then(|raw| {
                        raw.parse().map_err(|_| {
                            warn!("SLOT_GRANULARITY_MINUTES is not a number, using default");
                        }).ok()
                    })
                    .unwrap_or(defaults.granularity_minutes),
            },
            port: env::var("PORT")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(3000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    /// Whether the configured backend has everything it needs to serve requests.
    pub fn is_configured(&self) -> bool {
        if self.supabase_jwt_secret.is_empty() {
            return false;
        }
        match self.ledger_backend {
            LedgerBackend::Memory => true,
            LedgerBackend::Supabase => {
                !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
            }
        }
    }
}
