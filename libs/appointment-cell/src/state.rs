// libs/appointment-cell/src/state.rs
use std::sync::Arc;

use tracing::info;

use shared_config::{AppConfig, LedgerBackend};
use shared_database::SupabaseClient;

use crate::services::allocator::AppointmentAllocator;
use crate::services::catalog::{CatalogError, SlotCatalog};
use crate::services::directory::{Directory, InMemoryDirectory, SupabaseDirectory};
use crate::services::ledger::{BookingLedger, InMemoryBookingLedger};
use crate::services::supabase_ledger::SupabaseBookingLedger;

/// Router state for the appointment cell.
#[derive(Clone)]
pub struct AppointmentState {
    pub config: Arc<AppConfig>,
    pub allocator: Arc<AppointmentAllocator>,
}

impl AppointmentState {
    /// Builds the allocator over the backend named in `config`.
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self, CatalogError> {
        let catalog = SlotCatalog::from_settings(&config.slots)?;

        let ledger: Arc<dyn BookingLedger>;
        let directory: Arc<dyn Directory>;
        match config.ledger_backend {
            LedgerBackend::Supabase => {
                let supabase = Arc::new(SupabaseClient::new(&config));
                ledger = Arc::new(SupabaseBookingLedger::new(supabase.clone()));
                directory = Arc::new(SupabaseDirectory::new(supabase));
            }
            LedgerBackend::Memory => {
                ledger = Arc::new(InMemoryBookingLedger::new());
                directory = Arc::new(InMemoryDirectory::new());
            }
        }

        info!(
            "Appointment cell using {:?} backend with {} slots per day",
            config.ledger_backend,
            catalog.len()
        );

        Ok(Self::new(config, AppointmentAllocator::new(catalog, ledger, directory)))
    }

    pub fn new(config: Arc<AppConfig>, allocator: AppointmentAllocator) -> Self {
        Self {
            config,
            allocator: Arc::new(allocator),
        }
    }
}
