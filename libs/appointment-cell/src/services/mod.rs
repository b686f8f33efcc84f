pub mod allocator;
pub mod catalog;
pub mod directory;
pub mod ledger;
pub mod lifecycle;
pub mod supabase_ledger;
