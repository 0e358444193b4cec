pub mod equipment_store;
pub mod schedule_book;
pub mod utilization;
