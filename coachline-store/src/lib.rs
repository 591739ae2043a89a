pub mod app_config;
pub mod booking_repo;
pub mod database;
mod rows;
pub mod trip_repo;

pub use app_config::Config;
pub use booking_repo::PgBookingStore;
pub use database::DbClient;
pub use trip_repo::PgTripDirectory;
