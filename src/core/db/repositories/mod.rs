//! Database repositories
//!
//! Repositories encapsulate data access logic and provide a clean API for
//! business logic to interact with the database.

pub mod payment;
pub mod room;
pub mod user;

pub use payment::PaymentRepository;
pub use room::RoomRepository;
pub use user::UserRepository;
