// Entity Models
// Each entity has a stable identity that never changes; everything else is state.

pub mod account;
pub mod transaction;

pub use account::{AccountStatus, LinkedAccount};
pub use transaction::{Transaction, TransactionEdit};
