pub mod ledger;
pub mod run;

pub use ledger::{fund, reset, set_blocked, show_balances, show_history};
pub use run::{init, run, show_status};
