// ABOUTME: Command module aggregator for the kahua CLI.
// ABOUTME: Re-exports the check, status, and acquire command handlers.

mod acquire;
mod check;
mod status;

pub use acquire::acquire;
pub use check::check;
pub use status::status;
