// ============================================================================
// Unit-of-Work Transactions
// ============================================================================
//
// Writes are applied immediately and recorded in an undo log (Command
// Pattern). Commit drops the log, rollback replays it backwards. Savepoints
// mark log positions so a failed retry attempt can be undone on its own.
//
// There is no isolation between concurrent sessions: another session may
// read a row that is later rolled back.
//
// ============================================================================

pub mod change;
pub mod unit_of_work;

pub use change::Change;
pub use unit_of_work::{Savepoint, UnitOfWork, UnitOfWorkId, UnitState};
